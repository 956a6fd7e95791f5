//! Leaf field patterns

use crate::pattern::meta::PatternMeta;

/// Integer encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IntegerFormat {
    Signed,
    #[default]
    Unsigned,
    /// Binary coded decimal, one digit per nibble, most significant first
    Bcd,
}

impl IntegerFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegerFormat::Signed => "signed",
            IntegerFormat::Unsigned => "unsigned",
            IntegerFormat::Bcd => "bcd",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "signed" => Some(IntegerFormat::Signed),
            "unsigned" => Some(IntegerFormat::Unsigned),
            "bcd" => Some(IntegerFormat::Bcd),
            _ => None,
        }
    }
}

/// Byte order of integers wider than 8 bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endian {
    #[default]
    Little,
    Big,
}

impl Endian {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endian::Little => "little",
            Endian::Big => "big",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "little" => Some(Endian::Little),
            "big" => Some(Endian::Big),
            _ => None,
        }
    }
}

/// Integer field, 1 to 32 bits wide
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntegerField {
    pub format: IntegerFormat,
    pub endian: Endian,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub default: Option<i64>,
}

impl IntegerField {
    pub fn new(format: IntegerFormat, endian: Endian) -> Self {
        Self {
            format,
            endian,
            ..Default::default()
        }
    }

    pub fn with_bounds(mut self, min: Option<i64>, max: Option<i64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_default(mut self, default: i64) -> Self {
        self.default = Some(default);
        self
    }
}

/// One named value of an enum field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumItem {
    pub value: u32,
    pub meta: PatternMeta,
}

impl EnumItem {
    pub fn new(value: u32, name: impl Into<String>) -> Self {
        Self {
            value,
            meta: PatternMeta::new(name),
        }
    }
}

/// Enumeration field, at most 8 bits wide
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnumField {
    items: Vec<EnumItem>,
}

impl EnumField {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an item, replacing an existing item with the same value
    pub fn add_item(&mut self, item: EnumItem) {
        match self.items.iter_mut().find(|i| i.value == item.value) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    pub fn with_item(mut self, item: EnumItem) -> Self {
        self.add_item(item);
        self
    }

    pub fn items(&self) -> &[EnumItem] {
        &self.items
    }

    pub fn item_by_value(&self, value: u32) -> Option<&EnumItem> {
        self.items.iter().find(|i| i.value == value)
    }

    pub fn remove_item(&mut self, value: u32) -> Option<EnumItem> {
        let pos = self.items.iter().position(|i| i.value == value)?;
        Some(self.items.remove(pos))
    }
}

/// Character encoding of a string field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StringFormat {
    #[default]
    Ascii,
    /// UTF-16, two bytes per character
    Unicode,
}

impl StringFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            StringFormat::Ascii => "ascii",
            StringFormat::Unicode => "unicode",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ascii" => Some(StringFormat::Ascii),
            "unicode" => Some(StringFormat::Unicode),
            _ => None,
        }
    }

    /// Bytes per character
    pub fn char_width(&self) -> u64 {
        match self {
            StringFormat::Ascii => 1,
            StringFormat::Unicode => 2,
        }
    }
}

/// Fixed-length string field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringField {
    pub format: StringFormat,
    pub num_chars: u32,
    /// Pad/terminator byte
    pub pad: u8,
}

impl StringField {
    pub fn new(format: StringFormat, num_chars: u32, pad: u8) -> Self {
        Self {
            format,
            num_chars,
            pad,
        }
    }

    /// Size in bytes
    pub fn byte_len(&self) -> u64 {
        u64::from(self.num_chars) * self.format.char_width()
    }
}

/// Leaf patterns; all have a fixed size
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPattern {
    /// Opaque bytes of known size
    Unknown,
    /// Bytes expected to hold `content`
    Unused { content: Vec<u8> },
    Integer(IntegerField),
    Enum(EnumField),
    String(StringField),
}

impl FieldPattern {
    pub fn kind_name(&self) -> &'static str {
        match self {
            FieldPattern::Unknown => "unknown",
            FieldPattern::Unused { .. } => "unused",
            FieldPattern::Integer(_) => "int",
            FieldPattern::Enum(_) => "enum",
            FieldPattern::String(_) => "string",
        }
    }
}
