//! Descriptive metadata attached to every pattern

/// Review state of a pattern, ordered by how much attention it needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MetaFlags {
    #[default]
    None,
    Done,
    NeedsReview,
    Incomplete,
}

impl MetaFlags {
    /// Tag used in the schema document, if any
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            MetaFlags::None => None,
            MetaFlags::Done => Some("done"),
            MetaFlags::NeedsReview => Some("needs-review"),
            MetaFlags::Incomplete => Some("incomplete"),
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "done" => Some(MetaFlags::Done),
            "needs-review" => Some(MetaFlags::NeedsReview),
            "incomplete" => Some(MetaFlags::Incomplete),
            _ => None,
        }
    }

    /// The more severe of two flags
    pub fn combine(self, other: MetaFlags) -> MetaFlags {
        self.max(other)
    }
}

/// Name, documentation and review state of a pattern
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PatternMeta {
    pub name: String,
    pub short_name: Option<String>,
    pub brief: Option<String>,
    pub description: Option<String>,
    /// Firmware version the pattern was observed with
    pub firmware: Option<String>,
    pub flags: MetaFlags,
}

impl PatternMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_short_name(mut self, short_name: impl Into<String>) -> Self {
        self.short_name = Some(short_name.into());
        self
    }

    pub fn with_brief(mut self, brief: impl Into<String>) -> Self {
        self.brief = Some(brief.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_firmware(mut self, firmware: impl Into<String>) -> Self {
        self.firmware = Some(firmware.into());
        self
    }

    pub fn with_flags(mut self, flags: MetaFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Short name if set, else the name
    pub fn display_name(&self) -> &str {
        self.short_name.as_deref().unwrap_or(&self.name)
    }
}
