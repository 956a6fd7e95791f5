//! Schema documents
//!
//! Codeplug patterns are stored as XML. Every pattern is one tag, nested the
//! way the tree is nested, with an optional `<meta>` block:
//!
//! ```xml
//! <codeplug>
//!   <meta><name>D878UV</name></meta>
//!   <repeat at="800000h" step="40h" max="4000">
//!     <element>
//!       <meta><name>Channel</name><needs-review/></meta>
//!       <uint32le><meta><name>RX frequency</name></meta></uint32le>
//!       <unknown width="3ch"/>
//!     </element>
//!   </repeat>
//! </codeplug>
//! ```
//!
//! Addresses and widths use the `byte[h][:bit]` text form of
//! [`Address`](crate::Address) and [`Size`](crate::Size). Only children of
//! the codeplug carry an `at` attribute when written; everything below them
//! is placed implicitly.
//!
//! [`parse`] stops at the first structural problem and only returns trees
//! that pass [`CodeplugPattern::verify`].

use std::str::FromStr;

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use tracing::debug;

use crate::address::{Address, Offset, Size};
use crate::error::DocumentError;
use crate::pattern::{
    CodeplugPattern, EnumField, EnumItem, Endian, FieldPattern, IntegerField, IntegerFormat,
    MetaFlags, PatternId, PatternKind, PatternMeta, PatternNode, StringField, StringFormat,
};

/// Parse a schema document into a verified pattern tree
pub fn parse(xml: &str) -> Result<CodeplugPattern, DocumentError> {
    let root = read_tree(xml)?;
    if root.tag != "codeplug" {
        return Err(DocumentError::MissingCodeplug);
    }

    let mut pattern = CodeplugPattern::with_meta(meta_of(&root, "Codeplug"));
    for child in root.pattern_children() {
        let id = build(&mut pattern, child)?;
        let root_id = pattern.root();
        pattern.add_child(root_id, id)?;
    }

    if !pattern.verify() {
        let culprit = pattern
            .descendants(pattern.root())
            .into_iter()
            .filter(|id| !pattern.verify_node(*id))
            .find(|id| pattern.children(*id).iter().all(|c| pattern.verify_node(*c)))
            .unwrap_or(pattern.root());
        return Err(DocumentError::Verification(pattern.path(culprit).join("/")));
    }

    debug!("Parsed codeplug pattern with {} nodes", pattern.len());
    Ok(pattern)
}

/// Write a pattern tree as a schema document
pub fn serialize(pattern: &CodeplugPattern) -> Result<String, DocumentError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    write_pattern(&mut writer, pattern, pattern.root())?;
    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

// Reading

/// Minimal element tree; schema documents are small
#[derive(Debug, Default)]
struct XmlNode {
    tag: String,
    attributes: Vec<(String, String)>,
    children: Vec<XmlNode>,
    text: String,
}

impl XmlNode {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, DocumentError> {
        let mut node = XmlNode {
            tag: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
            ..Default::default()
        };
        for attribute in start.attributes() {
            let attribute = attribute?;
            node.attributes.push((
                String::from_utf8_lossy(attribute.key.as_ref()).into_owned(),
                attribute.unescape_value()?.into_owned(),
            ));
        }
        Ok(node)
    }

    fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn child(&self, tag: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.tag == tag)
    }

    fn pattern_children(&self) -> impl Iterator<Item = &XmlNode> {
        self.children
            .iter()
            .filter(|c| c.tag != "meta" && c.tag != "item")
    }

    fn invalid(&self, attribute: &str, value: &str) -> DocumentError {
        DocumentError::InvalidAttribute {
            tag: self.tag.clone(),
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }

    /// Optional attribute parsed with `FromStr`
    fn parsed<T: FromStr>(&self, attribute: &str) -> Result<Option<T>, DocumentError> {
        self.attr(attribute)
            .map(|v| v.trim().parse::<T>().map_err(|_| self.invalid(attribute, v)))
            .transpose()
    }

    fn required<T: FromStr>(&self, attribute: &'static str) -> Result<T, DocumentError> {
        self.parsed(attribute)?
            .ok_or_else(|| DocumentError::MissingAttribute {
                tag: self.tag.clone(),
                attribute,
            })
    }
}

fn read_tree(xml: &str) -> Result<XmlNode, DocumentError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(XmlNode::from_start(&start)?),
            Event::Empty(start) => {
                let node = XmlNode::from_start(&start)?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::End(_) => {
                if let Some(node) = stack.pop() {
                    attach(&mut stack, &mut root, node)?;
                }
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    root.ok_or(DocumentError::MissingCodeplug)
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), DocumentError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => return Err(DocumentError::UnexpectedTag(node.tag)),
    }
    Ok(())
}

/// Meta fields directly below `node`
fn meta_fields(node: &XmlNode, default_name: &str) -> PatternMeta {
    let text = |tag: &str| node.child(tag).map(|c| c.text.trim().to_string());
    let mut meta = PatternMeta::new(text("name").unwrap_or_else(|| default_name.to_string()));
    meta.short_name = text("short-name");
    meta.brief = text("brief");
    meta.description = text("description");
    meta.firmware = text("firmware");
    meta.flags = node
        .children
        .iter()
        .find_map(|c| MetaFlags::from_tag(&c.tag))
        .unwrap_or_default();
    meta
}

/// Meta block of a pattern tag, or a default one
fn meta_of(node: &XmlNode, default_name: &str) -> PatternMeta {
    match node.child("meta") {
        Some(meta) => meta_fields(meta, default_name),
        None => PatternMeta::new(default_name),
    }
}

fn build(pattern: &mut CodeplugPattern, node: &XmlNode) -> Result<PatternId, DocumentError> {
    let (built, default_name) = match node.tag.as_str() {
        "repeat" => (build_repeat(node)?, "Repeat"),
        "element" => (PatternNode::element(), "Element"),
        "unknown" => (PatternNode::unknown(node.required("width")?), "Unknown data"),
        "unused" => {
            let mut built = PatternNode::unused(parse_hex(node)?);
            if let Some(width) = node.parsed::<Size>("width")? {
                built = built.sized(width);
            }
            (built, "Unused data")
        }
        "int" | "uint" | "bit" | "bcd" | "bcd8" | "int8" | "uint8" | "uint16" | "uint16le"
        | "uint16be" | "uint32le" | "uint32be" => (build_integer(node)?, "Integer"),
        "enum" => (build_enum(node)?, "Enumeration"),
        "string" => (build_string(node)?, "String"),
        other => return Err(DocumentError::UnexpectedTag(other.to_string())),
    };

    let mut built = built.with_meta(meta_of(node, default_name));
    if let Some(at) = node.attr("at") {
        built = built.at(at.parse::<Address>()?);
    }

    let id = pattern.create(built);
    for child in node.pattern_children() {
        let child_id = build(pattern, child)?;
        pattern.add_child(id, child_id)?;
    }
    Ok(id)
}

fn build_repeat(node: &XmlNode) -> Result<PatternNode, DocumentError> {
    if let Some(step) = node.parsed::<Offset>("step")? {
        return Ok(PatternNode::repeat(
            step,
            node.parsed("min")?,
            node.parsed("max")?,
        ));
    }
    if let Some(n) = node.parsed::<u32>("n")? {
        return Ok(PatternNode::fixed_repeat(n));
    }
    Ok(PatternNode::block_repeat(
        node.parsed("min")?.unwrap_or(0),
        node.parsed("max")?.unwrap_or(1),
    ))
}

/// Width, format and endian implied by the integer shorthand tags
fn integer_defaults(tag: &str) -> (Option<&'static str>, Option<IntegerFormat>, Option<Endian>) {
    use Endian::*;
    use IntegerFormat::*;
    match tag {
        "int" => (None, Some(Signed), None),
        "uint" => (None, Some(Unsigned), None),
        "bit" => (Some(":1"), Some(Unsigned), None),
        "bcd" => (None, Some(Bcd), None),
        "bcd8" => (Some(":40"), Some(Bcd), None),
        "int8" => (Some(":10"), Some(Signed), None),
        "uint8" => (Some(":10"), Some(Unsigned), None),
        "uint16" => (Some(":20"), Some(Unsigned), None),
        "uint16le" => (Some(":20"), Some(Unsigned), Some(Little)),
        "uint16be" => (Some(":20"), Some(Unsigned), Some(Big)),
        "uint32le" => (Some(":40"), Some(Unsigned), Some(Little)),
        "uint32be" => (Some(":40"), Some(Unsigned), Some(Big)),
        _ => (None, None, None),
    }
}

fn build_integer(node: &XmlNode) -> Result<PatternNode, DocumentError> {
    let (width, format, endian) = integer_defaults(&node.tag);

    let width: Size = match node.attr("width").or(width) {
        Some(w) => w.parse().map_err(|_| node.invalid("width", w))?,
        None => {
            return Err(DocumentError::MissingAttribute {
                tag: node.tag.clone(),
                attribute: "width",
            })
        }
    };
    let bits = u32::try_from(width.bits()).map_err(|_| node.invalid("width", &width.to_string()))?;

    let format = match node.attr("format") {
        Some(f) => IntegerFormat::parse(f).ok_or_else(|| node.invalid("format", f))?,
        None => format.unwrap_or(IntegerFormat::Signed),
    };
    let endian = match node.attr("endian") {
        Some(e) => Endian::parse(e).ok_or_else(|| node.invalid("endian", e))?,
        None if bits > 8 => endian.ok_or_else(|| DocumentError::MissingAttribute {
            tag: node.tag.clone(),
            attribute: "endian",
        })?,
        None => endian.unwrap_or_default(),
    };

    let mut field = IntegerField::new(format, endian).with_bounds(node.parsed("min")?, node.parsed("max")?);
    field.default = node.parsed("default")?;
    Ok(PatternNode::integer_field(bits, field))
}

fn build_enum(node: &XmlNode) -> Result<PatternNode, DocumentError> {
    let width: Size = node.required("width")?;
    let bits = u32::try_from(width.bits()).map_err(|_| node.invalid("width", &width.to_string()))?;

    let mut field = EnumField::new();
    for item in node.children.iter().filter(|c| c.tag == "item") {
        let value: u32 = item.required("value")?;
        field.add_item(EnumItem {
            value,
            meta: meta_fields(item, &format!("Value {}", value)),
        });
    }
    Ok(PatternNode::enumeration(bits, field))
}

fn build_string(node: &XmlNode) -> Result<PatternNode, DocumentError> {
    let format = match node.attr("format") {
        Some(f) => StringFormat::parse(f).ok_or_else(|| node.invalid("format", f))?,
        None => StringFormat::default(),
    };
    let num_chars: u32 = node.required("width")?;
    let pad: u8 = node.parsed("pad")?.unwrap_or(0);
    Ok(PatternNode::string(StringField::new(format, num_chars, pad)))
}

fn parse_hex(node: &XmlNode) -> Result<Vec<u8>, DocumentError> {
    let digits: Vec<u8> = node
        .text
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();
    let invalid = |message: &str| DocumentError::InvalidContent {
        tag: node.tag.clone(),
        message: message.to_string(),
    };
    if digits.len() % 2 != 0 {
        return Err(invalid("odd number of hex digits"));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|s| u8::from_str_radix(s, 16).ok())
                .ok_or_else(|| invalid("invalid hex digit"))
        })
        .collect()
}

// Writing

type XmlWriter = Writer<Vec<u8>>;

fn write_text(writer: &mut XmlWriter, tag: &str, text: &str) -> quick_xml::Result<()> {
    writer.write_event(Event::Start(BytesStart::new(tag)))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(tag)))
}

fn write_meta(writer: &mut XmlWriter, meta: &PatternMeta) -> quick_xml::Result<()> {
    write_text(writer, "name", &meta.name)?;
    for (tag, value) in [
        ("short-name", &meta.short_name),
        ("brief", &meta.brief),
        ("description", &meta.description),
        ("firmware", &meta.firmware),
    ] {
        if let Some(value) = value {
            write_text(writer, tag, value)?;
        }
    }
    if let Some(tag) = meta.flags.tag() {
        writer.write_event(Event::Empty(BytesStart::new(tag)))?;
    }
    Ok(())
}

fn write_pattern(
    writer: &mut XmlWriter,
    pattern: &CodeplugPattern,
    id: PatternId,
) -> quick_xml::Result<()> {
    let Some(node) = pattern.get(id) else {
        return Ok(());
    };

    let mut attrs: Vec<(&str, String)> = Vec::new();
    if id != pattern.root() && !pattern.has_implicit_address(id) {
        if let Some(at) = node.address() {
            attrs.push(("at", at.to_string()));
        }
    }
    let width = node.size().map(|s| s.to_string()).unwrap_or_default();

    let tag = match node.kind() {
        PatternKind::Codeplug { .. } => "codeplug",
        PatternKind::Repeat { step, min, max, .. } => {
            attrs.push(("step", step.to_string()));
            if let Some(min) = min {
                attrs.push(("min", min.to_string()));
            }
            if let Some(max) = max {
                attrs.push(("max", max.to_string()));
            }
            "repeat"
        }
        PatternKind::BlockRepeat { min, max, .. } => {
            attrs.push(("min", min.to_string()));
            attrs.push(("max", max.to_string()));
            "repeat"
        }
        PatternKind::FixedRepeat { n, .. } => {
            attrs.push(("n", n.to_string()));
            "repeat"
        }
        PatternKind::Element { .. } => "element",
        PatternKind::Field(FieldPattern::Unknown) => {
            attrs.push(("width", width));
            "unknown"
        }
        PatternKind::Field(FieldPattern::Unused { .. }) => {
            attrs.push(("width", width));
            "unused"
        }
        PatternKind::Field(FieldPattern::Integer(int)) => {
            let wide = node.size().is_some_and(|s| s.bits() > 8);
            attrs.push(("width", width));
            attrs.push(("format", int.format.as_str().to_string()));
            if wide {
                attrs.push(("endian", int.endian.as_str().to_string()));
            }
            for (name, value) in [("default", int.default), ("min", int.min), ("max", int.max)] {
                if let Some(value) = value {
                    attrs.push((name, value.to_string()));
                }
            }
            "int"
        }
        PatternKind::Field(FieldPattern::Enum(_)) => {
            attrs.push(("width", width));
            "enum"
        }
        PatternKind::Field(FieldPattern::String(s)) => {
            attrs.push(("format", s.format.as_str().to_string()));
            attrs.push(("width", s.num_chars.to_string()));
            attrs.push(("pad", s.pad.to_string()));
            "string"
        }
    };

    let mut start = BytesStart::new(tag);
    for (name, value) in &attrs {
        start.push_attribute((*name, value.as_str()));
    }
    writer.write_event(Event::Start(start))?;

    writer.write_event(Event::Start(BytesStart::new("meta")))?;
    write_meta(writer, node.meta())?;
    writer.write_event(Event::End(BytesEnd::new("meta")))?;

    match node.kind() {
        PatternKind::Field(FieldPattern::Enum(e)) => {
            for item in e.items() {
                let value = item.value.to_string();
                let mut start = BytesStart::new("item");
                start.push_attribute(("value", value.as_str()));
                writer.write_event(Event::Start(start))?;
                write_meta(writer, &item.meta)?;
                writer.write_event(Event::End(BytesEnd::new("item")))?;
            }
        }
        PatternKind::Field(FieldPattern::Unused { content }) if !content.is_empty() => {
            let hex: String = content.iter().map(|b| format!("{:02x}", b)).collect();
            writer.write_event(Event::Text(BytesText::new(&hex)))?;
        }
        _ => {}
    }

    for child in node.children() {
        write_pattern(writer, pattern, *child)?;
    }

    writer.write_event(Event::End(BytesEnd::new(tag)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AddressError;

    const CHANNELS: &str = r#"
        <codeplug>
          <meta><name>Radio</name><description>Test layout</description></meta>
          <element at="10h">
            <meta><name>Settings</name><done/></meta>
            <uint8><meta><name>Volume</name></meta></uint8>
            <bit/>
            <int width=":7" format="unsigned"/>
            <uint16be min="0" max="1000"/>
            <enum width="1">
              <meta><name>Power</name></meta>
              <item value="0"><name>Low</name></item>
              <item value="1"><name>High</name><description>Full power</description></item>
            </enum>
            <string format="ascii" width="8" pad="32"/>
            <unused>ffff</unused>
          </element>
          <repeat at="100h" step="20h" max="16">
            <repeat n="2">
              <unknown width="10h"><meta><name>Half</name><needs-review/></meta></unknown>
            </repeat>
          </repeat>
          <repeat at="1000h" min="0" max="8">
            <uint32le/>
          </repeat>
        </codeplug>
    "#;

    #[test]
    fn test_parse_structure() {
        let p = parse(CHANNELS).unwrap();
        let root = p.root();
        assert_eq!(p.meta(root).unwrap().name, "Radio");
        assert_eq!(p.children(root).len(), 3);

        let settings = p.child_at(root, 0).unwrap();
        assert_eq!(p.address(settings), Some(Address::from_byte(0x10)));
        assert_eq!(p.meta(settings).unwrap().flags, MetaFlags::Done);
        // 1 + 1 bit + 7 bits + 2 + 1 + 8 + 2 bytes
        assert_eq!(p.size(settings), Some(Size::from_bytes(15)));

        let power = p.child_at(settings, 4).unwrap();
        match p.kind(power) {
            Some(PatternKind::Field(FieldPattern::Enum(e))) => {
                assert_eq!(e.items().len(), 2);
                assert_eq!(e.item_by_value(1).unwrap().meta.name, "High");
            }
            other => panic!("unexpected kind {:?}", other),
        }

        let zones = p.child_at(root, 1).unwrap();
        assert!(matches!(p.kind(zones), Some(PatternKind::Repeat { .. })));
        let pair = p.child_at(zones, 0).unwrap();
        assert_eq!(p.size(pair), Some(Size::from_bytes(0x20)));
        assert_eq!(p.combined_flags(root), MetaFlags::NeedsReview);

        let table = p.child_at(root, 2).unwrap();
        assert!(matches!(
            p.kind(table),
            Some(PatternKind::BlockRepeat { min: 0, max: 8, .. })
        ));
    }

    #[test]
    fn test_roundtrip() {
        let first = parse(CHANNELS).unwrap();
        let text = serialize(&first).unwrap();
        let second = parse(&text).unwrap();
        assert_eq!(first, second);
        assert_eq!(serialize(&second).unwrap(), text);
    }

    #[test]
    fn test_missing_width() {
        let err = parse(r#"<codeplug><unknown at="0"/></codeplug>"#).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::MissingAttribute { attribute: "width", .. }
        ));
    }

    #[test]
    fn test_wide_int_requires_endian() {
        let err = parse(r#"<codeplug><int at="0" width="2"/></codeplug>"#).unwrap_err();
        assert!(matches!(
            err,
            DocumentError::MissingAttribute { attribute: "endian", .. }
        ));
    }

    #[test]
    fn test_unknown_tag() {
        let err = parse(r#"<codeplug><float at="0"/></codeplug>"#).unwrap_err();
        assert!(matches!(err, DocumentError::UnexpectedTag(tag) if tag == "float"));
    }

    #[test]
    fn test_not_a_codeplug() {
        assert!(matches!(
            parse("<element/>"),
            Err(DocumentError::MissingCodeplug)
        ));
    }

    #[test]
    fn test_empty_codeplug_does_not_verify() {
        assert!(matches!(
            parse("<codeplug/>"),
            Err(DocumentError::Verification(_))
        ));
    }

    #[test]
    fn test_top_level_needs_address() {
        let err = parse(r#"<codeplug><unknown width="1"/></codeplug>"#).unwrap_err();
        assert!(matches!(err, DocumentError::Pattern(_)));
    }

    #[test]
    fn test_out_of_range_width() {
        let err = parse(r#"<codeplug><unknown at="0" width="ffffffffffffffff"/></codeplug>"#)
            .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::InvalidAttribute { ref attribute, .. } if attribute == "width"
        ));
        let err = parse(r#"<codeplug><unknown at="2000000000000000" width="1"/></codeplug>"#)
            .unwrap_err();
        assert!(matches!(
            err,
            DocumentError::Address(AddressError::InvalidByte(_))
        ));
    }

    #[test]
    fn test_huge_sizes_do_not_overflow() {
        // Each width fits on its own; their sum does not
        let xml = r#"<codeplug>
            <element at="0">
              <unknown width="1fffffffffffffff"/>
              <unknown width="1fffffffffffffff"/>
            </element>
            <repeat at="0" step="1" n="65535"><unknown width="1fffffffffffffff"/></repeat>
        </codeplug>"#;
        let _ = parse(xml);
    }

    #[test]
    fn test_bad_hex_content() {
        let err = parse(r#"<codeplug><unused at="0">fg</unused></codeplug>"#).unwrap_err();
        assert!(matches!(err, DocumentError::InvalidContent { .. }));
    }

    #[test]
    fn test_malformed_xml() {
        assert!(matches!(
            parse("<codeplug><element></codeplug>"),
            Err(DocumentError::Xml(_))
        ));
    }
}
