//! Integration tests for the codeplug model
//!
//! These tests exercise the crate the way the emulator uses it:
//! - Filling images write by write and comparing captures
//! - Loading schema documents and annotating images with them
//! - Round-tripping schema documents

use cp_codeplug::{
    document, mark_unannotated, Address, AnnotationError, Collection, FieldValue, Image,
    ImageDifference, Severity,
};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// Build an image from `(byte address, bytes)` writes
    pub fn image(label: &str, writes: &[(u64, &[u8])]) -> Image {
        let mut image = Image::new(label);
        for (address, bytes) in writes {
            image.append(Address::from_byte(*address), bytes);
        }
        image
    }

    /// Value of the leaf annotation covering `byte`
    pub fn value_at(image: &Image, byte: u64) -> Option<FieldValue> {
        let address = Address::from_byte(byte);
        image
            .find(address)?
            .annotations()?
            .resolve(address)?
            .as_field()
            .map(|f| f.value.clone())
    }
}

use helpers::*;

const RADIO: &str = r#"
<codeplug>
  <meta><name>Test radio</name></meta>
  <element at="0">
    <meta><name>Info</name></meta>
    <string format="ascii" width="6" pad="0"><meta><name>Model</name></meta></string>
    <uint16le><meta><name>Revision</name></meta></uint16le>
  </element>
  <repeat at="100h" step="10h" min="1">
    <element>
      <meta><name>Channel</name></meta>
      <uint32be><meta><name>Frequency</name></meta></uint32be>
      <enum width="1">
        <meta><name>Power</name></meta>
        <item value="0"><name>Low</name></item>
        <item value="1"><name>High</name></item>
      </enum>
      <unknown width="3"/>
    </element>
  </repeat>
</codeplug>
"#;

// ============================================================================
// Image Tests
// ============================================================================

#[test]
fn test_sequential_writes_form_one_element() {
    let mut image = Image::new("capture");
    for i in 0..16u64 {
        image.append(Address::from_byte(0x200 + 4 * i), &[i as u8; 4]);
    }
    assert_eq!(image.len(), 1);
    assert_eq!(image.elements()[0].len(), 64);
    assert_eq!(image.data(Address::from_byte(0x204)).unwrap()[0], 1);
}

#[test]
fn test_collection_diff_between_captures() {
    let mut collection = Collection::new();
    collection.add_image(image("first", &[(0, &[1, 2, 3]), (0x100, &[9])]));
    collection.add_image(image("second", &[(0, &[1, 7, 3]), (0x200, &[5])]));

    let diff = ImageDifference::new(
        collection.image(0).unwrap(),
        collection.image(1).unwrap(),
    );
    assert_eq!(diff.modified_count(), 1);
    assert_eq!(diff.removed_count(), 1);
    assert_eq!(diff.added_count(), 1);
    assert!(ImageDifference::new(collection.image(1).unwrap(), collection.image(1).unwrap()).is_empty());
}

// ============================================================================
// Annotation Tests
// ============================================================================

#[test]
fn test_single_unknown_field() {
    let pattern = document::parse(r#"<codeplug><unknown at="0" width="1"/></codeplug>"#).unwrap();
    let mut image = image("one", &[(0, &[0x01])]);
    image.annotate(&pattern).unwrap();

    let annotations = image.elements()[0].annotations().unwrap();
    assert_eq!(annotations.len(), 1);
    let field = annotations.annotations()[0].as_field().unwrap();
    assert_eq!(field.address, Address::zero());
    assert_eq!(field.value, FieldValue::Unknown(vec![0x01]));
    assert!(field.issues.is_empty());
}

#[test]
fn test_uint16_endianness() {
    let mut image = image("int", &[(2, &[0x00, 0x02])]);

    let be = document::parse(r#"<codeplug><uint16be at="2"/></codeplug>"#).unwrap();
    image.annotate(&be).unwrap();
    assert_eq!(value_at(&image, 2), Some(FieldValue::Integer(2)));

    let le = document::parse(r#"<codeplug><uint16le at="2"/></codeplug>"#).unwrap();
    image.annotate(&le).unwrap();
    assert_eq!(value_at(&image, 2), Some(FieldValue::Integer(512)));
}

#[test]
fn test_annotate_radio_layout() {
    let pattern = document::parse(RADIO).unwrap();
    let mut image = image(
        "radio",
        &[
            (0, b"D878UV\x02\x01"),
            (0x100, &[0x08, 0x95, 0x44, 0x40, 0x01, 0, 0, 0]),
            (0x110, &[0x08, 0x95, 0x44, 0x40, 0x07, 0, 0, 0]),
        ],
    );
    image.annotate(&pattern).unwrap();
    assert!(image.is_annotated());

    assert_eq!(value_at(&image, 0), Some(FieldValue::String("D878UV".into())));
    assert_eq!(value_at(&image, 6), Some(FieldValue::Integer(0x0102)));
    assert_eq!(value_at(&image, 0x100), Some(FieldValue::Integer(0x0895_4440)));
    assert_eq!(
        value_at(&image, 0x104),
        Some(FieldValue::Enum { value: 1, name: Some("High".into()) })
    );

    let second = image.find(Address::from_byte(0x110)).unwrap();
    let severity = second.annotations().unwrap().severity();
    assert_eq!(severity, Some(Severity::Warning));
}

#[test]
fn test_missing_mandatory_repeat_fails() {
    let pattern = document::parse(RADIO).unwrap();
    let mut image = image("partial", &[(0, b"D878UV\x02\x01")]);
    let err = image.annotate(&pattern).unwrap_err();
    assert!(matches!(err, AnnotationError::Mismatch(_)));
    assert_eq!(err.address(), Some(Address::from_byte(0x100)));

    // The header still matched; the failure is reported on its element
    let header = image.find(Address::zero()).unwrap().annotations().unwrap();
    assert!(!header.is_empty());
    assert_eq!(header.severity(), Some(Severity::Error));
    assert!(header.all_issues().contains(&err.issue().unwrap()));
}

#[test]
fn test_field_overrun_attaches_error_to_element() {
    let pattern = document::parse(
        r#"<codeplug><element at="0"><uint8/><uint16be/></element></codeplug>"#,
    )
    .unwrap();
    let mut image = image("short", &[(0, &[0x01, 0x02])]);
    let err = image.annotate(&pattern).unwrap_err();
    assert_eq!(err.address(), Some(Address::from_byte(1)));

    let root = image.find(Address::zero()).unwrap().annotations().unwrap();
    let errors: Vec<_> = root
        .all_issues()
        .into_iter()
        .filter(|issue| issue.severity == Severity::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(value_at(&image, 0), Some(FieldValue::Integer(1)));
}

#[test]
fn test_oversized_schema_values_are_rejected() {
    for xml in [
        r#"<codeplug><unknown at="0" width="ffffffffffffffff"/></codeplug>"#,
        r#"<codeplug><unknown at="ffffffffffffffffh" width="1"/></codeplug>"#,
        r#"<codeplug><repeat at="0" step="-ffffffffffffffff"><uint8/></repeat></codeplug>"#,
    ] {
        assert!(document::parse(xml).is_err(), "{}", xml);
    }
}

#[test]
fn test_annotation_determinism() {
    let pattern = document::parse(RADIO).unwrap();
    let mut a = image("a", &[(0, b"D878UV\x02\x01"), (0x100, &[0; 8])]);
    let mut b = a.clone();
    a.annotate(&pattern).unwrap();
    b.annotate(&pattern).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_unannotated_gaps() {
    let pattern = document::parse(r#"<codeplug><uint8 at="2"/></codeplug>"#).unwrap();
    let img = image("gaps", &[(0, &[0, 1, 2, 3])]);
    let mut roots = cp_codeplug::ImageAnnotator::annotate(&img, &pattern).unwrap();
    mark_unannotated(&mut roots, &img);
    let spans: Vec<_> = roots[0]
        .iter()
        .map(|a| (a.address().byte(), a.size().byte()))
        .collect();
    assert_eq!(spans, vec![(0, 2), (2, 1), (3, 1)]);
}

// ============================================================================
// Document Tests
// ============================================================================

#[test]
fn test_document_roundtrip() {
    let first = document::parse(RADIO).unwrap();
    let second = document::parse(&document::serialize(&first).unwrap()).unwrap();
    assert_eq!(first, second);
}
