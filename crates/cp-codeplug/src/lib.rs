//! Codeplug Library
//!
//! This crate provides the data model for codeplugs captured from radio
//! programming software:
//!
//! - **Addresses**: bit-precise [`Address`], [`Offset`] and [`Size`] arithmetic
//! - **Images**: sparse memory [`Image`]s made of contiguous [`Element`]s,
//!   grouped in a [`Collection`] and compared with [`ImageDifference`]
//! - **Patterns**: a [`CodeplugPattern`] schema describing the binary layout,
//!   read from and written to XML documents
//! - **Annotations**: the decoded tree obtained by matching a pattern against
//!   an image
//!
//! # Architecture
//!
//! Images are filled by the device emulation one write at a time and never
//! know about patterns. Annotating is a pure function from an image and a
//! pattern to one [`AnnotationCollection`] per element; the image only
//! stores the result.
//!
//! # Example
//!
//! ```rust
//! use cp_codeplug::{document, Address, FieldValue, Image};
//!
//! let pattern = document::parse(r#"<codeplug><uint16be at="2"/></codeplug>"#).unwrap();
//!
//! let mut image = Image::new("capture");
//! image.append(Address::from_byte(2), &[0x00, 0x02]);
//! image.annotate(&pattern).unwrap();
//!
//! let leaf = image.elements()[0]
//!     .annotations()
//!     .and_then(|a| a.resolve(Address::from_byte(2)))
//!     .and_then(|a| a.as_field())
//!     .unwrap();
//! assert_eq!(leaf.value, FieldValue::Integer(2));
//! ```

pub mod address;
pub mod annotation;
pub mod collection;
pub mod diff;
pub mod document;
pub mod error;
pub mod hexdump;
pub mod image;
pub mod pattern;

pub use address::{Address, CheckedOrd, Offset, Size};
pub use annotation::{
    mark_unannotated, Annotation, AnnotationCollection, AnnotationIssue, FieldAnnotation,
    FieldValue, ImageAnnotator, Severity, StructuredAnnotation, UnannotatedSegment,
};
pub use collection::Collection;
pub use diff::{ByteDifference, ElementDifference, ImageDifference};
pub use error::{AddressError, AnnotationError, DocumentError, PatternError};
pub use image::{Element, Image};
pub use pattern::{CodeplugPattern, MetaFlags, PatternId, PatternKind, PatternMeta, PatternNode};
