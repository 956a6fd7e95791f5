//! Error types for addresses, patterns, schema documents and annotation

use thiserror::Error;

use crate::address::Address;
use crate::annotation::AnnotationIssue;
use crate::pattern::PatternId;

/// Errors that can occur while parsing an address, offset or size
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Empty input string
    #[error("empty address")]
    Empty,

    /// The byte part is not a valid hexadecimal number
    #[error("invalid byte value: '{0}'")]
    InvalidByte(String),

    /// The bit part is not an octal number, or names a bit past 7 in an address
    #[error("invalid bit value: '{0}'")]
    InvalidBit(String),
}

/// Errors raised by structural operations on a pattern tree
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// The handle does not refer to a live node
    #[error("unknown pattern {0}")]
    UnknownPattern(PatternId),

    /// The node cannot hold children
    #[error("pattern {0} is not a structured pattern")]
    NotStructured(PatternId),

    /// The node is already attached to a parent
    #[error("pattern {0} already has a parent")]
    AlreadyAttached(PatternId),

    /// The parent refused the child
    #[error("cannot add child: {0}")]
    ChildRejected(String),

    /// The child is not part of the parent
    #[error("pattern {child} is not a child of {parent}")]
    NotAChild { parent: PatternId, child: PatternId },

    /// Index out of range
    #[error("child index {0} out of range")]
    IndexOutOfRange(usize),
}

/// Errors raised while reading a schema document
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Malformed XML
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Malformed attribute
    #[error("XML attribute error: {0}")]
    Attribute(#[from] quick_xml::events::attributes::AttrError),

    /// A tag appeared where it is not allowed
    #[error("unexpected <{0}> tag")]
    UnexpectedTag(String),

    /// A required attribute is missing
    #[error("<{tag}> requires a '{attribute}' attribute")]
    MissingAttribute {
        tag: String,
        attribute: &'static str,
    },

    /// An attribute value could not be interpreted
    #[error("invalid value '{value}' for attribute '{attribute}' of <{tag}>")]
    InvalidAttribute {
        tag: String,
        attribute: String,
        value: String,
    },

    /// Text content could not be interpreted
    #[error("invalid content of <{tag}>: {message}")]
    InvalidContent { tag: String, message: String },

    /// Address parsing failed
    #[error("invalid address: {0}")]
    Address(#[from] AddressError),

    /// The tree rejected a node
    #[error("pattern error: {0}")]
    Pattern(#[from] PatternError),

    /// The document does not contain a codeplug
    #[error("document contains no <codeplug> element")]
    MissingCodeplug,

    /// The resulting tree does not verify
    #[error("pattern '{0}' does not verify")]
    Verification(String),
}

/// Failure to match a schema against an image
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AnnotationError {
    /// A mandatory sub-match failed
    #[error("at {}: {}", .0.address, .0.message)]
    Mismatch(AnnotationIssue),

    /// The pattern tree does not describe a codeplug
    #[error("pattern {0} is not a codeplug")]
    NotACodeplug(PatternId),

    /// A pattern lacks the address it needs for matching
    #[error("pattern '{0}' has no address")]
    MissingAddress(String),
}

impl AnnotationError {
    /// The issue describing the failure, if any
    pub fn issue(&self) -> Option<&AnnotationIssue> {
        match self {
            AnnotationError::Mismatch(issue) => Some(issue),
            _ => None,
        }
    }

    /// Address at which matching failed
    pub fn address(&self) -> Option<Address> {
        self.issue().map(|i| i.address)
    }
}
