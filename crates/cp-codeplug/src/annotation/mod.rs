//! Annotation trees
//!
//! Matching a [`CodeplugPattern`](crate::pattern::CodeplugPattern) against
//! an [`Image`] produces one [`AnnotationCollection`] per image element.
//! Each collection holds address-sorted [`Annotation`]s: structured nodes
//! mirroring the block patterns, decoded fields, and (optionally) filler
//! segments for bytes no pattern covered.
//!
//! Annotations refer back to the pattern that produced them by
//! [`PatternId`]. The handle is not owning; if the pattern tree changes the
//! image simply has to be annotated again.

mod annotator;

use std::fmt;

use crate::address::{Address, Size};
use crate::image::Image;
use crate::pattern::PatternId;

pub use annotator::ImageAnnotator;

/// How serious an issue is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Note,
    Warning,
    /// Aborts the match of the enclosing branch
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Diagnostic attached to an annotation or collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationIssue {
    pub address: Address,
    pub severity: Severity,
    pub message: String,
}

impl AnnotationIssue {
    pub fn new(address: Address, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            address,
            severity,
            message: message.into(),
        }
    }

    pub fn note(address: Address, message: impl Into<String>) -> Self {
        Self::new(address, Severity::Note, message)
    }

    pub fn warning(address: Address, message: impl Into<String>) -> Self {
        Self::new(address, Severity::Warning, message)
    }

    pub fn error(address: Address, message: impl Into<String>) -> Self {
        Self::new(address, Severity::Error, message)
    }
}

impl fmt::Display for AnnotationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}: {}", self.severity, self.address, self.message)
    }
}

/// Decoded value of a field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Unknown(Vec<u8>),
    Unused(Vec<u8>),
    Integer(i64),
    Enum { value: u32, name: Option<String> },
    String(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Unknown(bytes) | FieldValue::Unused(bytes) => {
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Enum {
                name: Some(name), ..
            } => write!(f, "{}", name),
            FieldValue::Enum { value, name: None } => write!(f, "{}", value),
            FieldValue::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// A decoded leaf
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAnnotation {
    pub pattern: PatternId,
    pub address: Address,
    pub size: Size,
    pub value: FieldValue,
    pub issues: Vec<AnnotationIssue>,
}

/// Bytes of an element no pattern covered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnannotatedSegment {
    pub address: Address,
    pub size: Size,
}

/// Match of a block pattern; its size grows with every child added
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredAnnotation {
    pub pattern: PatternId,
    pub address: Address,
    pub size: Size,
    pub issues: Vec<AnnotationIssue>,
    children: AnnotationCollection,
}

impl StructuredAnnotation {
    pub fn new(pattern: PatternId, address: Address) -> Self {
        Self {
            pattern,
            address,
            size: Size::zero(),
            issues: Vec::new(),
            children: AnnotationCollection::new(),
        }
    }

    pub fn add(&mut self, child: Annotation) {
        self.size += child.size();
        self.children.add(child);
    }

    pub fn children(&self) -> &AnnotationCollection {
        &self.children
    }
}

/// Node of an annotation tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
    Structured(StructuredAnnotation),
    Field(FieldAnnotation),
    Unannotated(UnannotatedSegment),
}

impl Annotation {
    pub fn address(&self) -> Address {
        match self {
            Annotation::Structured(a) => a.address,
            Annotation::Field(a) => a.address,
            Annotation::Unannotated(a) => a.address,
        }
    }

    pub fn size(&self) -> Size {
        match self {
            Annotation::Structured(a) => a.size,
            Annotation::Field(a) => a.size,
            Annotation::Unannotated(a) => a.size,
        }
    }

    pub fn end(&self) -> Address {
        self.address() + self.size()
    }

    pub fn contains(&self, address: Address) -> bool {
        address >= self.address() && address < self.end()
    }

    /// Pattern that produced the annotation
    pub fn pattern(&self) -> Option<PatternId> {
        match self {
            Annotation::Structured(a) => Some(a.pattern),
            Annotation::Field(a) => Some(a.pattern),
            Annotation::Unannotated(_) => None,
        }
    }

    pub fn issues(&self) -> &[AnnotationIssue] {
        match self {
            Annotation::Structured(a) => &a.issues,
            Annotation::Field(a) => &a.issues,
            Annotation::Unannotated(_) => &[],
        }
    }

    pub fn as_field(&self) -> Option<&FieldAnnotation> {
        match self {
            Annotation::Field(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_structured(&self) -> Option<&StructuredAnnotation> {
        match self {
            Annotation::Structured(s) => Some(s),
            _ => None,
        }
    }

    /// Innermost leaf covering `address`
    pub fn resolve(&self, address: Address) -> Option<&Annotation> {
        match self {
            Annotation::Structured(s) => s.children.resolve(address),
            _ if self.contains(address) => Some(self),
            _ => None,
        }
    }

    /// Most severe issue in this subtree
    pub fn severity(&self) -> Option<Severity> {
        let own = self.issues().iter().map(|i| i.severity).max();
        match self {
            Annotation::Structured(s) => own.max(s.children.severity()),
            _ => own,
        }
    }
}

/// Address-sorted annotations with collection-level issues
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AnnotationCollection {
    annotations: Vec<Annotation>,
    issues: Vec<AnnotationIssue>,
}

impl AnnotationCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert keeping address order; equal addresses keep insertion order
    pub fn add(&mut self, annotation: Annotation) {
        let address = annotation.address();
        let idx = self
            .annotations
            .partition_point(|a| a.address() <= address);
        self.annotations.insert(idx, annotation);
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Annotation> {
        self.annotations.iter()
    }

    pub fn issues(&self) -> &[AnnotationIssue] {
        &self.issues
    }

    pub fn add_issue(&mut self, issue: AnnotationIssue) {
        self.issues.push(issue);
    }

    /// Top-level annotation covering `address`
    pub fn annotation_at(&self, address: Address) -> Option<&Annotation> {
        let idx = self
            .annotations
            .partition_point(|a| a.address() <= address);
        if idx == 0 {
            return None;
        }
        let candidate = &self.annotations[idx - 1];
        candidate.contains(address).then_some(candidate)
    }

    /// Innermost leaf covering `address`
    pub fn resolve(&self, address: Address) -> Option<&Annotation> {
        self.annotation_at(address)?.resolve(address)
    }

    /// Most severe issue of the collection and everything below it
    pub fn severity(&self) -> Option<Severity> {
        self.annotations
            .iter()
            .filter_map(Annotation::severity)
            .chain(self.issues.iter().map(|i| i.severity))
            .max()
    }

    /// All issues of the tree, depth first
    pub fn all_issues(&self) -> Vec<&AnnotationIssue> {
        let mut out: Vec<&AnnotationIssue> = self.issues.iter().collect();
        for annotation in &self.annotations {
            out.extend(annotation.issues());
            if let Annotation::Structured(s) = annotation {
                out.extend(s.children.all_issues());
            }
        }
        out
    }

    /// Fill the gaps between top-level annotations of an element
    fn fill_gaps(&mut self, start: Address, end: Address) {
        let mut cursor = start;
        let mut filled = Vec::with_capacity(self.annotations.len());
        for annotation in self.annotations.drain(..) {
            if annotation.address() > cursor {
                filled.push(Annotation::Unannotated(UnannotatedSegment {
                    address: cursor,
                    size: Size::from_bits(annotation.address().bits() - cursor.bits()),
                }));
            }
            cursor = cursor.max(annotation.end());
            filled.push(annotation);
        }
        if end > cursor {
            filled.push(Annotation::Unannotated(UnannotatedSegment {
                address: cursor,
                size: Size::from_bits(end.bits() - cursor.bits()),
            }));
        }
        self.annotations = filled;
    }
}

impl<'a> IntoIterator for &'a AnnotationCollection {
    type Item = &'a Annotation;
    type IntoIter = std::slice::Iter<'a, Annotation>;

    fn into_iter(self) -> Self::IntoIter {
        self.annotations.iter()
    }
}

/// Cover every byte of every element not matched by a pattern with an
/// [`UnannotatedSegment`]. `collections` pairs with the image elements.
pub fn mark_unannotated(collections: &mut [AnnotationCollection], image: &Image) {
    for (collection, element) in collections.iter_mut().zip(image.iter()) {
        collection.fill_gaps(element.address(), element.end());
    }
}
