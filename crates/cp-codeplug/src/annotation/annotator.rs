//! Schema matcher
//!
//! Recursive descent over the pattern tree, driven by addresses:
//!
//! - children of the codeplug are placed at their explicit addresses,
//! - sparse repeats look up the covering element for every iteration and
//!   stop at the first miss once their minimum count is met,
//! - block patterns consume the covering element from a cursor and never
//!   read past its end,
//! - fields decode their value in place.
//!
//! Issues with severity [`Severity::Error`] abort the branch they occur in.
//! Before the abort propagates, the issue is attached to the innermost node
//! that matched so far, or to the element's collection when there is none.
//! Notes and warnings are recorded on the annotation and matching goes on.

use tracing::{debug, warn};

use crate::address::{Address, Size};
use crate::annotation::{
    Annotation, AnnotationCollection, AnnotationIssue, FieldAnnotation, FieldValue,
    StructuredAnnotation,
};
use crate::error::AnnotationError;
use crate::image::{Element, Image};
use crate::pattern::{
    CodeplugPattern, Endian, FieldPattern, IntegerField, IntegerFormat, PatternId, PatternKind,
    PatternNode, StringField, StringFormat,
};

/// Matches a codeplug pattern against an image
pub struct ImageAnnotator<'a> {
    pattern: &'a CodeplugPattern,
    image: &'a Image,
}

type Matched<T> = Result<T, AnnotationIssue>;

/// Failed block match with the partial annotation carrying its issue
struct Partial {
    issue: AnnotationIssue,
    node: Option<Annotation>,
}

impl From<AnnotationIssue> for Partial {
    fn from(issue: AnnotationIssue) -> Self {
        Partial { issue, node: None }
    }
}

impl Partial {
    /// Attach `issue` to `annotation` and abort with it
    fn fail(mut annotation: StructuredAnnotation, issue: AnnotationIssue) -> Self {
        annotation.issues.push(issue.clone());
        Partial {
            issue,
            node: Some(Annotation::Structured(annotation)),
        }
    }

    /// Wrap a failed child match into its parent
    fn nest(self, mut parent: StructuredAnnotation) -> Self {
        match self.node {
            Some(node) => {
                parent.add(node);
                Partial {
                    issue: self.issue,
                    node: Some(Annotation::Structured(parent)),
                }
            }
            None => Partial::fail(parent, self.issue),
        }
    }

    /// Keep the partial match in `root`; returns the issue to propagate
    fn record(self, root: &mut AnnotationCollection) -> AnnotationIssue {
        match self.node {
            Some(node) => root.add(node),
            None => root.add_issue(self.issue.clone()),
        }
        self.issue
    }
}

impl<'a> ImageAnnotator<'a> {
    /// Annotate `image` with `pattern`.
    ///
    /// Returns one collection per image element, in element order. Fails
    /// if any mandatory part of the pattern does not match.
    pub fn annotate(
        image: &'a Image,
        pattern: &'a CodeplugPattern,
    ) -> Result<Vec<AnnotationCollection>, AnnotationError> {
        let (roots, result) = Self::annotate_partial(image, pattern);
        result.map(|()| roots)
    }

    /// Like [`annotate`](Self::annotate), but also returns the collections
    /// built up to a failure. The failing issue is attached to them.
    pub fn annotate_partial(
        image: &'a Image,
        pattern: &'a CodeplugPattern,
    ) -> (Vec<AnnotationCollection>, Result<(), AnnotationError>) {
        let annotator = ImageAnnotator { pattern, image };
        let mut roots = vec![AnnotationCollection::new(); image.len()];
        let result = annotator.annotate_codeplug(&mut roots);
        (roots, result)
    }

    fn annotate_codeplug(&self, roots: &mut [AnnotationCollection]) -> Result<(), AnnotationError> {
        let pattern = self.pattern;
        let root = pattern.root();
        if !matches!(pattern.kind(root), Some(PatternKind::Codeplug { .. })) {
            return Err(AnnotationError::NotACodeplug(root));
        }

        for &child in pattern.children(root) {
            let Some(node) = pattern.get(child) else {
                continue;
            };
            let address = node
                .address()
                .ok_or_else(|| AnnotationError::MissingAddress(node.meta().name.clone()))?;

            let result = match node.kind() {
                PatternKind::Repeat { .. } => self.annotate_repeat(roots, child, address).map(|_| ()),
                PatternKind::BlockRepeat { min, .. } => match self.image.find_index(address) {
                    None if *min > 0 => Err(self.missing_element(
                        roots,
                        AnnotationIssue::error(
                            address,
                            format!(
                                "Cannot annotate non-optional block-repeat pattern '{}': no element found for address {}.",
                                node.meta().name,
                                address
                            ),
                        ),
                    )),
                    None => {
                        debug!("Skip optional block-repeat '{}' at {}", node.meta().name, address);
                        Ok(())
                    }
                    Some(idx) => self.annotate_into(roots, idx, child, address),
                },
                kind if kind.is_block() => match self.image.find_index(address) {
                    None => Err(self.missing_element(
                        roots,
                        AnnotationIssue::error(
                            address,
                            format!(
                                "Cannot annotate block pattern '{}': no element found for address {}.",
                                node.meta().name,
                                address
                            ),
                        ),
                    )),
                    Some(idx) => self.annotate_into(roots, idx, child, address),
                },
                _ => Ok(()),
            };

            if let Err(issue) = result {
                warn!("At {}: {}", issue.address, issue.message);
                return Err(AnnotationError::Mismatch(issue));
            }
        }

        Ok(())
    }

    /// Attach an issue about an uncovered address to the collection of the
    /// closest element before it (or the first one)
    fn missing_element(
        &self,
        roots: &mut [AnnotationCollection],
        issue: AnnotationIssue,
    ) -> AnnotationIssue {
        let nearest = self
            .image
            .elements()
            .iter()
            .rposition(|el| el.address() <= issue.address)
            .unwrap_or(0);
        if let Some(root) = roots.get_mut(nearest) {
            root.add_issue(issue.clone());
        }
        issue
    }

    fn node(&self, id: PatternId, address: Address) -> Matched<&'a PatternNode> {
        self.pattern.get(id).ok_or_else(|| {
            AnnotationIssue::error(address, format!("Pattern {} does not exist.", id))
        })
    }

    fn name(&self, id: PatternId) -> &'a str {
        self.pattern
            .meta(id)
            .map(|m| m.name.as_str())
            .unwrap_or("")
    }

    /// Match a block pattern at `address` and add it to the element's root,
    /// even if it only matched partially
    fn annotate_into(
        &self,
        roots: &mut [AnnotationCollection],
        idx: usize,
        id: PatternId,
        address: Address,
    ) -> Matched<()> {
        let element = &self.image.elements()[idx];
        match self.annotate_block(element, id, address) {
            Ok(annotation) => {
                roots[idx].add(annotation);
                Ok(())
            }
            Err(partial) => Err(partial.record(&mut roots[idx])),
        }
    }

    /// Sparse repetition; returns the number of matched iterations
    fn annotate_repeat(
        &self,
        roots: &mut [AnnotationCollection],
        id: PatternId,
        address: Address,
    ) -> Matched<u32> {
        let node = self.node(id, address)?;
        let PatternKind::Repeat {
            step,
            min,
            max,
            child,
        } = node.kind()
        else {
            return Err(AnnotationIssue::error(
                address,
                format!("Pattern '{}' is not a repeat.", node.meta().name),
            ));
        };
        let child = child.ok_or_else(|| {
            AnnotationIssue::error(
                address,
                format!("Repeat '{}' has no sub-pattern.", node.meta().name),
            )
        })?;
        let child_is_repeat = matches!(self.pattern.kind(child), Some(PatternKind::Repeat { .. }));
        let min = min.unwrap_or(0);
        let max = max.unwrap_or(u32::MAX);
        let image_end = self.image.elements().last().map(Element::end);

        let mut addr = address;
        let mut count = 0;
        while count < max {
            let required = count < min;

            let result = if child_is_repeat {
                if !image_end.is_some_and(|end| addr < end) {
                    Ok(0)
                } else {
                    self.annotate_repeat(roots, child, addr)
                }
            } else {
                match self.image.find_index(addr) {
                    None => {
                        if required {
                            return Err(self.missing_element(
                                roots,
                                AnnotationIssue::error(
                                    addr,
                                    format!(
                                        "Cannot annotate block pattern '{}': no element found for address {}.",
                                        self.name(child),
                                        addr
                                    ),
                                ),
                            ));
                        }
                        break;
                    }
                    Some(idx) => {
                        let element = &self.image.elements()[idx];
                        match self.annotate_block(element, child, addr) {
                            Ok(annotation) => {
                                roots[idx].add(annotation);
                                Ok(1)
                            }
                            Err(partial) if required => Err(partial.record(&mut roots[idx])),
                            Err(partial) => Err(partial.issue),
                        }
                    }
                }
            };

            match result {
                Ok(0) if !required => break,
                Ok(_) => {}
                Err(issue) if required => {
                    warn!(
                        "Cannot annotate pattern '{}': minimum repetition not met.",
                        node.meta().name
                    );
                    return Err(issue);
                }
                Err(issue) => {
                    debug!(
                        "Repeat '{}' ends after {} iterations: {}",
                        node.meta().name,
                        count,
                        issue.message
                    );
                    if let Some(idx) = self.image.find_index(issue.address) {
                        roots[idx].add_issue(AnnotationIssue::note(issue.address, issue.message));
                    }
                    break;
                }
            }

            count += 1;
            addr = match addr + *step {
                Some(next) => next,
                None => break,
            };
        }

        debug!("Processed repeat pattern '{}' ({} iterations).", node.meta().name, count);
        Ok(count)
    }

    /// Match a block pattern within `element`
    fn annotate_block(
        &self,
        element: &Element,
        id: PatternId,
        address: Address,
    ) -> Result<Annotation, Partial> {
        let node = self.node(id, address)?;
        match node.kind() {
            PatternKind::BlockRepeat { min, max, child } => {
                let child = self.require_child(node, *child, address)?;
                let step = self.require_size(child, address)?;
                let end = element.end();
                let mut annotation = StructuredAnnotation::new(id, address);
                let mut addr = address;
                for i in 0..*max {
                    if addr >= end {
                        if i >= *min {
                            break;
                        }
                        let issue = AnnotationIssue::error(
                            addr,
                            format!(
                                "Minimum repetition {} of block repeat '{}' not reached.",
                                min,
                                node.meta().name
                            ),
                        );
                        return Err(Partial::fail(annotation, issue));
                    }
                    match self.annotate_block(element, child, addr) {
                        Ok(child) => annotation.add(child),
                        Err(partial) => return Err(partial.nest(annotation)),
                    }
                    addr += step;
                }
                Ok(Annotation::Structured(annotation))
            }

            PatternKind::FixedRepeat { n, child } => {
                let child = self.require_child(node, *child, address)?;
                let step = self.require_size(child, address)?;
                let end = element.end();
                let mut annotation = StructuredAnnotation::new(id, address);
                let mut addr = address;
                for _ in 0..*n {
                    if addr >= end {
                        let issue = AnnotationIssue::error(
                            addr,
                            format!(
                                "Repetition {} of fixed repeat '{}' not reached.",
                                n,
                                node.meta().name
                            ),
                        );
                        return Err(Partial::fail(annotation, issue));
                    }
                    match self.annotate_block(element, child, addr) {
                        Ok(child) => annotation.add(child),
                        Err(partial) => return Err(partial.nest(annotation)),
                    }
                    addr += step;
                }
                Ok(Annotation::Structured(annotation))
            }

            PatternKind::Element { children } => {
                let end = element.end();
                let mut annotation = StructuredAnnotation::new(id, address);
                let mut addr = address;
                for &child in children {
                    if addr >= end {
                        let issue = AnnotationIssue::error(
                            addr,
                            format!("Cannot match element '{}': end of data.", node.meta().name),
                        );
                        return Err(Partial::fail(annotation, issue));
                    }
                    let size = match self.require_size(child, addr) {
                        Ok(size) => size,
                        Err(issue) => return Err(Partial::fail(annotation, issue)),
                    };
                    match self.annotate_block(element, child, addr) {
                        Ok(child) => annotation.add(child),
                        Err(partial) => return Err(partial.nest(annotation)),
                    }
                    addr += size;
                }
                debug!("Processed pattern '{}' at {}.", node.meta().name, address);
                Ok(Annotation::Structured(annotation))
            }

            PatternKind::Field(field) => {
                let size = self.require_size(id, address)?;
                if address + size > element.end() {
                    return Err(Partial::from(AnnotationIssue::error(
                        address,
                        format!(
                            "Field '{}' at {} of size {} does not fit into element at {} of size {}.",
                            node.meta().name,
                            address,
                            size,
                            element.address(),
                            element.size()
                        ),
                    )));
                }
                let mut issues = Vec::new();
                let value = decode_field(node, field, element, address, size, &mut issues)?;
                Ok(Annotation::Field(FieldAnnotation {
                    pattern: id,
                    address,
                    size,
                    value,
                    issues,
                }))
            }

            PatternKind::Codeplug { .. } | PatternKind::Repeat { .. } => {
                Err(Partial::from(AnnotationIssue::error(
                    address,
                    format!("Pattern '{}' is not a block pattern.", node.meta().name),
                )))
            }
        }
    }

    fn require_child(
        &self,
        node: &PatternNode,
        child: Option<PatternId>,
        address: Address,
    ) -> Matched<PatternId> {
        child.ok_or_else(|| {
            AnnotationIssue::error(
                address,
                format!("Pattern '{}' has no sub-pattern.", node.meta().name),
            )
        })
    }

    fn require_size(&self, id: PatternId, address: Address) -> Matched<Size> {
        self.pattern
            .size(id)
            .filter(|s| !s.is_zero())
            .ok_or_else(|| {
                AnnotationIssue::error(
                    address,
                    format!("Pattern '{}' has no size.", self.name(id)),
                )
            })
    }
}

/// Bytes of the field, starting at the byte containing `address`
fn field_bytes<'e>(element: &'e Element, address: Address, size: Size) -> Matched<&'e [u8]> {
    let len = size.byte_len() as usize;
    element
        .data_at(address)
        .filter(|d| d.len() >= len)
        .map(|d| &d[..len])
        .ok_or_else(|| AnnotationIssue::error(address, "Field exceeds element data."))
}

fn decode_field(
    node: &PatternNode,
    field: &FieldPattern,
    element: &Element,
    address: Address,
    size: Size,
    issues: &mut Vec<AnnotationIssue>,
) -> Matched<FieldValue> {
    let name = node.meta().name.as_str();
    match field {
        FieldPattern::Unknown => Ok(FieldValue::Unknown(
            field_bytes(element, address, size)?.to_vec(),
        )),
        FieldPattern::Unused { content } => {
            let bytes = field_bytes(element, address, size)?.to_vec();
            if !content.is_empty() && bytes != *content {
                issues.push(AnnotationIssue::note(
                    address,
                    format!("Unused data '{}' differs from expected content.", name),
                ));
            }
            Ok(FieldValue::Unused(bytes))
        }
        FieldPattern::Integer(int) => decode_integer(name, int, element, address, size, issues),
        FieldPattern::Enum(e) => {
            let bits = u32::try_from(size.bits()).unwrap_or(u32::MAX);
            if bits > 8 {
                return Err(AnnotationIssue::error(
                    address,
                    format!("Cannot decode enum '{}': wider than 8 bits.", name),
                ));
            }
            let value = extract_small(name, element, address, bits)? as u32;
            let item = e.item_by_value(value);
            if item.is_none() {
                issues.push(AnnotationIssue::warning(
                    address,
                    format!("Unknown value {} of enum '{}'.", value, name),
                ));
            }
            Ok(FieldValue::Enum {
                value,
                name: item.map(|i| i.meta.name.clone()),
            })
        }
        FieldPattern::String(s) => decode_string(name, s, element, address, size, issues),
    }
}

/// Bit window of at most 8 bits within the byte containing `address`
fn extract_small(name: &str, element: &Element, address: Address, bits: u32) -> Matched<u64> {
    let bit = u32::from(address.bit());
    if bit + 1 < bits {
        return Err(AnnotationIssue::error(
            address,
            format!("Cannot decode '{}': bit pattern extends across bytes.", name),
        ));
    }
    let byte = field_bytes(element, address, Size::from_bits(1))?[0];
    let shift = bit + 1 - bits;
    let mask = (1u64 << bits) - 1;
    Ok((u64::from(byte) >> shift) & mask)
}

fn decode_integer(
    name: &str,
    int: &IntegerField,
    element: &Element,
    address: Address,
    size: Size,
    issues: &mut Vec<AnnotationIssue>,
) -> Matched<FieldValue> {
    let bits = u32::try_from(size.bits()).unwrap_or(u32::MAX);
    if bits == 0 || bits > 32 {
        return Err(AnnotationIssue::error(
            address,
            format!("Cannot decode integer '{}' of {} bits.", name, bits),
        ));
    }

    let raw = if bits <= 8 {
        extract_small(name, element, address, bits)?
    } else {
        if !address.is_byte_aligned() {
            return Err(AnnotationIssue::error(
                address,
                format!("Cannot decode integer '{}': not aligned with bytes.", name),
            ));
        }
        let bytes = field_bytes(element, address, size)?;
        let value = match int.endian {
            Endian::Big => bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
            Endian::Little => bytes.iter().rev().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)),
        };
        value & ((1u64 << bits) - 1)
    };

    let value = match int.format {
        IntegerFormat::Unsigned => raw as i64,
        IntegerFormat::Signed => {
            if raw & (1u64 << (bits - 1)) != 0 {
                raw as i64 - (1i64 << bits)
            } else {
                raw as i64
            }
        }
        IntegerFormat::Bcd => {
            let digits = bits.div_ceil(4);
            let mut value = 0i64;
            for i in (0..digits).rev() {
                let nibble = ((raw >> (4 * i)) & 0xf) as i64;
                if nibble > 9 {
                    issues.push(AnnotationIssue::warning(
                        address,
                        format!("Invalid BCD digit {:x} in '{}'.", nibble, name),
                    ));
                }
                value = value * 10 + nibble;
            }
            value
        }
    };

    if let Some(min) = int.min.filter(|min| value < *min) {
        issues.push(AnnotationIssue::warning(
            address,
            format!("Value {} of '{}' below minimum {}.", value, name, min),
        ));
    }
    if let Some(max) = int.max.filter(|max| value > *max) {
        issues.push(AnnotationIssue::warning(
            address,
            format!("Value {} of '{}' above maximum {}.", value, name, max),
        ));
    }

    Ok(FieldValue::Integer(value))
}

fn decode_string(
    name: &str,
    field: &StringField,
    element: &Element,
    address: Address,
    size: Size,
    issues: &mut Vec<AnnotationIssue>,
) -> Matched<FieldValue> {
    if !address.is_byte_aligned() {
        return Err(AnnotationIssue::error(
            address,
            format!("Cannot decode string '{}': not aligned with bytes.", name),
        ));
    }
    let bytes = field_bytes(element, address, size)?;
    let text = match field.format {
        StringFormat::Ascii => {
            let chars: Vec<u8> = bytes
                .iter()
                .copied()
                .take(field.num_chars as usize)
                .take_while(|b| *b != field.pad)
                .collect();
            if chars.iter().any(|b| !(32..=126).contains(b)) {
                issues.push(AnnotationIssue::warning(
                    address,
                    format!("String '{}' contains non-printable characters.", name),
                ));
            }
            chars.iter().map(|b| char::from(*b)).collect()
        }
        StringFormat::Unicode => {
            let units: Vec<u16> = bytes
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .take(field.num_chars as usize)
                .take_while(|u| *u != u16::from(field.pad))
                .collect();
            String::from_utf16_lossy(&units)
        }
    };
    Ok(FieldValue::String(text))
}
