//! Sparse memory images built from captured writes
//!
//! An [`Image`] is an address-sorted sequence of non-overlapping
//! [`Element`]s, each a contiguous run of bytes. Writes arriving in order
//! grow the last element in place; writes elsewhere open a new element.

use std::fmt;

use tracing::debug;

use crate::address::{Address, Size};
use crate::annotation::{AnnotationCollection, ImageAnnotator};
use crate::error::AnnotationError;
use crate::pattern::CodeplugPattern;

/// A contiguous run of captured bytes
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    /// Byte-aligned start address
    address: Address,
    /// Captured content
    data: Vec<u8>,
    /// Decoded annotation tree, if the owning image was annotated
    annotations: Option<AnnotationCollection>,
}

impl Element {
    /// Create an element holding `data` at the byte address `address`
    pub fn new(address: Address, data: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            data: data.into(),
            annotations: None,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of bytes held
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn size(&self) -> Size {
        Size::from_bytes(self.data.len() as u64)
    }

    /// First address past the element
    pub fn end(&self) -> Address {
        self.address + self.size()
    }

    /// Whether `[address, address+size)` lies within the element
    pub fn contains(&self, address: Address, size: Size) -> bool {
        address >= self.address && (address + size) <= self.end()
    }

    /// Whether `address` lies within the element
    pub fn contains_address(&self, address: Address) -> bool {
        address >= self.address && address < self.end()
    }

    /// Whether `address` is exactly the end of the element
    pub fn extends(&self, address: Address) -> bool {
        self.end() == address
    }

    /// Bytes from the byte containing `address` up to the end
    pub fn data_at(&self, address: Address) -> Option<&[u8]> {
        if !self.contains_address(address) {
            return None;
        }
        let start = (address.byte() - self.address.byte()) as usize;
        Some(&self.data[start..])
    }

    /// Grow the element at its end
    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
        self.annotations = None;
    }

    /// Write `bytes` at `address`, overwriting what is covered and growing
    /// past the end. `address` must lie within or right at the end.
    fn write(&mut self, address: Address, bytes: &[u8]) {
        let start = (address.byte() - self.address.byte()) as usize;
        let overlap = self.data.len().saturating_sub(start).min(bytes.len());
        self.data[start..start + overlap].copy_from_slice(&bytes[..overlap]);
        self.data.extend_from_slice(&bytes[overlap..]);
        self.annotations = None;
    }

    pub fn annotations(&self) -> Option<&AnnotationCollection> {
        self.annotations.as_ref()
    }

    pub fn set_annotations(&mut self, annotations: AnnotationCollection) {
        self.annotations = Some(annotations);
    }

    pub fn clear_annotations(&mut self) {
        self.annotations = None;
    }
}

/// A captured memory image
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Image {
    label: String,
    elements: Vec<Element>,
}

impl Image {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            elements: Vec::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Total number of captured bits
    pub fn size(&self) -> Size {
        self.elements
            .iter()
            .fold(Size::zero(), |acc, el| acc + el.size())
    }

    pub fn element(&self, index: usize) -> Option<&Element> {
        self.elements.get(index)
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Element> {
        self.elements.iter()
    }

    /// Index at which an element starting at `address` would be inserted
    fn insertion_index(&self, address: Address) -> usize {
        self.elements.partition_point(|el| el.address() <= address)
    }

    /// Index of the element covering `address`
    pub fn find_index(&self, address: Address) -> Option<usize> {
        let idx = self.insertion_index(address);
        if idx == 0 {
            return None;
        }
        self.elements[idx - 1]
            .contains_address(address)
            .then_some(idx - 1)
    }

    /// Element covering `address`
    pub fn find(&self, address: Address) -> Option<&Element> {
        self.find_index(address).map(|i| &self.elements[i])
    }

    /// Bytes starting at the byte containing `address`
    pub fn data(&self, address: Address) -> Option<&[u8]> {
        self.find(address).and_then(|el| el.data_at(address))
    }

    /// Append `bytes` at the byte address `address`.
    ///
    /// Extends the preceding element in place when `address` continues it,
    /// otherwise inserts a new element. Elements that end up touching are
    /// merged so the list stays sorted and non-overlapping.
    pub fn append(&mut self, address: Address, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        let idx = self.insertion_index(address);
        let target = if idx > 0 && self.elements[idx - 1].end() >= address {
            let el = &mut self.elements[idx - 1];
            if el.extends(address) {
                el.append(bytes);
            } else {
                el.write(address, bytes);
            }
            idx - 1
        } else {
            debug!("New element at {} in image '{}'", address, self.label);
            self.elements.insert(idx, Element::new(address, bytes));
            idx
        };

        self.coalesce(target);
    }

    /// Merge the elements following `index` into it while they touch
    fn coalesce(&mut self, index: usize) {
        while index + 1 < self.elements.len()
            && self.elements[index].end() >= self.elements[index + 1].address()
        {
            let next = self.elements.remove(index + 1);
            let current = &mut self.elements[index];
            let overlap = (current.end().byte() - next.address().byte()) as usize;
            if overlap < next.len() {
                current.append(&next.data()[overlap..]);
            }
        }
    }

    /// Annotate the image with `pattern`, replacing earlier annotations.
    ///
    /// On failure the elements keep whatever matched before the error, with
    /// the error issue attached; elements the match never reached stay
    /// unannotated.
    pub fn annotate(&mut self, pattern: &CodeplugPattern) -> Result<(), AnnotationError> {
        for el in &mut self.elements {
            el.clear_annotations();
        }
        let (roots, result) = ImageAnnotator::annotate_partial(self, pattern);
        let failed = result.is_err();
        for (el, root) in self.elements.iter_mut().zip(roots) {
            if failed && root.is_empty() && root.issues().is_empty() {
                continue;
            }
            el.set_annotations(root);
        }
        result
    }

    pub fn clear_annotations(&mut self) {
        for el in &mut self.elements {
            el.clear_annotations();
        }
    }

    /// Whether every element carries an annotation tree
    pub fn is_annotated(&self) -> bool {
        !self.elements.is_empty() && self.elements.iter().all(|el| el.annotations.is_some())
    }
}

impl<'a> IntoIterator for &'a Image {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} elements, {} bytes)",
            self.label,
            self.elements.len(),
            self.size().byte()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(byte: u64) -> Address {
        Address::from_byte(byte)
    }

    #[test]
    fn test_append_extends_last_element() {
        let mut image = Image::new("test");
        image.append(addr(0x10), &[1, 2]);
        image.append(addr(0x12), &[3, 4]);
        assert_eq!(image.len(), 1);
        assert_eq!(image.element(0).unwrap().data(), &[1, 2, 3, 4]);
        assert_eq!(image.size(), Size::from_bytes(4));
    }

    #[test]
    fn test_append_disjoint_creates_sorted_elements() {
        let mut image = Image::new("test");
        image.append(addr(0x100), &[1]);
        image.append(addr(0x10), &[2]);
        image.append(addr(0x50), &[3]);
        assert_eq!(image.len(), 3);
        let starts: Vec<_> = image.iter().map(|e| e.address()).collect();
        assert_eq!(starts, vec![addr(0x10), addr(0x50), addr(0x100)]);
    }

    #[test]
    fn test_append_bridges_gap() {
        let mut image = Image::new("test");
        image.append(addr(0), &[1, 2]);
        image.append(addr(4), &[5, 6]);
        image.append(addr(2), &[3, 4]);
        assert_eq!(image.len(), 1);
        assert_eq!(image.element(0).unwrap().data(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_append_overwrites_overlap() {
        let mut image = Image::new("test");
        image.append(addr(0), &[1, 2, 3, 4]);
        image.append(addr(2), &[9, 9, 9]);
        assert_eq!(image.len(), 1);
        assert_eq!(image.element(0).unwrap().data(), &[1, 2, 9, 9, 9]);
    }

    #[test]
    fn test_find_and_data() {
        let mut image = Image::new("test");
        image.append(addr(0x10), &[0xaa, 0xbb, 0xcc]);
        assert!(image.find(addr(0x0f)).is_none());
        assert!(image.find(addr(0x13)).is_none());
        assert_eq!(image.find_index(addr(0x12)), Some(0));
        assert_eq!(image.data(addr(0x11)).unwrap(), &[0xbb, 0xcc]);
        assert_eq!(
            image.data(Address::new(0x11, 3).unwrap()).unwrap(),
            &[0xbb, 0xcc]
        );
    }

    #[test]
    fn test_element_contains() {
        let el = Element::new(addr(4), vec![0; 4]);
        assert!(el.contains(addr(4), Size::from_bytes(4)));
        assert!(!el.contains(addr(5), Size::from_bytes(4)));
        assert!(el.contains(Address::new(7, 0).unwrap(), Size::from_bits(1)));
        assert!(el.extends(addr(8)));
        assert!(!el.contains_address(addr(8)));
    }

    proptest! {
        #[test]
        fn prop_elements_stay_sorted_and_disjoint(
            writes in proptest::collection::vec((0u64..512, proptest::collection::vec(any::<u8>(), 1..16)), 1..40)
        ) {
            let mut image = Image::new("prop");
            let mut total = std::collections::BTreeSet::new();
            for (a, bytes) in &writes {
                image.append(addr(*a), bytes);
                for i in 0..bytes.len() as u64 {
                    total.insert(a + i);
                }
            }
            for pair in image.elements().windows(2) {
                prop_assert!(pair[0].end() < pair[1].address());
            }
            prop_assert_eq!(image.size().byte(), total.len() as u64);
        }

        #[test]
        fn prop_append_at_end_keeps_count(len in 1usize..32, extra in 1usize..32) {
            let mut image = Image::new("prop");
            image.append(addr(0x40), &vec![0u8; len]);
            image.append(addr(0x1000), &[1]);
            let count = image.len();
            let size = image.size();
            let end = image.element(0).unwrap().end();
            image.append(end, &vec![0xffu8; extra]);
            prop_assert_eq!(image.len(), count);
            prop_assert_eq!(image.size(), size + Size::from_bytes(extra as u64));
        }
    }
}
