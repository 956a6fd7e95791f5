//! Structural difference between two images
//!
//! Elements are paired by start address in a single merge pass over both
//! (sorted) element lists. Paired elements with differing content are
//! compared byte by byte at equal positions; this is deliberately a
//! positional compare and not an alignment-seeking edit script, so
//! offsets in a [`ByteDifference`] always refer to the same position in
//! both elements.

use std::cmp::Ordering;
use std::fmt;

use crate::address::Address;
use crate::image::{Element, Image};

/// Change within a pair of elements at the same address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ByteDifference {
    /// Byte at `offset` changed
    Modify { offset: usize, from: u8, to: u8 },
    /// Bytes present only in the second element, starting at `offset`
    Add { offset: usize, bytes: Vec<u8> },
    /// Bytes present only in the first element, starting at `offset`
    Remove { offset: usize, bytes: Vec<u8> },
}

impl ByteDifference {
    /// Byte offset relative to the element start
    pub fn offset(&self) -> usize {
        match self {
            ByteDifference::Modify { offset, .. }
            | ByteDifference::Add { offset, .. }
            | ByteDifference::Remove { offset, .. } => *offset,
        }
    }
}

/// Change of a whole element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementDifference {
    /// Element only present in the second image
    Added { address: Address, data: Vec<u8> },
    /// Element only present in the first image
    Removed { address: Address, data: Vec<u8> },
    /// Element present in both with differing content
    Modified {
        address: Address,
        changes: Vec<ByteDifference>,
    },
}

impl ElementDifference {
    pub fn address(&self) -> Address {
        match self {
            ElementDifference::Added { address, .. }
            | ElementDifference::Removed { address, .. }
            | ElementDifference::Modified { address, .. } => *address,
        }
    }

    pub fn is_added(&self) -> bool {
        matches!(self, ElementDifference::Added { .. })
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, ElementDifference::Removed { .. })
    }

    pub fn is_modified(&self) -> bool {
        matches!(self, ElementDifference::Modified { .. })
    }
}

/// Difference between image A and image B
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ImageDifference {
    differences: Vec<ElementDifference>,
}

impl ImageDifference {
    /// Compute the difference from `a` to `b`
    pub fn new(a: &Image, b: &Image) -> Self {
        let (ea, eb) = (a.elements(), b.elements());
        let (mut i, mut j) = (0, 0);
        let mut differences = Vec::new();

        while i < ea.len() && j < eb.len() {
            match ea[i].address().cmp(&eb[j].address()) {
                Ordering::Less => {
                    differences.push(removed(&ea[i]));
                    i += 1;
                }
                Ordering::Greater => {
                    differences.push(added(&eb[j]));
                    j += 1;
                }
                Ordering::Equal => {
                    if ea[i].data() != eb[j].data() {
                        differences.push(ElementDifference::Modified {
                            address: ea[i].address(),
                            changes: diff_bytes(ea[i].data(), eb[j].data()),
                        });
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        differences.extend(ea[i..].iter().map(removed));
        differences.extend(eb[j..].iter().map(added));

        Self { differences }
    }

    pub fn differences(&self) -> &[ElementDifference] {
        &self.differences
    }

    pub fn len(&self) -> usize {
        self.differences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.differences.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ElementDifference> {
        self.differences.iter()
    }

    pub fn added_count(&self) -> usize {
        self.differences.iter().filter(|d| d.is_added()).count()
    }

    pub fn removed_count(&self) -> usize {
        self.differences.iter().filter(|d| d.is_removed()).count()
    }

    pub fn modified_count(&self) -> usize {
        self.differences.iter().filter(|d| d.is_modified()).count()
    }
}

fn added(el: &Element) -> ElementDifference {
    ElementDifference::Added {
        address: el.address(),
        data: el.data().to_vec(),
    }
}

fn removed(el: &Element) -> ElementDifference {
    ElementDifference::Removed {
        address: el.address(),
        data: el.data().to_vec(),
    }
}

/// Positional byte compare; the longer tail becomes a single add/remove
fn diff_bytes(a: &[u8], b: &[u8]) -> Vec<ByteDifference> {
    let common = a.len().min(b.len());
    let mut changes: Vec<ByteDifference> = a[..common]
        .iter()
        .zip(&b[..common])
        .enumerate()
        .filter(|(_, (x, y))| x != y)
        .map(|(offset, (&from, &to))| ByteDifference::Modify { offset, from, to })
        .collect();

    if a.len() > common {
        changes.push(ByteDifference::Remove {
            offset: common,
            bytes: a[common..].to_vec(),
        });
    } else if b.len() > common {
        changes.push(ByteDifference::Add {
            offset: common,
            bytes: b[common..].to_vec(),
        });
    }
    changes
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

impl fmt::Display for ImageDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diff in &self.differences {
            match diff {
                ElementDifference::Added { address, data } => {
                    write!(f, "+ {} ({} bytes): ", address, data.len())?;
                    write_hex(f, data)?;
                    writeln!(f)?;
                }
                ElementDifference::Removed { address, data } => {
                    write!(f, "- {} ({} bytes): ", address, data.len())?;
                    write_hex(f, data)?;
                    writeln!(f)?;
                }
                ElementDifference::Modified { address, changes } => {
                    writeln!(f, "~ {}:", address)?;
                    for change in changes {
                        match change {
                            ByteDifference::Modify { offset, from, to } => {
                                writeln!(f, "  +{:x}h: {:02x} -> {:02x}", offset, from, to)?;
                            }
                            ByteDifference::Add { offset, bytes } => {
                                write!(f, "  +{:x}h: + ", offset)?;
                                write_hex(f, bytes)?;
                                writeln!(f)?;
                            }
                            ByteDifference::Remove { offset, bytes } => {
                                write!(f, "  +{:x}h: - ", offset)?;
                                write_hex(f, bytes)?;
                                writeln!(f)?;
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
