//! Read-only memory of an emulated radio
//!
//! The CPS reads identification and calibration data before it writes a
//! codeplug. A [`ModelRom`] holds those bytes as sorted, non-overlapping
//! segments. Captured writes never touch it.

use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

use crate::catalog::HexBytes;

/// Contiguous run of ROM content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub address: u32,
    pub content: Vec<u8>,
}

impl Segment {
    /// Exclusive end address, widened so segments at the top of the address
    /// space do not wrap
    pub fn end(&self) -> u64 {
        u64::from(self.address) + self.content.len() as u64
    }

    /// Whether `len` bytes from `address` lie within this segment
    pub fn contains(&self, address: u32, len: usize) -> bool {
        self.address <= address && u64::from(address) + len as u64 <= self.end()
    }
}

/// Sparse ROM image made of sorted, disjoint, non-adjacent segments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<RomEntry>", into = "Vec<RomEntry>")]
pub struct ModelRom {
    segments: Vec<Segment>,
}

/// Serialized form of one segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RomEntry {
    pub address: u32,
    pub data: HexBytes,
}

impl ModelRom {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Store `data` at `address`, overwriting existing content and joining
    /// every segment it overlaps or touches
    pub fn write(&mut self, address: u32, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        let start = u64::from(address);
        let end = start + data.len() as u64;

        // First segment ending at or after `start`, last one starting at or before `end`.
        let first = self.segments.partition_point(|s| s.end() < start);
        let last = self.segments.partition_point(|s| u64::from(s.address) <= end);

        if first == last {
            self.segments.insert(
                first,
                Segment {
                    address,
                    content: data.to_vec(),
                },
            );
            return;
        }

        let merged_start = start.min(u64::from(self.segments[first].address));
        let merged_end = end.max(self.segments[last - 1].end());
        let mut content = vec![0u8; (merged_end - merged_start) as usize];
        for segment in self.segments.drain(first..last) {
            let offset = (u64::from(segment.address) - merged_start) as usize;
            content[offset..offset + segment.content.len()].copy_from_slice(&segment.content);
        }
        let offset = (start - merged_start) as usize;
        content[offset..offset + data.len()].copy_from_slice(data);

        self.segments.insert(
            first,
            Segment {
                address: merged_start as u32,
                content,
            },
        );
    }

    /// Read `len` bytes from `address`; `None` unless a single segment holds
    /// the whole range
    pub fn read(&self, address: u32, len: usize) -> Option<Vec<u8>> {
        let idx = self
            .segments
            .partition_point(|s| s.address <= address)
            .checked_sub(1)?;
        let segment = &self.segments[idx];
        if !segment.contains(address, len) {
            return None;
        }
        let offset = (address - segment.address) as usize;
        Some(segment.content[offset..offset + len].to_vec())
    }

    /// Overlay all content of `other` onto this ROM
    pub fn merge(&mut self, other: &ModelRom) {
        for segment in &other.segments {
            self.write(segment.address, &segment.content);
        }
    }

    /// This ROM with `other` overlaid
    pub fn merged(&self, other: &ModelRom) -> ModelRom {
        let mut rom = self.clone();
        rom.merge(other);
        rom
    }
}

impl AddAssign<&ModelRom> for ModelRom {
    fn add_assign(&mut self, rhs: &ModelRom) {
        self.merge(rhs);
    }
}

impl From<Vec<RomEntry>> for ModelRom {
    fn from(entries: Vec<RomEntry>) -> Self {
        let mut rom = ModelRom::new();
        for entry in entries {
            rom.write(entry.address, &entry.data.0);
        }
        rom
    }
}

impl From<ModelRom> for Vec<RomEntry> {
    fn from(rom: ModelRom) -> Self {
        rom.segments
            .into_iter()
            .map(|s| RomEntry {
                address: s.address,
                data: HexBytes(s.content),
            })
            .collect()
    }
}
