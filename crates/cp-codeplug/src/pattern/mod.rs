//! Binary pattern schema
//!
//! A [`CodeplugPattern`] is a tree describing, in bits, how a memory image
//! is laid out. The tree owns its nodes in an arena; nodes are addressed by
//! [`PatternId`] handles, which is also how annotations refer back to the
//! pattern that produced them.
//!
//! # Node kinds
//!
//! | kind | placement | size |
//! |------|-----------|------|
//! | `Codeplug` | root, children at explicit addresses | - |
//! | `Repeat` | one child replayed every `step` | - |
//! | `BlockRepeat` | one fixed child packed back-to-back, `min..=max` times | - |
//! | `FixedRepeat` | one fixed child, exactly `n` times | `n × child` |
//! | `Element` | fixed children in sequence | `Σ children` |
//! | `Field` | leaf | explicit or derived |
//!
//! Children of everything but the root carry *implicit* addresses relative
//! to their parent; the tree computes them when a child is attached and
//! whenever a sibling is resized, inserted or removed.
//!
//! # Example
//! ```rust
//! use cp_codeplug::pattern::{CodeplugPattern, PatternNode, IntegerFormat, Endian};
//! use cp_codeplug::{Address, Size};
//!
//! let mut pattern = CodeplugPattern::new();
//! let element = pattern.create(PatternNode::element().named("Settings").at(Address::from_byte(0x100)));
//! let a = pattern.create(PatternNode::integer(8, IntegerFormat::Unsigned, Endian::Little).named("Volume"));
//! let b = pattern.create(PatternNode::unknown(Size::from_bytes(3)).named("Reserved"));
//! pattern.add_child(element, a).unwrap();
//! pattern.add_child(element, b).unwrap();
//! pattern.add_child(pattern.root(), element).unwrap();
//!
//! assert_eq!(pattern.size(element), Some(Size::from_bytes(4)));
//! assert_eq!(pattern.address(b), Some(Address::from_byte(1)));
//! assert!(pattern.verify());
//! ```

pub mod field;
pub mod meta;

use std::fmt;

use tracing::debug;

use crate::address::{Address, Offset, Size};
use crate::error::PatternError;

pub use field::{
    EnumField, EnumItem, Endian, FieldPattern, IntegerField, IntegerFormat, StringField,
    StringFormat,
};
pub use meta::{MetaFlags, PatternMeta};

/// Handle of a node within a [`CodeplugPattern`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatternId(pub u32);

impl fmt::Display for PatternId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Node kind with its kind-specific data
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternKind {
    /// Root: sparse group of children at explicit addresses
    Codeplug { children: Vec<PatternId> },
    /// Sparse repetition of one child every `step`
    Repeat {
        step: Offset,
        min: Option<u32>,
        max: Option<u32>,
        child: Option<PatternId>,
    },
    /// Dense repetition of one fixed child, count bounded by the element
    BlockRepeat {
        min: u32,
        max: u32,
        child: Option<PatternId>,
    },
    /// Dense repetition of one fixed child, exactly `n` times
    FixedRepeat { n: u32, child: Option<PatternId> },
    /// Dense sequence of fixed children
    Element { children: Vec<PatternId> },
    /// Leaf
    Field(FieldPattern),
}

impl PatternKind {
    /// Whether the node can hold children
    pub fn is_structured(&self) -> bool {
        !matches!(self, PatternKind::Field(_))
    }

    /// Whether the node has a fixed footprint
    pub fn is_fixed(&self) -> bool {
        matches!(
            self,
            PatternKind::FixedRepeat { .. } | PatternKind::Element { .. } | PatternKind::Field(_)
        )
    }

    /// Whether the node can be matched within a single image element
    pub fn is_block(&self) -> bool {
        self.is_fixed() || matches!(self, PatternKind::BlockRepeat { .. })
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            PatternKind::Codeplug { .. } => "codeplug",
            PatternKind::Repeat { .. } => "repeat",
            PatternKind::BlockRepeat { .. } => "block-repeat",
            PatternKind::FixedRepeat { .. } => "fixed-repeat",
            PatternKind::Element { .. } => "element",
            PatternKind::Field(f) => f.kind_name(),
        }
    }

    /// Child handles in order
    pub fn children(&self) -> &[PatternId] {
        match self {
            PatternKind::Codeplug { children } | PatternKind::Element { children } => children,
            PatternKind::Repeat { child, .. }
            | PatternKind::BlockRepeat { child, .. }
            | PatternKind::FixedRepeat { child, .. } => child.as_slice(),
            PatternKind::Field(_) => &[],
        }
    }

    pub fn field(&self) -> Option<&FieldPattern> {
        match self {
            PatternKind::Field(f) => Some(f),
            _ => None,
        }
    }

    fn clear_children(&mut self) {
        match self {
            PatternKind::Codeplug { children } | PatternKind::Element { children } => {
                children.clear()
            }
            PatternKind::Repeat { child, .. }
            | PatternKind::BlockRepeat { child, .. }
            | PatternKind::FixedRepeat { child, .. } => *child = None,
            PatternKind::Field(_) => {}
        }
    }
}

/// A node of the pattern tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternNode {
    meta: PatternMeta,
    address: Option<Address>,
    size: Option<Size>,
    parent: Option<PatternId>,
    kind: PatternKind,
}

impl PatternNode {
    /// Detached node of the given kind, without address or size
    pub fn new(kind: PatternKind) -> Self {
        Self {
            meta: PatternMeta::default(),
            address: None,
            size: None,
            parent: None,
            kind,
        }
    }

    pub fn codeplug() -> Self {
        Self::new(PatternKind::Codeplug {
            children: Vec::new(),
        })
    }

    pub fn repeat(step: Offset, min: Option<u32>, max: Option<u32>) -> Self {
        Self::new(PatternKind::Repeat {
            step,
            min,
            max,
            child: None,
        })
    }

    pub fn block_repeat(min: u32, max: u32) -> Self {
        Self::new(PatternKind::BlockRepeat {
            min,
            max,
            child: None,
        })
    }

    pub fn fixed_repeat(n: u32) -> Self {
        Self::new(PatternKind::FixedRepeat { n, child: None })
    }

    pub fn element() -> Self {
        Self::new(PatternKind::Element {
            children: Vec::new(),
        })
        .sized(Size::zero())
    }

    pub fn unknown(size: Size) -> Self {
        Self::new(PatternKind::Field(FieldPattern::Unknown)).sized(size)
    }

    /// Unused bytes; sized from the expected content
    pub fn unused(content: Vec<u8>) -> Self {
        let size = Size::from_bytes(content.len() as u64);
        Self::new(PatternKind::Field(FieldPattern::Unused { content })).sized(size)
    }

    pub fn integer(width: u32, format: IntegerFormat, endian: Endian) -> Self {
        Self::integer_field(width, IntegerField::new(format, endian))
    }

    pub fn integer_field(width: u32, field: IntegerField) -> Self {
        Self::new(PatternKind::Field(FieldPattern::Integer(field)))
            .sized(Size::from_bits(u64::from(width)))
    }

    pub fn enumeration(width: u32, field: EnumField) -> Self {
        Self::new(PatternKind::Field(FieldPattern::Enum(field)))
            .sized(Size::from_bits(u64::from(width)))
    }

    pub fn string(field: StringField) -> Self {
        let size = Size::from_bytes(field.byte_len());
        Self::new(PatternKind::Field(FieldPattern::String(field))).sized(size)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.meta.name = name.into();
        self
    }

    pub fn with_meta(mut self, meta: PatternMeta) -> Self {
        self.meta = meta;
        self
    }

    pub fn at(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }

    pub fn sized(mut self, size: Size) -> Self {
        self.size = Some(size);
        self
    }

    pub fn meta(&self) -> &PatternMeta {
        &self.meta
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn size(&self) -> Option<Size> {
        self.size
    }

    pub fn parent(&self) -> Option<PatternId> {
        self.parent
    }

    pub fn kind(&self) -> &PatternKind {
        &self.kind
    }

    pub fn children(&self) -> &[PatternId] {
        self.kind.children()
    }

    pub fn field(&self) -> Option<&FieldPattern> {
        self.kind.field()
    }

    pub fn is_fixed(&self) -> bool {
        self.kind.is_fixed()
    }
}

/// Arena-owned pattern tree rooted at a `Codeplug` node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeplugPattern {
    nodes: Vec<Option<PatternNode>>,
    root: PatternId,
}

impl Default for CodeplugPattern {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeplugPattern {
    /// Empty codeplug
    pub fn new() -> Self {
        Self::with_meta(PatternMeta::new("Codeplug"))
    }

    pub fn with_meta(meta: PatternMeta) -> Self {
        Self {
            nodes: vec![Some(PatternNode::codeplug().with_meta(meta))],
            root: PatternId(0),
        }
    }

    pub fn root(&self) -> PatternId {
        self.root
    }

    pub fn get(&self, id: PatternId) -> Option<&PatternNode> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn node(&self, id: PatternId) -> Result<&PatternNode, PatternError> {
        self.get(id).ok_or(PatternError::UnknownPattern(id))
    }

    fn node_mut(&mut self, id: PatternId) -> Result<&mut PatternNode, PatternError> {
        self.nodes
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(PatternError::UnknownPattern(id))
    }

    /// Whether `id` refers to a live node
    pub fn contains(&self, id: PatternId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live nodes
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.children(self.root).is_empty()
    }

    /// Move a node into the arena, detached. Children listed in `node`
    /// are ignored; attach them with [`add_child`](Self::add_child).
    pub fn create(&mut self, mut node: PatternNode) -> PatternId {
        node.parent = None;
        node.kind.clear_children();
        let id = PatternId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }

    pub fn meta(&self, id: PatternId) -> Option<&PatternMeta> {
        self.get(id).map(|n| &n.meta)
    }

    pub fn meta_mut(&mut self, id: PatternId) -> Option<&mut PatternMeta> {
        self.node_mut(id).ok().map(|n| &mut n.meta)
    }

    pub fn address(&self, id: PatternId) -> Option<Address> {
        self.get(id).and_then(|n| n.address)
    }

    pub fn size(&self, id: PatternId) -> Option<Size> {
        self.get(id).and_then(|n| n.size)
    }

    pub fn parent(&self, id: PatternId) -> Option<PatternId> {
        self.get(id).and_then(|n| n.parent)
    }

    pub fn kind(&self, id: PatternId) -> Option<&PatternKind> {
        self.get(id).map(|n| &n.kind)
    }

    pub fn children(&self, id: PatternId) -> &[PatternId] {
        self.get(id).map(|n| n.children()).unwrap_or(&[])
    }

    pub fn child_at(&self, id: PatternId, index: usize) -> Option<PatternId> {
        self.children(id).get(index).copied()
    }

    pub fn index_of(&self, parent: PatternId, child: PatternId) -> Option<usize> {
        self.children(parent).iter().position(|c| *c == child)
    }

    /// Whether the node's address is computed from its parent
    pub fn has_implicit_address(&self, id: PatternId) -> bool {
        match self.parent(id) {
            Some(parent) => parent != self.root,
            None => false,
        }
    }

    /// Most severe review flag in the subtree
    pub fn combined_flags(&self, id: PatternId) -> MetaFlags {
        let Some(node) = self.get(id) else {
            return MetaFlags::None;
        };
        node.children()
            .iter()
            .fold(node.meta.flags, |acc, c| acc.combine(self.combined_flags(*c)))
    }

    /// Names from the root down to `id`
    pub fn path(&self, id: PatternId) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = Some(id);
        while let Some(cid) = current {
            let Some(node) = self.get(cid) else { break };
            path.push(node.meta.name.clone());
            current = node.parent;
        }
        path.reverse();
        path
    }

    /// Absolute address of a node: explicit addresses of the root's
    /// children plus the relative addresses below them. Repeats contribute
    /// their first iteration.
    pub fn absolute_address(&self, id: PatternId) -> Option<Address> {
        let node = self.get(id)?;
        let address = node.address?;
        match node.parent {
            Some(parent) if parent != self.root => {
                let base = self.absolute_address(parent)?;
                Some(base + Size::from_bits(address.bits()))
            }
            _ => Some(address),
        }
    }

    fn is_ancestor(&self, ancestor: PatternId, mut id: PatternId) -> bool {
        loop {
            if id == ancestor {
                return true;
            }
            match self.parent(id) {
                Some(p) => id = p,
                None => return false,
            }
        }
    }

    /// Attach the detached node `child` to `parent`
    pub fn add_child(&mut self, parent: PatternId, child: PatternId) -> Result<(), PatternError> {
        let index = self.children(parent).len();
        self.insert_child(parent, child, index)
    }

    /// Attach the detached node `child` to `parent` at position `index`.
    ///
    /// The root keeps its children sorted by address and ignores `index`.
    pub fn insert_child(
        &mut self,
        parent: PatternId,
        child: PatternId,
        index: usize,
    ) -> Result<(), PatternError> {
        let child_node = self.node(child)?;
        if child_node.parent.is_some() || child == self.root {
            return Err(PatternError::AlreadyAttached(child));
        }
        if self.is_ancestor(child, parent) {
            return Err(PatternError::ChildRejected(
                "a pattern cannot contain itself".into(),
            ));
        }
        let child_fixed = child_node.is_fixed();
        let child_block = child_node.kind.is_block();
        let child_is_repeat = matches!(child_node.kind, PatternKind::Repeat { .. });
        let child_is_root_kind = matches!(child_node.kind, PatternKind::Codeplug { .. });
        let child_address = child_node.address;
        let child_size = child_node.size;

        if child_is_root_kind {
            return Err(PatternError::ChildRejected(
                "a codeplug cannot be nested".into(),
            ));
        }

        let parent_kind = self.node(parent)?.kind.clone();
        let sibling_addresses: Vec<Option<Address>> = parent_kind
            .children()
            .iter()
            .map(|c| self.address(*c))
            .collect();

        match &parent_kind {
            PatternKind::Field(_) => return Err(PatternError::NotStructured(parent)),

            PatternKind::Codeplug { .. } => {
                let Some(address) = child_address else {
                    return Err(PatternError::ChildRejected(
                        "children of a codeplug need an explicit address".into(),
                    ));
                };
                let pos = sibling_addresses
                    .iter()
                    .take_while(|a| a.is_some_and(|a| a <= address))
                    .count();
                if let PatternKind::Codeplug { children } = &mut self.node_mut(parent)?.kind {
                    children.insert(pos, child);
                }
            }

            PatternKind::Repeat { child: existing, .. } => {
                if existing.is_some() {
                    return Err(PatternError::ChildRejected(
                        "repeat already has a child".into(),
                    ));
                }
                if !(child_block || child_is_repeat) {
                    return Err(PatternError::ChildRejected(
                        "repeat child must be a block or repeat pattern".into(),
                    ));
                }
                self.set_single_child(parent, child, child_address)?;
            }

            PatternKind::BlockRepeat { child: existing, .. }
            | PatternKind::FixedRepeat { child: existing, .. } => {
                if existing.is_some() {
                    return Err(PatternError::ChildRejected(
                        "repeat already has a child".into(),
                    ));
                }
                if !child_fixed {
                    return Err(PatternError::ChildRejected(
                        "dense repeat child must have a fixed size".into(),
                    ));
                }
                self.set_single_child(parent, child, child_address)?;
            }

            PatternKind::Element { children } => {
                if !child_fixed {
                    return Err(PatternError::ChildRejected(
                        "element children must have a fixed size".into(),
                    ));
                }
                if child_size.is_none() {
                    return Err(PatternError::ChildRejected(
                        "element children must have a size".into(),
                    ));
                }
                if index > children.len() {
                    return Err(PatternError::IndexOutOfRange(index));
                }
                let implicit = if index == 0 {
                    Some(Address::zero())
                } else {
                    let prev = children[index - 1];
                    match (self.address(prev), self.size(prev)) {
                        (Some(a), Some(s)) => Some(a + s),
                        _ => None,
                    }
                };
                let Some(implicit) = implicit else {
                    return Err(PatternError::ChildRejected(
                        "predecessor has no address or size".into(),
                    ));
                };
                if let Some(explicit) = child_address {
                    if explicit != implicit {
                        return Err(PatternError::ChildRejected(format!(
                            "explicit address {} does not match implicit address {}",
                            explicit, implicit
                        )));
                    }
                }
                if let PatternKind::Element { children } = &mut self.node_mut(parent)?.kind {
                    children.insert(index, child);
                }
            }
        }

        self.node_mut(child)?.parent = Some(parent);
        debug!(
            "Added {} '{}' to {} '{}'",
            self.kind(child).map(|k| k.kind_name()).unwrap_or("?"),
            self.meta(child).map(|m| m.name.as_str()).unwrap_or(""),
            self.kind(parent).map(|k| k.kind_name()).unwrap_or("?"),
            self.meta(parent).map(|m| m.name.as_str()).unwrap_or(""),
        );
        self.on_child_resized(parent);
        Ok(())
    }

    fn set_single_child(
        &mut self,
        parent: PatternId,
        child: PatternId,
        child_address: Option<Address>,
    ) -> Result<(), PatternError> {
        if let Some(explicit) = child_address {
            if explicit != Address::zero() {
                return Err(PatternError::ChildRejected(format!(
                    "explicit address {} of repeated pattern must be 0",
                    explicit
                )));
            }
        }
        match &mut self.node_mut(parent)?.kind {
            PatternKind::Repeat { child: slot, .. }
            | PatternKind::BlockRepeat { child: slot, .. }
            | PatternKind::FixedRepeat { child: slot, .. } => *slot = Some(child),
            _ => return Err(PatternError::NotStructured(parent)),
        }
        self.node_mut(child)?.address = Some(Address::zero());
        Ok(())
    }

    /// Detach `child` from `parent`; the subtree stays in the arena
    pub fn remove_child(
        &mut self,
        parent: PatternId,
        child: PatternId,
    ) -> Result<PatternId, PatternError> {
        let index = self
            .index_of(parent, child)
            .ok_or(PatternError::NotAChild { parent, child })?;
        self.take_child(parent, index)
    }

    /// Detach the child at `index` from `parent`
    pub fn take_child(&mut self, parent: PatternId, index: usize) -> Result<PatternId, PatternError> {
        let child = self
            .child_at(parent, index)
            .ok_or(PatternError::IndexOutOfRange(index))?;
        match &mut self.node_mut(parent)?.kind {
            PatternKind::Codeplug { children } | PatternKind::Element { children } => {
                children.remove(index);
            }
            PatternKind::Repeat { child: slot, .. }
            | PatternKind::BlockRepeat { child: slot, .. }
            | PatternKind::FixedRepeat { child: slot, .. } => *slot = None,
            PatternKind::Field(_) => return Err(PatternError::NotStructured(parent)),
        }
        let implicit = parent != self.root;
        let node = self.node_mut(child)?;
        node.parent = None;
        if implicit {
            node.address = None;
        }
        self.on_child_resized(parent);
        Ok(child)
    }

    /// Remove a node and its subtree from the arena
    pub fn delete(&mut self, id: PatternId) -> Result<(), PatternError> {
        if id == self.root {
            return Err(PatternError::ChildRejected("cannot delete the root".into()));
        }
        if let Some(parent) = self.node(id)?.parent {
            self.remove_child(parent, id)?;
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(slot) = self.nodes.get_mut(current.0 as usize) {
                if let Some(node) = slot.take() {
                    stack.extend_from_slice(node.children());
                }
            }
        }
        Ok(())
    }

    /// Change the size of a node and propagate it to its ancestors
    pub fn set_size(&mut self, id: PatternId, size: Option<Size>) -> Result<(), PatternError> {
        let node = self.node_mut(id)?;
        node.size = size;
        if let PatternKind::Field(FieldPattern::Unused { content }) = &node.kind {
            if size.is_none() {
                node.size = Some(Size::from_bytes(content.len() as u64));
            }
        }
        if let Some(parent) = self.node(id)?.parent {
            self.on_child_resized(parent);
        }
        Ok(())
    }

    /// Set the explicit address of a child of the root (or a detached node)
    pub fn set_address(&mut self, id: PatternId, address: Address) -> Result<(), PatternError> {
        if self.has_implicit_address(id) {
            return Err(PatternError::ChildRejected(
                "address is implicit for this pattern".into(),
            ));
        }
        self.node_mut(id)?.address = Some(address);
        if let Some(parent) = self.parent(id) {
            let root = self.root;
            let mut children: Vec<PatternId> = self.children(root).to_vec();
            children.sort_by_key(|c| self.address(*c));
            if let PatternKind::Codeplug { children: slot } = &mut self.node_mut(parent)?.kind {
                *slot = children;
            }
        }
        Ok(())
    }

    /// Replace the repetition count of a `FixedRepeat`
    pub fn set_repetition(&mut self, id: PatternId, n: u32) -> Result<(), PatternError> {
        match &mut self.node_mut(id)?.kind {
            PatternKind::FixedRepeat { n: slot, .. } => *slot = n,
            _ => {
                return Err(PatternError::ChildRejected(
                    "only fixed repeats have a repetition count".into(),
                ))
            }
        }
        self.on_child_resized(id);
        Ok(())
    }

    /// Add or replace an item of an enum field
    pub fn add_enum_item(&mut self, id: PatternId, item: EnumItem) -> Result<(), PatternError> {
        match &mut self.node_mut(id)?.kind {
            PatternKind::Field(FieldPattern::Enum(e)) => {
                e.add_item(item);
                Ok(())
            }
            _ => Err(PatternError::ChildRejected("not an enum field".into())),
        }
    }

    /// Recompute addresses and sizes from `id` upwards after a child changed
    fn on_child_resized(&mut self, id: PatternId) {
        let mut current = Some(id);
        while let Some(cid) = current {
            let Some(node) = self.get(cid) else { return };
            let parent = node.parent;
            match &node.kind {
                PatternKind::Element { children } => {
                    let children = children.clone();
                    let mut address = Some(Address::zero());
                    for c in &children {
                        let size = self.size(*c);
                        if let Ok(child) = self.node_mut(*c) {
                            child.address = address;
                        }
                        address = match (address, size) {
                            (Some(a), Some(s)) => Some(a + s),
                            _ => None,
                        };
                    }
                    let total = address.map(|a| Size::from_bits(a.bits()));
                    if let Ok(node) = self.node_mut(cid) {
                        node.size = total;
                    }
                }
                PatternKind::FixedRepeat { n, child } => {
                    let total = child.and_then(|c| self.size(c)).map(|s| s * *n);
                    if let Ok(node) = self.node_mut(cid) {
                        node.size = total;
                    }
                }
                _ => return,
            }
            current = parent;
        }
    }

    /// Structural self-check of the whole tree
    pub fn verify(&self) -> bool {
        self.verify_node(self.root)
    }

    /// Structural self-check of a subtree
    pub fn verify_node(&self, id: PatternId) -> bool {
        let Some(node) = self.get(id) else {
            return false;
        };
        let child_ok = |c: &Option<PatternId>| c.is_some_and(|c| self.verify_node(c));
        let has_size = node.size.is_some_and(|s| !s.is_zero());

        match &node.kind {
            PatternKind::Codeplug { children } => {
                !children.is_empty()
                    && children
                        .iter()
                        .all(|c| self.address(*c).is_some() && self.verify_node(*c))
            }
            PatternKind::Repeat { step, child, min, max } => {
                step.is_positive()
                    && child_ok(child)
                    && match (min, max) {
                        (Some(min), Some(max)) => min <= max,
                        _ => true,
                    }
            }
            PatternKind::BlockRepeat { min, max, child } => min <= max && child_ok(child),
            PatternKind::FixedRepeat { n, child } => has_size && *n > 0 && child_ok(child),
            PatternKind::Element { children } => {
                has_size && children.iter().all(|c| self.verify_node(*c))
            }
            PatternKind::Field(field) => {
                let bits = node.size.map(|s| s.bits()).unwrap_or(0);
                has_size
                    && match field {
                        FieldPattern::Unknown => true,
                        FieldPattern::Unused { .. } => true,
                        FieldPattern::Integer(_) => (1..=32).contains(&bits),
                        FieldPattern::Enum(_) => (1..=8).contains(&bits),
                        FieldPattern::String(s) => s.num_chars > 0,
                    }
            }
        }
    }

    /// Depth-first iterator over the live subtree rooted at `id`
    pub fn descendants(&self, id: PatternId) -> Vec<PatternId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if !self.contains(current) {
                continue;
            }
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uint8(name: &str) -> PatternNode {
        PatternNode::integer(8, IntegerFormat::Unsigned, Endian::Little).named(name)
    }

    #[test]
    fn test_codeplug_children_sorted_by_address() {
        let mut p = CodeplugPattern::new();
        let a = p.create(uint8("a").at(Address::from_byte(0x20)));
        let b = p.create(uint8("b").at(Address::from_byte(0x10)));
        p.add_child(p.root(), a).unwrap();
        p.add_child(p.root(), b).unwrap();
        assert_eq!(p.children(p.root()), &[b, a]);
        assert!(!p.has_implicit_address(a));
    }

    #[test]
    fn test_codeplug_rejects_child_without_address() {
        let mut p = CodeplugPattern::new();
        let a = p.create(uint8("a"));
        assert!(matches!(
            p.add_child(p.root(), a),
            Err(PatternError::ChildRejected(_))
        ));
    }

    #[test]
    fn test_element_size_is_sum_of_children() {
        let mut p = CodeplugPattern::new();
        let el = p.create(PatternNode::element().at(Address::from_byte(0)));
        let a = p.create(uint8("a"));
        let b = p.create(PatternNode::unknown(Size::from_bytes(4)));
        let c = p.create(PatternNode::integer(4, IntegerFormat::Unsigned, Endian::Little));
        for child in [a, b, c] {
            p.add_child(el, child).unwrap();
        }
        assert_eq!(p.size(el), Some(Size::from_bits(8 + 32 + 4)));
        assert_eq!(p.address(c), Some(Address::from_byte(5)));
        assert!(p.has_implicit_address(c));
    }

    #[test]
    fn test_element_rejects_mismatching_explicit_address() {
        let mut p = CodeplugPattern::new();
        let el = p.create(PatternNode::element());
        let a = p.create(uint8("a"));
        p.add_child(el, a).unwrap();
        let b = p.create(uint8("b").at(Address::from_byte(4)));
        assert!(p.add_child(el, b).is_err());
        let c = p.create(uint8("c").at(Address::from_byte(1)));
        assert!(p.add_child(el, c).is_ok());
    }

    #[test]
    fn test_element_rejects_non_fixed_children() {
        let mut p = CodeplugPattern::new();
        let el = p.create(PatternNode::element());
        let r = p.create(PatternNode::block_repeat(0, 4));
        assert!(p.add_child(el, r).is_err());
    }

    #[test]
    fn test_resize_propagates_to_ancestors() {
        let mut p = CodeplugPattern::new();
        let outer = p.create(PatternNode::element().at(Address::from_byte(0)));
        let rep = p.create(PatternNode::fixed_repeat(3));
        let inner = p.create(PatternNode::element());
        let f = p.create(PatternNode::unknown(Size::from_bytes(2)));
        let tail = p.create(uint8("tail"));
        p.add_child(inner, f).unwrap();
        p.add_child(rep, inner).unwrap();
        p.add_child(outer, rep).unwrap();
        p.add_child(outer, tail).unwrap();
        assert_eq!(p.size(rep), Some(Size::from_bytes(6)));
        assert_eq!(p.size(outer), Some(Size::from_bytes(7)));
        assert_eq!(p.address(tail), Some(Address::from_byte(6)));

        p.set_size(f, Some(Size::from_bytes(4))).unwrap();
        assert_eq!(p.size(inner), Some(Size::from_bytes(4)));
        assert_eq!(p.size(rep), Some(Size::from_bytes(12)));
        assert_eq!(p.size(outer), Some(Size::from_bytes(13)));
        assert_eq!(p.address(tail), Some(Address::from_byte(12)));
    }

    #[test]
    fn test_insert_and_remove_readdress_siblings() {
        let mut p = CodeplugPattern::new();
        let el = p.create(PatternNode::element());
        let a = p.create(uint8("a"));
        let b = p.create(uint8("b"));
        p.add_child(el, a).unwrap();
        p.add_child(el, b).unwrap();

        let wide = p.create(PatternNode::unknown(Size::from_bytes(4)));
        p.insert_child(el, wide, 0).unwrap();
        assert_eq!(p.index_of(el, a), Some(1));
        assert_eq!(p.address(a), Some(Address::from_byte(4)));
        assert_eq!(p.address(b), Some(Address::from_byte(5)));

        assert_eq!(p.remove_child(el, wide).unwrap(), wide);
        assert_eq!(p.address(a), Some(Address::zero()));
        assert_eq!(p.address(b), Some(Address::from_byte(1)));
        assert_eq!(p.size(el), Some(Size::from_bytes(2)));
        assert!(p.parent(wide).is_none());
    }

    #[test]
    fn test_fixed_repeat_size_and_verify() {
        let mut p = CodeplugPattern::new();
        let rep = p.create(PatternNode::fixed_repeat(4).at(Address::from_byte(0)));
        assert!(!p.verify_node(rep));
        let child = p.create(PatternNode::unknown(Size::from_bytes(3)));
        p.add_child(rep, child).unwrap();
        assert_eq!(p.size(rep), Some(Size::from_bytes(12)));
        assert!(p.verify_node(rep));

        p.set_repetition(rep, 0).unwrap();
        assert!(!p.verify_node(rep));
    }

    #[test]
    fn test_single_child_slots() {
        let mut p = CodeplugPattern::new();
        let rep = p.create(PatternNode::repeat(Offset::from_bytes(0x10), None, None));
        let a = p.create(uint8("a"));
        let b = p.create(uint8("b"));
        p.add_child(rep, a).unwrap();
        assert!(p.add_child(rep, b).is_err());
        assert_eq!(p.child_at(rep, 0), Some(a));
        assert_eq!(p.child_at(rep, 1), None);
    }

    #[test]
    fn test_verify_requires_children_and_step() {
        let mut p = CodeplugPattern::new();
        assert!(!p.verify());
        let rep = p.create(PatternNode::repeat(Offset::zero(), None, None).at(Address::zero()));
        let a = p.create(uint8("a"));
        p.add_child(rep, a).unwrap();
        p.add_child(p.root(), rep).unwrap();
        assert!(!p.verify());
    }

    #[test]
    fn test_combined_flags_and_path() {
        let mut p = CodeplugPattern::new();
        let el = p.create(
            PatternNode::element()
                .with_meta(PatternMeta::new("Settings").with_flags(MetaFlags::Done))
                .at(Address::zero()),
        );
        let a = p.create(
            PatternNode::unknown(Size::from_bytes(1))
                .with_meta(PatternMeta::new("Flags").with_flags(MetaFlags::NeedsReview)),
        );
        p.add_child(el, a).unwrap();
        p.add_child(p.root(), el).unwrap();
        assert_eq!(p.combined_flags(p.root()), MetaFlags::NeedsReview);
        assert_eq!(p.combined_flags(el), MetaFlags::NeedsReview);
        assert_eq!(p.path(a), vec!["Codeplug", "Settings", "Flags"]);
    }

    #[test]
    fn test_delete_invalidates_subtree() {
        let mut p = CodeplugPattern::new();
        let el = p.create(PatternNode::element().at(Address::zero()));
        let a = p.create(uint8("a"));
        p.add_child(el, a).unwrap();
        p.add_child(p.root(), el).unwrap();
        p.delete(el).unwrap();
        assert!(p.get(el).is_none());
        assert!(p.get(a).is_none());
        assert!(p.children(p.root()).is_empty());
        assert!(p.delete(p.root()).is_err());
    }

    #[test]
    fn test_cycles_are_rejected() {
        let mut p = CodeplugPattern::new();
        let outer = p.create(PatternNode::element());
        let inner = p.create(PatternNode::element());
        p.add_child(outer, inner).unwrap();
        assert!(p.add_child(inner, outer).is_err());
    }

    #[test]
    fn test_absolute_address() {
        let mut p = CodeplugPattern::new();
        let el = p.create(PatternNode::element().at(Address::from_byte(0x100)));
        let a = p.create(uint8("a"));
        let b = p.create(uint8("b"));
        p.add_child(el, a).unwrap();
        p.add_child(el, b).unwrap();
        p.add_child(p.root(), el).unwrap();
        assert_eq!(p.absolute_address(b), Some(Address::from_byte(0x101)));
    }
}
