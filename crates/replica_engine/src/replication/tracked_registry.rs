//! Index/version registry for tracked components
//!
//! Issues [`ComponentReference`]s and maps them back to component handles.
//! Freed indices are reused with a bumped version so that references held
//! past a component's removal stop resolving under a checked lookup.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of addressable indices (24 bits, version takes the remaining 8)
pub const MAX_INDEX_COUNT: u32 = 1 << 24;

const MAX_VERSION: u32 = 0xFF;

/// Stable reference to a tracked component: slot index plus slot version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentReference {
    /// Slot index
    pub index: u32,
    /// Slot version, never 0 for an issued reference
    pub version: u32,
}

impl ComponentReference {
    /// Reference that never resolves
    pub const NONE: Self = Self { index: 0, version: 0 };

    /// Create a reference from its parts
    pub const fn new(index: u32, version: u32) -> Self {
        Self { index, version }
    }

    /// Whether this is [`ComponentReference::NONE`]
    pub fn is_none(self) -> bool {
        self == Self::NONE
    }

    /// Pack into 32 bits: version in the high byte, index below
    pub fn to_packed(self) -> u32 {
        (self.version & MAX_VERSION) << 24 | (self.index & (MAX_INDEX_COUNT - 1))
    }

    /// Inverse of [`to_packed`](Self::to_packed)
    pub fn from_packed(packed: u32) -> Self {
        Self {
            index: packed & (MAX_INDEX_COUNT - 1),
            version: packed >> 24,
        }
    }
}

impl Default for ComponentReference {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for ComponentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.version)
    }
}

/// Registry errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Every index is in use
    #[error("Component index space exhausted ({0} indices)")]
    IndexSpaceExhausted(u32),
}

// Slot links of the registration order list
const NIL: u32 = u32::MAX;

#[derive(Debug, Clone)]
struct Slot<H> {
    version: u32,
    handle: Option<H>,
    prev: u32,
    next: u32,
}

/// Maps [`ComponentReference`]s to component handles
///
/// Live slots are threaded through an intrusive list in registration order,
/// so `add` and `remove` stay O(1) while iteration keeps that order.
#[derive(Debug, Clone)]
pub struct TrackedComponentRegistry<H> {
    slots: Vec<Slot<H>>,
    free_indices: Vec<u32>,
    head: u32,
    tail: u32,
    len: usize,
}

impl<H: Copy + PartialEq> TrackedComponentRegistry<H> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_indices: Vec::new(),
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    /// Track a component, reusing a freed index when one is available
    pub fn add(&mut self, handle: H) -> Result<ComponentReference, RegistryError> {
        let reference = if let Some(index) = self.free_indices.pop() {
            let slot = &mut self.slots[index as usize];
            slot.version = if slot.version >= MAX_VERSION { 1 } else { slot.version + 1 };
            slot.handle = Some(handle);
            ComponentReference::new(index, slot.version)
        } else {
            let index = u32::try_from(self.slots.len())
                .ok()
                .filter(|&i| i < MAX_INDEX_COUNT)
                .ok_or(RegistryError::IndexSpaceExhausted(MAX_INDEX_COUNT))?;
            self.slots.push(Slot { version: 1, handle: Some(handle), prev: NIL, next: NIL });
            ComponentReference::new(index, 1)
        };

        self.link_back(reference.index);
        Ok(reference)
    }

    /// Stop tracking a component. Returns its handle if the reference was live.
    pub fn remove(&mut self, reference: ComponentReference) -> Option<H> {
        self.get(reference, true)?;
        self.unlink(reference.index);
        let handle = self.slots[reference.index as usize].handle.take();
        self.free_indices.push(reference.index);
        handle
    }

    /// Resolve a reference. Unchecked lookups ignore the version.
    ///
    /// [`ComponentReference::NONE`] shares its index with the first slot, so
    /// it only counts as "no reference" under a checked lookup. Unchecked, it
    /// resolves index 0 like any other index.
    pub fn get(&self, reference: ComponentReference, check_version: bool) -> Option<H> {
        if check_version && reference.is_none() {
            return None;
        }
        let slot = self.slots.get(reference.index as usize)?;
        if check_version && slot.version != reference.version {
            return None;
        }
        slot.handle
    }

    /// Resolve a bare index
    pub fn get_by_index(&self, index: u32) -> Option<H> {
        self.slots.get(index as usize).and_then(|slot| slot.handle)
    }

    /// Live references and handles in registration order
    pub fn iter(&self) -> impl Iterator<Item = (ComponentReference, H)> + '_ {
        let mut cursor = self.head;
        std::iter::from_fn(move || {
            let slot = self.slots.get(cursor as usize)?;
            let item = (ComponentReference::new(cursor, slot.version), slot.handle?);
            cursor = slot.next;
            Some(item)
        })
    }

    /// Number of tracked components
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn link_back(&mut self, index: u32) {
        let tail = self.tail;
        {
            let slot = &mut self.slots[index as usize];
            slot.prev = tail;
            slot.next = NIL;
        }
        match self.slots.get_mut(tail as usize) {
            Some(previous) => previous.next = index,
            None => self.head = index,
        }
        self.tail = index;
        self.len += 1;
    }

    fn unlink(&mut self, index: u32) {
        let (prev, next) = {
            let slot = &mut self.slots[index as usize];
            let links = (slot.prev, slot.next);
            slot.prev = NIL;
            slot.next = NIL;
            links
        };
        match self.slots.get_mut(prev as usize) {
            Some(slot) => slot.next = next,
            None => self.head = next,
        }
        match self.slots.get_mut(next as usize) {
            Some(slot) => slot.prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }
}

impl<H: Copy + PartialEq> Default for TrackedComponentRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}
