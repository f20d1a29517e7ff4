#![forbid(unsafe_code)]

//! Generational node handles.
//!
//! A [`NodeId`] names a slot in the [`Graph`](crate::Graph) arena. The
//! generation counter makes stale handles detectable: once a slot is
//! released and recycled, every handle minted for the previous occupant
//! stops resolving instead of silently aliasing the new one.
//!
//! # Invariants
//!
//! 1. Two live nodes never share the same `NodeId`.
//! 2. A released slot's generation is bumped before reuse, so a stale
//!    handle can never resolve to the slot's next occupant.
//! 3. `NodeId::DANGLING` never resolves in any graph.

use core::fmt;

/// Identity-bearing handle to a node in a [`Graph`](crate::Graph).
///
/// Cheap to copy and hash; all node state lives in the graph's side
/// tables, keyed by this handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl NodeId {
    /// A handle that resolves in no graph. Useful as a default/sentinel.
    pub const DANGLING: NodeId = NodeId {
        index: u32::MAX,
        generation: u32::MAX,
    };

    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Arena slot index. Stable for the lifetime of the node.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Generation of the slot this handle was minted for.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::DANGLING
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == NodeId::DANGLING {
            write!(f, "NodeId(dangling)")
        } else {
            write!(f, "NodeId({}v{})", self.index, self.generation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_compare_by_index_and_generation() {
        let a = NodeId::new(3, 1);
        let b = NodeId::new(3, 1);
        let c = NodeId::new(3, 2);
        assert_eq!(a, b);
        assert_ne!(a, c, "a recycled slot must not equal its old handle");
    }

    #[test]
    fn dangling_is_default() {
        assert_eq!(NodeId::default(), NodeId::DANGLING);
    }

    #[test]
    fn display_includes_generation() {
        let id = NodeId::new(7, 2);
        assert_eq!(format!("{id}"), "NodeId(7v2)");
        assert_eq!(format!("{}", NodeId::DANGLING), "NodeId(dangling)");
    }
}
