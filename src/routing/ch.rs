use bytemuck::{Pod, Zeroable};

use crate::{graph::EdgeData, VertexId, NO_VERTEX};

mod contract;
mod router;

pub use contract::Contractor;
pub use router::{CHRouter, ClosestEdge, Route};

/// Edge payload of a contracted graph. Every edge is stored at its lower
/// ranked endpoint; `FORWARD` marks it usable from there towards the
/// neighbour, `BACKWARD` from the neighbour towards the owner.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct CHEdgeData {
    pub weight: f32,
    /// Vertex bypassed by this shortcut, `NO_VERTEX` on network edges.
    pub contracted_id: VertexId,
    pub tags: u32,
    flags: u8,
    _pad: [u8; 3],
}

impl CHEdgeData {
    pub const FORWARD: u8 = 1;
    pub const BACKWARD: u8 = 2;

    pub fn new(weight: f32, forward: bool, backward: bool) -> Self {
        Self::shortcut(weight, forward, backward, NO_VERTEX)
    }

    pub fn shortcut(weight: f32, forward: bool, backward: bool, contracted_id: VertexId) -> Self {
        let mut flags = 0;
        if forward {
            flags |= Self::FORWARD;
        }
        if backward {
            flags |= Self::BACKWARD;
        }

        Self {
            weight,
            contracted_id,
            tags: 0,
            flags,
            _pad: [0; 3],
        }
    }

    pub fn with_tags(mut self, tags: u32) -> Self {
        self.tags = tags;
        self
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub(crate) fn add_flags(&mut self, flags: u8) {
        self.flags |= flags;
    }

    pub fn is_forward(&self) -> bool {
        self.flags & Self::FORWARD != 0
    }

    pub fn is_backward(&self) -> bool {
        self.flags & Self::BACKWARD != 0
    }

    pub fn is_shortcut(&self) -> bool {
        self.contracted_id != NO_VERTEX
    }
}

impl EdgeData for CHEdgeData {
    fn forward(&self) -> bool {
        self.is_forward()
    }

    fn tags(&self) -> u32 {
        self.tags
    }

    fn reverse(&self) -> Self {
        let mut reversed = *self;
        reversed.flags = 0;
        if self.is_forward() {
            reversed.flags |= Self::BACKWARD;
        }
        if self.is_backward() {
            reversed.flags |= Self::FORWARD;
        }
        reversed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_swaps_direction() {
        let edge = CHEdgeData::shortcut(2.5, true, false, 9).with_tags(4);
        let reversed = edge.reverse();

        assert!(!reversed.is_forward());
        assert!(reversed.is_backward());
        assert_eq!(reversed.contracted_id, 9);
        assert_eq!(reversed.tags, 4);
        assert_eq!(reversed.reverse(), edge);

        let both = CHEdgeData::new(1.0, true, true);
        assert_eq!(both.reverse(), both);
        assert!(!both.is_shortcut());
    }
}
