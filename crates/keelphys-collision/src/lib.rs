//! Dynamic AABB tree broadphase.
//!
//! Leaves live in a fixed-capacity arena and survive across frames; the
//! internal hierarchy is thrown away and rebuilt once per frame by recursive
//! median split, after the caller has rewritten every leaf's bounds.
//! `for_each_overlapping_leaf_pair` then enumerates each unordered pair of
//! overlapping leaves exactly once by simultaneous descent.

use keelphys_core::{Arena, Error, Result};
use keelphys_geom::Aabb;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum NodeRef {
    Leaf(u32),
    Internal(u32),
}

pub struct Leaf<P> {
    pub bounds: Aabb,
    pub payload: P,
}

struct InternalNode {
    bounds: Aabb,
    children: [NodeRef; 2],
}

pub struct AabbTree<P: Copy> {
    leaves: Arena<Leaf<P>>,
    nodes: Vec<InternalNode>,
    scratch: Vec<u32>,
    root: Option<NodeRef>,
    max_internal_nodes: usize,
}

impl<P: Copy> AabbTree<P> {
    pub fn with_capacity(max_leaves: usize, max_internal_nodes: usize) -> Self {
        Self {
            leaves: Arena::new(max_leaves, "aabb tree leaves"),
            nodes: Vec::with_capacity(max_internal_nodes),
            scratch: Vec::with_capacity(max_leaves),
            root: None,
            max_internal_nodes,
        }
    }

    #[inline] pub fn leaf_count(&self) -> usize { self.leaves.len() }

    pub fn create_leaf(&mut self, bounds: Aabb, payload: P) -> Result<u32> {
        self.root = None;
        self.leaves.insert(Leaf { bounds, payload })
    }

    pub fn destroy_leaf(&mut self, leaf: u32) {
        self.root = None;
        self.leaves.remove(leaf);
    }

    #[inline]
    pub fn leaf_bounds_mut(&mut self, leaf: u32) -> &mut Aabb {
        &mut self.leaves.get_mut(leaf).bounds
    }

    #[inline]
    pub fn leaf_payload_mut(&mut self, leaf: u32) -> &mut P {
        &mut self.leaves.get_mut(leaf).payload
    }

    /// Rebuilds the internal hierarchy over the current leaf bounds.
    pub fn build(&mut self) -> Result<()> {
        self.nodes.clear();
        self.scratch.clear();
        let scratch = &mut self.scratch;
        self.leaves.for_each(|index, _| scratch.push(index));
        self.root = if self.scratch.is_empty() {
            None
        } else {
            Some(build_range(
                &self.leaves,
                &mut self.scratch,
                &mut self.nodes,
                self.max_internal_nodes,
            )?)
        };
        Ok(())
    }

    /// Invokes `f` exactly once per unordered pair of overlapping leaves.
    /// Valid after `build`; leaf churn invalidates the hierarchy.
    pub fn for_each_overlapping_leaf_pair<E, F>(&self, f: &mut F) -> Result<(), E>
    where
        F: FnMut(P, P) -> Result<(), E>,
    {
        if let Some(root) = self.root {
            self.pairs_within(root, f)?;
        }
        Ok(())
    }

    fn bounds_of(&self, node: NodeRef) -> &Aabb {
        match node {
            NodeRef::Leaf(leaf) => &self.leaves.get(leaf).bounds,
            NodeRef::Internal(index) => &self.nodes[index as usize].bounds,
        }
    }

    fn pairs_within<E>(
        &self,
        node: NodeRef,
        f: &mut impl FnMut(P, P) -> Result<(), E>,
    ) -> Result<(), E> {
        if let NodeRef::Internal(index) = node {
            let [left, right] = self.nodes[index as usize].children;
            self.pairs_within(left, f)?;
            self.pairs_within(right, f)?;
            self.pairs_between(left, right, f)?;
        }
        Ok(())
    }

    fn pairs_between<E>(
        &self,
        a: NodeRef,
        b: NodeRef,
        f: &mut impl FnMut(P, P) -> Result<(), E>,
    ) -> Result<(), E> {
        if !self.bounds_of(a).overlaps(self.bounds_of(b)) {
            return Ok(());
        }
        match (a, b) {
            (NodeRef::Leaf(la), NodeRef::Leaf(lb)) => {
                f(self.leaves.get(la).payload, self.leaves.get(lb).payload)
            }
            (NodeRef::Leaf(_), NodeRef::Internal(index)) => {
                let [left, right] = self.nodes[index as usize].children;
                self.pairs_between(a, left, f)?;
                self.pairs_between(a, right, f)
            }
            (NodeRef::Internal(index), _) => {
                let [left, right] = self.nodes[index as usize].children;
                self.pairs_between(left, b, f)?;
                self.pairs_between(right, b, f)
            }
        }
    }
}

fn build_range<P: Copy>(
    leaves: &Arena<Leaf<P>>,
    scratch: &mut [u32],
    nodes: &mut Vec<InternalNode>,
    max_internal_nodes: usize,
) -> Result<NodeRef> {
    if scratch.len() == 1 {
        return Ok(NodeRef::Leaf(scratch[0]));
    }
    // split across the median of the widest centroid axis
    let mut lo = leaves.get(scratch[0]).bounds.center();
    let mut hi = lo;
    for &leaf in scratch.iter().skip(1) {
        let c = leaves.get(leaf).bounds.center();
        lo = lo.min(c);
        hi = hi.max(c);
    }
    let extent = hi - lo;
    let axis = if extent.x >= extent.y && extent.x >= extent.z {
        0
    } else if extent.y >= extent.z {
        1
    } else {
        2
    };
    let mid = scratch.len() / 2;
    scratch.select_nth_unstable_by(mid, |&a, &b| {
        let ka = leaves.get(a).bounds.center()[axis];
        let kb = leaves.get(b).bounds.center()[axis];
        ka.total_cmp(&kb).then(a.cmp(&b))
    });
    let (left_slice, right_slice) = scratch.split_at_mut(mid);
    let left = build_range(leaves, left_slice, nodes, max_internal_nodes)?;
    let right = build_range(leaves, right_slice, nodes, max_internal_nodes)?;
    if nodes.len() == max_internal_nodes {
        return Err(Error::CapacityExceeded("aabb tree internal nodes"));
    }
    let bounds = bounds_of(leaves, nodes, left).merge(bounds_of(leaves, nodes, right));
    nodes.push(InternalNode { bounds, children: [left, right] });
    Ok(NodeRef::Internal((nodes.len() - 1) as u32))
}

fn bounds_of<'a, P: Copy>(
    leaves: &'a Arena<Leaf<P>>,
    nodes: &'a [InternalNode],
    node: NodeRef,
) -> &'a Aabb {
    match node {
        NodeRef::Leaf(leaf) => &leaves.get(leaf).bounds,
        NodeRef::Internal(index) => &nodes[index as usize].bounds,
    }
}
