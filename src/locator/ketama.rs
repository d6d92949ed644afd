use super::{NodeLocator, alive_only, fnv1a_32};
use crate::node::Node;
use std::sync::Arc;

/// Virtual points placed on the ring for every node.
pub const POINTS_PER_NODE: usize = 100;

// FNV-1a alone clusters short labels that differ only in the last byte.
fn ring_hash(bytes: &[u8]) -> u32 {
    let mut h = fnv1a_32(bytes);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// Consistent hashing locator.
///
/// Each node owns [`POINTS_PER_NODE`] points on a 32-bit ring; a key belongs to
/// the first point at or after its hash. Adding or removing one node only moves
/// the keys that hashed next to that node's points.
#[derive(Default)]
pub struct KetamaLocator {
    nodes: Vec<Arc<dyn Node>>,
    ring: Vec<(u32, usize)>,
}

impl KetamaLocator {
    pub fn new() -> Self {
        Self::default()
    }

    fn point_index(&self, hash: u32) -> usize {
        match self.ring.binary_search_by(|(point, _)| point.cmp(&hash)) {
            Ok(idx) => idx,
            Err(idx) if idx == self.ring.len() => 0,
            Err(idx) => idx,
        }
    }
}

impl NodeLocator for KetamaLocator {
    fn initialize(&mut self, nodes: Vec<Arc<dyn Node>>) {
        let mut ring = Vec::with_capacity(nodes.len() * POINTS_PER_NODE);
        for (idx, node) in nodes.iter().enumerate() {
            let identity = node.endpoint().canonical();
            for point in 0..POINTS_PER_NODE {
                let label = format!("{}-{}", identity, point);
                ring.push((ring_hash(label.as_bytes()), idx));
            }
        }
        ring.sort_unstable();
        self.ring = ring;
        self.nodes = nodes;
    }

    fn locate(&self, key: &str) -> Option<Arc<dyn Node>> {
        if self.ring.is_empty() {
            return None;
        }
        let start = self.point_index(ring_hash(key.as_bytes()));

        // Walk clockwise past nodes that died after this ring was built.
        for step in 0..self.ring.len() {
            let (_, node_idx) = self.ring[(start + step) % self.ring.len()];
            let node = &self.nodes[node_idx];
            if node.is_alive() {
                return Some(Arc::clone(node));
            }
        }
        None
    }

    fn working_nodes(&self) -> Vec<Arc<dyn Node>> {
        alive_only(&self.nodes)
    }
}
