use super::{NodeLocator, alive_only, fnv1a_32};
use crate::node::Node;
use std::sync::Arc;

/// Picks `hash(key) % n`, probing forward past dead nodes.
#[derive(Default)]
pub struct ModuloLocator {
    nodes: Vec<Arc<dyn Node>>,
}

impl ModuloLocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeLocator for ModuloLocator {
    fn initialize(&mut self, nodes: Vec<Arc<dyn Node>>) {
        self.nodes = nodes;
    }

    fn locate(&self, key: &str) -> Option<Arc<dyn Node>> {
        let count = self.nodes.len();
        if count == 0 {
            return None;
        }
        let start = fnv1a_32(key.as_bytes()) as usize % count;
        (0..count)
            .map(|step| &self.nodes[(start + step) % count])
            .find(|node| node.is_alive())
            .cloned()
    }

    fn working_nodes(&self) -> Vec<Arc<dyn Node>> {
        alive_only(&self.nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{FailureNotifier, SimulatedNode};

    #[test]
    fn test_modulo_probes_past_dead_node() {
        let a = SimulatedNode::new("a:1".parse().unwrap(), FailureNotifier::detached());
        let b = SimulatedNode::new("b:1".parse().unwrap(), FailureNotifier::detached());
        let mut locator = ModuloLocator::new();
        locator.initialize(vec![a.as_node(), b.as_node()]);

        assert!(locator.locate("x").is_some());
        a.fail();
        for key in ["x", "y", "z", "w"] {
            assert_eq!(locator.locate(key).unwrap().endpoint(), b.endpoint());
        }
        b.fail();
        assert!(locator.locate("x").is_none());
    }
}
