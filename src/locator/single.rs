use super::NodeLocator;
use crate::node::Node;
use std::sync::Arc;

/// Routes every key to the first node it was initialized with.
#[derive(Default)]
pub struct SingleNodeLocator {
    node: Option<Arc<dyn Node>>,
}

impl SingleNodeLocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NodeLocator for SingleNodeLocator {
    fn initialize(&mut self, nodes: Vec<Arc<dyn Node>>) {
        self.node = nodes.into_iter().next();
    }

    fn locate(&self, _key: &str) -> Option<Arc<dyn Node>> {
        self.node.as_ref().filter(|n| n.is_alive()).cloned()
    }

    fn working_nodes(&self) -> Vec<Arc<dyn Node>> {
        self.node.iter().filter(|n| n.is_alive()).cloned().collect()
    }
}
