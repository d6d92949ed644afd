pub mod ketama;
pub mod modulo;
pub mod single;

use crate::core::{ClusterError, Result};
use crate::node::Node;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

pub use ketama::KetamaLocator;
pub use modulo::ModuloLocator;
pub use single::SingleNodeLocator;

/// Maps keys onto a set of nodes.
///
/// A locator is initialized once and then only read. The pool never mutates an
/// installed locator; it builds a new one and swaps the reference.
pub trait NodeLocator: Send + Sync {
    /// Builds the mapping over `nodes`. Order is preserved for `working_nodes`.
    fn initialize(&mut self, nodes: Vec<Arc<dyn Node>>);

    /// Returns the node responsible for `key`, or `None` if no node is working.
    fn locate(&self, key: &str) -> Option<Arc<dyn Node>>;

    /// The initialized nodes that currently report alive.
    fn working_nodes(&self) -> Vec<Arc<dyn Node>>;

    /// Called once when the pool is disposed.
    fn release(&self) {}
}

/// Creates fresh, uninitialized locators.
pub trait LocatorFactory: Send + Sync {
    fn create(&self) -> Box<dyn NodeLocator>;
}

impl<F> LocatorFactory for F
where
    F: Fn() -> Box<dyn NodeLocator> + Send + Sync,
{
    fn create(&self) -> Box<dyn NodeLocator> {
        self()
    }
}

/// Built-in locator strategies selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocatorKind {
    /// Consistent hashing ring.
    #[default]
    Ketama,
    /// Hash modulo node count.
    Modulo,
    /// Everything goes to the first node.
    Single,
}

impl LocatorFactory for LocatorKind {
    fn create(&self) -> Box<dyn NodeLocator> {
        match self {
            LocatorKind::Ketama => Box::new(KetamaLocator::new()),
            LocatorKind::Modulo => Box::new(ModuloLocator::new()),
            LocatorKind::Single => Box::new(SingleNodeLocator::new()),
        }
    }
}

impl FromStr for LocatorKind {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ketama" | "consistent" => Ok(LocatorKind::Ketama),
            "modulo" => Ok(LocatorKind::Modulo),
            "single" => Ok(LocatorKind::Single),
            other => Err(ClusterError::InvalidConfig(format!(
                "unknown node locator '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for LocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LocatorKind::Ketama => "ketama",
            LocatorKind::Modulo => "modulo",
            LocatorKind::Single => "single",
        };
        f.write_str(name)
    }
}

/// 32-bit FNV-1a over `bytes`.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = 0x811c_9dc5u32;
    for byte in bytes {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

pub(crate) fn alive_only(nodes: &[Arc<dyn Node>]) -> Vec<Arc<dyn Node>> {
    nodes.iter().filter(|n| n.is_alive()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv_reference_values() {
        assert_eq!(fnv1a_32(b""), 0x811c_9dc5);
        assert_eq!(fnv1a_32(b"a"), 0xe40c_292c);
        assert_eq!(fnv1a_32(b"foobar"), 0xbf9c_f968);
    }

    #[test]
    fn test_locator_kind_parsing() {
        assert_eq!("Ketama".parse::<LocatorKind>().unwrap(), LocatorKind::Ketama);
        assert_eq!("modulo".parse::<LocatorKind>().unwrap(), LocatorKind::Modulo);
        assert_eq!("single".parse::<LocatorKind>().unwrap(), LocatorKind::Single);
        assert!("random".parse::<LocatorKind>().is_err());
        assert_eq!(LocatorKind::default().to_string(), "ketama");
    }

    #[test]
    fn test_closure_factory() {
        let factory = || Box::new(SingleNodeLocator::new()) as Box<dyn NodeLocator>;
        let locator = LocatorFactory::create(&factory);
        assert!(locator.locate("k").is_none());
    }
}
