//! Everything an application needs to route keys across a cluster.
//!
//! ```
//! use memcluster::prelude::*;
//! ```

pub use crate::{
    ClusterClient, ClusterConfig, ClusterError, DiscoveryClient, Endpoint, LocatorKind, Node,
    NodeFactory, Protocol, Result, ServerPool, Transport,
};
