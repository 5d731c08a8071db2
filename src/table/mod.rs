//! The routing table (C5): deterministic construction from a dictionary directory, namespace
//! lookup, and id lookup. See [`scan::scan`] for the build algorithm and [`meta::RoutingTable`]
//! for the published snapshot's read API.

pub mod manifest;
pub mod meta;
pub mod scan;

pub use meta::{DictId, DictMeta, NamespaceEntry, RoutingTable};
pub use scan::{clone_plus, scan, ScanCounts};
