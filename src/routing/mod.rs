//! Routing on top of the graph stores: the data source wrapping a graph with
//! its indexes, profiles and restrictions, path segments and resolved points,
//! and the contraction hierarchy with its router.

mod ch;
mod data_source;
mod path;

pub use ch::{CHEdgeData, CHRouter, ClosestEdge, Contractor, Route};
pub use data_source::{EdgeQuery, RoutingDataSource};
pub use path::{PathSegment, RoutingPoint};
