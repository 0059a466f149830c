//! Spatial ordering and lookup: Hilbert sorting/search directly over the
//! vertex table, and R-trees for edge boxes and radius queries.

mod hilbert;
mod index;

pub use hilbert::{hilbert_distance, search_hilbert, search_hilbert_run, sort_hilbert};
pub use index::{EdgeIndex, IndexedEdge, VertexIndex};
