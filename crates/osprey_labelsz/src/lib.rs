//! Label-size secondary index over annotation streams.
//!
//! Ranks labels by the number of annotation elements of each type so that
//! top-N and threshold queries are answered by one ordered scan over a
//! sorted-by-size keyspace. The index evolves synchronously with the
//! annotation events it consumes and reads through the versioned context,
//! so queries at any DAG node see that node's nearest-ancestor state.

pub mod data;
pub mod keys;


pub use data::{ranking_json, LabelSize, LabelszData, MAX_LABELS_RETURNED};
pub use keys::IndexType;
