//! Versioning layer: the append-only version DAG, repo metadata, the
//! versioned context that resolves reads through DAG ancestry, the
//! annotation sync contract, and region-of-interest filtering.

pub mod dag;
pub mod repo;
pub mod roi;
pub mod sync;
pub mod versioned;

#[cfg(test)]
mod tests;

pub use dag::VersionDag;
pub use repo::{DataInstance, Repo};
pub use roi::{ImmutableRoi, RoiProvider, RoiSpec};
pub use sync::{AnnotationSource, ElementKind, SyncEvent};
pub use versioned::VersionedCtx;
