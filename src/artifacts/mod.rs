//! Airgap artifacts: per-node copy jobs and the in-cluster metadata copy.

pub mod distributor;
pub mod metadata_copy;

pub use distributor::{ArtifactDistributor, Distribution, NodeOutcome};
pub use metadata_copy::{ArtifactSource, HttpArtifactSource, copy_version_metadata};
