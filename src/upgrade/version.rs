//! Kubernetes and k0s version handling.
//!
//! The API server of a cluster installed with k0s `v1.29.1+k0s.1` reports
//! `v1.29.1+k0s`: the trailing `.1` is the k0s build, not part of the
//! Kubernetes version. Desired versions are cut at the `+k0s` marker before
//! they are compared with the running one.

use std::cmp::Ordering;

use semver::{Prerelease, Version};

/// Marker separating the Kubernetes version from the k0s build.
pub const K0S_MARKER: &str = "+k0s";

/// A Kubernetes version comparable without regard to build metadata.
#[derive(Debug, Clone)]
pub struct KubeVersion(Version);

impl KubeVersion {
    /// Parse a version string, with or without a leading `v`.
    pub fn parse(input: &str) -> Option<Self> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        Version::parse(trimmed).ok().map(Self)
    }

    /// Kubernetes version embedded in a k0s version.
    ///
    /// `v1.29.1+k0s.1` yields `1.29.1+k0s`; strings without the marker are rejected.
    pub fn from_k0s_version(k0s_version: &str) -> Option<Self> {
        let index = k0s_version.find(K0S_MARKER)?;
        Self::parse(k0s_version.get(..index + K0S_MARKER.len())?)
    }

    fn key(&self) -> (u64, u64, u64, &Prerelease) {
        (self.0.major, self.0.minor, self.0.patch, &self.0.pre)
    }
}

impl PartialEq for KubeVersion {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for KubeVersion {}

impl Ord for KubeVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl PartialOrd for KubeVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Whether a version-change command is required.
///
/// Equal Kubernetes versions only need a new k0s binary when the previous
/// installation is known to run a different k0s build.
pub fn should_upgrade_k0s(
    running: &KubeVersion,
    desired: &KubeVersion,
    desired_k0s_version: &str,
    previous_k0s_version: &str,
) -> bool {
    match desired.cmp(running) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => !previous_k0s_version.is_empty() && previous_k0s_version != desired_k0s_version,
    }
}
