//! Crash-consistent ZFS snapshots of container app storage.
//!
//! Each run rotates a bounded ring of `@backup` snapshots per dataset,
//! pauses an app's containers only while its snapshot is taken, and
//! republishes the newest snapshot as a read-only mount for backup tools.

pub mod cli;
pub mod core;
pub mod utils;
