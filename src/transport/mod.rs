//! Acquisition of send streams from the local `btrfs` tool.

pub mod send;

pub use send::{diff_snapshots, raw_snapshot_changes, SendSession};
