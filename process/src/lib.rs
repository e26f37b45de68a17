//! Process-tree store for the process-control subsystem.
//! Keeps the parent/child/sibling linkage, the reaper (orphan-adoption)
//! linkage and the per-process control attributes, together with the
//! fork/exit maintenance hooks that keep both consistent.
//! A process has child processes; any process may become the reaper of the
//! subtree below it. See the `tree` module for the locking protocol.
#![cfg_attr(not(test), no_std)]

extern crate alloc;
pub mod process;
pub mod process_group;
pub mod tree;

/// Type alias for process group ID and process ID.
/// Linux uses `int` for these IDs, which is typically 32 bits.
pub type Pid = u32;

/// Identifier of the root reaper of last resort (the init process).
pub const INIT_PID: Pid = 1;
