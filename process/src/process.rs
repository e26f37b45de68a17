use crate::Pid;
use crate::process_group::ProcessGroup;
use alloc::sync::{Arc, Weak};
use spin::Mutex;

bitflags::bitflags! {
    /// Per-process control flags, guarded by the owning node's attribute
    /// lock.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProcFlags: u32 {
        /// Still being set up by fork; not yet a valid operation target.
        const NEW = 1 << 0;
        /// System-internal process, exempt from protection changes.
        const SYSTEM = 1 << 1;
        /// Shielded from low-memory reclamation.
        const PROTECTED = 1 << 2;
        /// Children inherit `PROTECTED` at fork.
        const PROTECT_INHERIT = 1 << 3;
        /// A debugger is currently attached.
        const TRACED = 1 << 4;
        /// Debuggers may never attach.
        const NOTRACE = 1 << 5;
        /// The no-trace state persists only until the next exec and can be
        /// lifted by the process itself alone. Implies `NOTRACE`.
        const NOTRACE_EXEC = 1 << 6;
    }
}

/// Mutable control attributes of one process, all guarded by the per-node
/// lock ([`ProcessNode::attrs`]).
#[derive(Debug)]
pub struct NodeAttrs {
    pub flags: ProcFlags,
    /// Identifier of the attached debugger while `TRACED` is set.
    pub tracer: Option<Pid>,
    /// The tracing facility holds state for this process outside the flags
    /// above (owned by that facility, read here for the busy check).
    pub trace_busy: bool,
}

impl NodeAttrs {
    fn new() -> Self {
        Self {
            flags: ProcFlags::NEW,
            tracer: None,
            trace_busy: false,
        }
    }
}

/// One live process. Tree and reaper linkage live in
/// [`crate::tree::Topology`] under the tree lock; everything here is either
/// immutable or guarded by the node's own attribute lock.
pub struct ProcessNode {
    pid: Pid,
    /// The per-node lock of the locking protocol.
    pub attrs: Mutex<NodeAttrs>,
    pub(crate) process_group: Mutex<Weak<ProcessGroup>>,
}

impl ProcessNode {
    pub(crate) fn new(pid: Pid) -> Arc<Self> {
        Arc::new(Self {
            pid,
            attrs: Mutex::new(NodeAttrs::new()),
            process_group: Mutex::new(Weak::new()),
        })
    }

    pub fn get_pid(&self) -> Pid {
        self.pid
    }

    /// Get the process group this process currently belongs to.
    pub fn get_group(&self) -> Arc<ProcessGroup> {
        self.process_group.lock().upgrade().unwrap()
    }

    pub fn is_group_leader(&self) -> bool {
        self.get_group().get_pgid() == self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_starts_uninitialized() {
        let node = ProcessNode::new(7);
        let attrs = node.attrs.lock();
        assert_eq!(attrs.flags, ProcFlags::NEW);
        assert!(attrs.tracer.is_none());
        assert!(!attrs.trace_busy);
    }

    #[test]
    fn flag_word_rejects_unknown_bits() {
        assert!(ProcFlags::from_bits(1 << 30).is_none());
    }
}
