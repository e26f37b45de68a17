use crate::Pid;
use crate::process::ProcessNode;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::Mutex;

/// An unordered set of processes sharing a group identifier. The control
/// core only ever expands a group into its membership; membership itself is
/// maintained by [`crate::tree::ProcessTree`].
pub struct ProcessGroup {
    pgid: Pid,
    processes: Mutex<BTreeMap<Pid, Arc<ProcessNode>>>,
}

impl ProcessGroup {
    pub(crate) fn new(pgid: Pid) -> Arc<Self> {
        Arc::new(Self {
            pgid,
            processes: Mutex::new(BTreeMap::new()),
        })
    }

    /// Get process group id
    pub fn get_pgid(&self) -> Pid {
        self.pgid
    }

    /// Get the leader process of the process group
    /// Return `None` if the leader process does not exist (maybe exited)
    pub fn get_leader(&self) -> Option<Arc<ProcessNode>> {
        // "leader" process is the process with the same id as the process group id
        self.processes.lock().get(&self.pgid).cloned()
    }

    pub(crate) fn add_process(&self, process: Arc<ProcessNode>) {
        self.processes.lock().insert(process.get_pid(), process);
    }

    /// Remove a member; reports whether the group became empty.
    pub(crate) fn remove_process(&self, pid: Pid) -> bool {
        let mut processes = self.processes.lock();
        processes.remove(&pid);
        processes.is_empty()
    }

    /// Snapshot of the live membership, in pid order.
    pub fn get_processes(&self) -> Vec<Arc<ProcessNode>> {
        self.processes.lock().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leader_is_member_with_group_id() {
        let group = ProcessGroup::new(5);
        group.add_process(ProcessNode::new(5));
        group.add_process(ProcessNode::new(6));
        assert_eq!(group.get_leader().unwrap().get_pid(), 5);
        assert_eq!(group.get_processes().len(), 2);
    }

    #[test]
    fn remove_reports_empty() {
        let group = ProcessGroup::new(9);
        group.add_process(ProcessNode::new(9));
        assert!(group.remove_process(9));
    }
}
