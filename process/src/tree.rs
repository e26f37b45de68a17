//! The shared process-tree store and its locking protocol.
//!
//! A single reader/writer lock guards the tree *topology* (parent, child,
//! sibling, reaper linkage); each node carries its own lock for its mutable
//! control attributes ([`crate::process::NodeAttrs`]). Operations hold at
//! most the tree lock plus one node's attribute lock at any time.
//!
//! [`ProcessTree::fork`] and [`ProcessTree::exit`] are the lifecycle hooks
//! driven by the fork/exit machinery; they take the topology lock
//! exclusively themselves and must not be called with a [`TreeGuard`] held.

use crate::process::{ProcFlags, ProcessNode};
use crate::process_group::ProcessGroup;
use crate::{INIT_PID, Pid};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use spin::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct NodeLinks {
    parent: Option<Pid>,
    first_child: Option<Pid>,
    next_sibling: Option<Pid>,
    /// The node responsible for reaping this node's orphaned descendants.
    reaper: Pid,
    /// Tag recorded at adoption time, scopes bulk operations on the reap
    /// list to one direct-child subtree of the reaper.
    reap_subtree: u32,
    is_reaper: bool,
    /// Descendants adopted by this node, meaningful while `is_reaper`.
    reap_list: Vec<Pid>,
}

/// Tree and reaper linkage of every live process, guarded as a whole by the
/// tree lock. Child lists are intrusive first-child/next-sibling chains so
/// a subtree walk needs no storage proportional to depth.
pub struct Topology {
    links: BTreeMap<Pid, NodeLinks>,
}

impl Topology {
    pub fn contains(&self, pid: Pid) -> bool {
        self.links.contains_key(&pid)
    }

    pub fn parent(&self, pid: Pid) -> Option<Pid> {
        self.links.get(&pid).and_then(|l| l.parent)
    }

    pub fn first_child(&self, pid: Pid) -> Option<Pid> {
        self.links.get(&pid).and_then(|l| l.first_child)
    }

    pub fn next_sibling(&self, pid: Pid) -> Option<Pid> {
        self.links.get(&pid).and_then(|l| l.next_sibling)
    }

    pub fn is_reaper(&self, pid: Pid) -> bool {
        self.links.get(&pid).is_some_and(|l| l.is_reaper)
    }

    /// The reaper back-reference recorded when this node was adopted.
    pub fn reaper_of(&self, pid: Pid) -> Pid {
        self.links.get(&pid).map_or(INIT_PID, |l| l.reaper)
    }

    /// The reaper answering for `pid`: itself when marked, else its
    /// back-reference.
    pub fn effective_reaper(&self, pid: Pid) -> Pid {
        if self.is_reaper(pid) {
            pid
        } else {
            self.reaper_of(pid)
        }
    }

    pub fn reap_subtree(&self, pid: Pid) -> u32 {
        self.links.get(&pid).map_or(0, |l| l.reap_subtree)
    }

    /// Adopted descendants of `pid`, empty unless it is a reaper. Also
    /// empty when the node is gone, so enumeration snapshots taken before a
    /// lock gap degrade to zero records instead of faulting.
    pub fn reap_list(&self, pid: Pid) -> &[Pid] {
        self.links.get(&pid).map_or(&[], |l| l.reap_list.as_slice())
    }

    /// Mark `pid` as a reaper. Existing descendants are not re-adopted;
    /// their current reaper has already seen them. Only future generations
    /// forked below `pid` enter its reap list.
    pub fn set_reaper_marker(&mut self, pid: Pid) {
        self.links
            .get_mut(&pid)
            .expect("[process] unknown process")
            .is_reaper = true;
    }

    /// Hand the entire reap list of `pid` to its own reaper and clear the
    /// marker. Abandonment is total; each reassigned node keeps its
    /// recorded subtree tag. With `exiting`, members directly parented by
    /// `pid` are reparented to the inheriting reaper as well.
    pub fn abandon_children(&mut self, pid: Pid, exiting: bool) {
        assert_ne!(pid, INIT_PID, "[process] abandon_children for init");
        if !self.is_reaper(pid) {
            return;
        }
        let me = self.links.get_mut(&pid).unwrap();
        let new_reaper = me.reaper;
        let orphans = core::mem::take(&mut me.reap_list);
        me.is_reaper = false;
        for q in orphans {
            let ql = self.links.get_mut(&q).unwrap();
            ql.reaper = new_reaper;
            self.links.get_mut(&new_reaper).unwrap().reap_list.push(q);
            if exiting && self.parent(q) == Some(pid) {
                self.reparent(q, new_reaper);
            }
        }
        debug_assert!(self.reap_list(pid).is_empty());
    }

    /// Move `child` under `new_parent` in the child chains.
    fn reparent(&mut self, child: Pid, new_parent: Pid) {
        debug_assert_ne!(child, new_parent);
        self.unlink_from_parent(child);
        let head = self.links[&new_parent].first_child;
        let cl = self.links.get_mut(&child).unwrap();
        cl.parent = Some(new_parent);
        cl.next_sibling = head;
        self.links.get_mut(&new_parent).unwrap().first_child = Some(child);
    }

    fn unlink_from_parent(&mut self, pid: Pid) {
        let parent = self.links[&pid]
            .parent
            .expect("[process] unlink of parentless process");
        let next = self.links[&pid].next_sibling;
        if self.links[&parent].first_child == Some(pid) {
            self.links.get_mut(&parent).unwrap().first_child = next;
        } else {
            let mut cur = self.links[&parent]
                .first_child
                .expect("[process] broken child chain");
            while self.links[&cur].next_sibling != Some(pid) {
                cur = self.links[&cur]
                    .next_sibling
                    .expect("[process] broken child chain");
            }
            self.links.get_mut(&cur).unwrap().next_sibling = next;
        }
        let l = self.links.get_mut(&pid).unwrap();
        l.parent = None;
        l.next_sibling = None;
    }

    fn remove_from_reap_list(&mut self, reaper: Pid, pid: Pid) {
        let list = &mut self.links.get_mut(&reaper).unwrap().reap_list;
        if let Some(at) = list.iter().position(|&p| p == pid) {
            list.swap_remove(at);
        }
    }
}

/// Reified tree-lock state, threaded through every control operation so the
/// lock mode is explicit and enumeration can drop and retake the lock
/// around a blocking transfer.
pub enum TreeGuard<'a> {
    Unlocked(&'a ProcessTree),
    Shared(&'a ProcessTree, RwLockReadGuard<'a, Topology>),
    Exclusive(&'a ProcessTree, RwLockWriteGuard<'a, Topology>),
}

impl<'a> TreeGuard<'a> {
    pub fn tree(&self) -> &'a ProcessTree {
        match self {
            TreeGuard::Unlocked(t) => t,
            TreeGuard::Shared(t, _) => t,
            TreeGuard::Exclusive(t, _) => t,
        }
    }

    pub fn topology(&self) -> &Topology {
        match self {
            TreeGuard::Unlocked(_) => panic!("[process] tree lock not held"),
            TreeGuard::Shared(_, g) => g,
            TreeGuard::Exclusive(_, g) => g,
        }
    }

    pub fn topology_mut(&mut self) -> &mut Topology {
        match self {
            TreeGuard::Exclusive(_, g) => &mut *g,
            _ => panic!("[process] tree lock not held exclusively"),
        }
    }

    pub fn assert_locked(&self) {
        assert!(
            !matches!(self, TreeGuard::Unlocked(_)),
            "[process] tree lock not held"
        );
    }

    pub fn assert_exclusive(&self) {
        assert!(
            matches!(self, TreeGuard::Exclusive(..)),
            "[process] tree lock not held exclusively"
        );
    }

    pub fn unlock(&mut self) {
        *self = TreeGuard::Unlocked(self.tree());
    }

    pub fn relock_shared(&mut self) {
        *self = self.tree().lock_shared();
    }
}

/// The single conceptual store: process table, process-group index and the
/// lock-guarded topology. Its lifetime is the lifetime of the running
/// system; every operation borrows it.
pub struct ProcessTree {
    table: Mutex<BTreeMap<Pid, Arc<ProcessNode>>>,
    groups: Mutex<BTreeMap<Pid, Arc<ProcessGroup>>>,
    topology: RwLock<Topology>,
    next_pid: AtomicU32,
}

impl ProcessTree {
    /// A fresh tree with init (the reaper of last resort) already alive.
    pub fn new() -> Self {
        let tree = Self {
            table: Mutex::new(BTreeMap::new()),
            groups: Mutex::new(BTreeMap::new()),
            topology: RwLock::new(Topology {
                links: BTreeMap::new(),
            }),
            next_pid: AtomicU32::new(INIT_PID),
        };
        let pid = tree.generate_next_pid();
        assert_eq!(pid, INIT_PID, "[process] init must be the first process");
        let node = ProcessNode::new(pid);
        tree.topology.write().links.insert(
            pid,
            NodeLinks {
                parent: None,
                first_child: None,
                next_sibling: None,
                reaper: pid,
                reap_subtree: 0,
                is_reaper: true,
                reap_list: Vec::new(),
            },
        );
        let group = ProcessGroup::new(pid);
        group.add_process(node.clone());
        *node.process_group.lock() = Arc::downgrade(&group);
        tree.groups.lock().insert(pid, group);
        node.attrs.lock().flags.remove(ProcFlags::NEW);
        tree.table.lock().insert(pid, node);
        tree
    }

    pub fn init_pid(&self) -> Pid {
        INIT_PID
    }

    fn generate_next_pid(&self) -> Pid {
        self.next_pid.fetch_add(1, Ordering::AcqRel)
    }

    /// Look up a process by identifier.
    pub fn process(&self, pid: Pid) -> Option<Arc<ProcessNode>> {
        self.table.lock().get(&pid).cloned()
    }

    /// Look up a process group by identifier.
    pub fn process_group(&self, pgid: Pid) -> Option<Arc<ProcessGroup>> {
        self.groups.lock().get(&pgid).cloned()
    }

    pub fn lock_shared(&self) -> TreeGuard<'_> {
        TreeGuard::Shared(self, self.topology.read())
    }

    pub fn lock_exclusive(&self) -> TreeGuard<'_> {
        TreeGuard::Exclusive(self, self.topology.write())
    }

    pub fn unlocked(&self) -> TreeGuard<'_> {
        TreeGuard::Unlocked(self)
    }

    /// The fork hook: create a child of `parent`, wire it into the tree and
    /// into the nearest reaper's adopted set, and place it in the parent's
    /// process group.
    pub fn fork(&self, parent: Pid) -> Arc<ProcessNode> {
        let pid = self.generate_next_pid();
        let node = ProcessNode::new(pid);
        {
            let mut topo = self.topology.write();
            let pl = topo
                .links
                .get(&parent)
                .expect("[process] fork from unknown process");
            let reaper = if pl.is_reaper { parent } else { pl.reaper };
            // a direct child of its reaper roots a new tagged subtree
            let reap_subtree = if reaper == parent {
                pid
            } else {
                pl.reap_subtree
            };
            let next_sibling = pl.first_child;
            topo.links.insert(
                pid,
                NodeLinks {
                    parent: Some(parent),
                    first_child: None,
                    next_sibling,
                    reaper,
                    reap_subtree,
                    is_reaper: false,
                    reap_list: Vec::new(),
                },
            );
            topo.links.get_mut(&parent).unwrap().first_child = Some(pid);
            topo.links.get_mut(&reaper).unwrap().reap_list.push(pid);
        }
        let parent_node = self
            .process(parent)
            .expect("[process] fork from unknown process");
        {
            // inheritable attribute bits
            let pa = parent_node.attrs.lock();
            let mut ca = node.attrs.lock();
            let inherited = pa.flags & (ProcFlags::NOTRACE | ProcFlags::NOTRACE_EXEC);
            ca.flags.insert(inherited);
            if pa.flags.contains(ProcFlags::PROTECT_INHERIT) {
                ca.flags
                    .insert(ProcFlags::PROTECTED | ProcFlags::PROTECT_INHERIT);
            }
        }
        let group = parent_node.get_group();
        group.add_process(node.clone());
        *node.process_group.lock() = Arc::downgrade(&group);
        self.table.lock().insert(pid, node.clone());
        node.attrs.lock().flags.remove(ProcFlags::NEW);
        node
    }

    /// The exit hook: `pid` leaves the tree. A dying reaper abandons its
    /// adopted set upward first; surviving children are then adopted (and
    /// reparented) by their own reapers.
    pub fn exit(&self, pid: Pid) {
        assert_ne!(pid, INIT_PID, "[process] init may not exit");
        {
            let mut topo = self.topology.write();
            assert!(topo.contains(pid), "[process] exit of unknown process");
            topo.abandon_children(pid, true);
            let reaper = topo.reaper_of(pid);
            topo.remove_from_reap_list(reaper, pid);
            while let Some(child) = topo.first_child(pid) {
                let adopter = topo.reaper_of(child);
                topo.reparent(child, adopter);
            }
            topo.unlink_from_parent(pid);
            topo.links.remove(&pid);
        }
        let node = self
            .table
            .lock()
            .remove(&pid)
            .expect("[process] exit of unknown process");
        let group = node.get_group();
        if group.remove_process(pid) {
            self.groups.lock().remove(&group.get_pgid());
        }
    }

    /// Create a new process group led by `pid`, unless it already leads one.
    pub fn create_group(&self, pid: Pid) -> Arc<ProcessGroup> {
        let node = self.process(pid).expect("[process] unknown process");
        let origin = node.get_group();
        if origin.get_pgid() == pid {
            return origin;
        }
        let new_group = ProcessGroup::new(pid);
        self.groups.lock().insert(pid, new_group.clone());
        self.change_group(&node, &new_group);
        new_group
    }

    /// Move `pid` into the existing group `pgid`.
    pub fn move_to_group(&self, pid: Pid, pgid: Pid) -> bool {
        let node = self.process(pid).expect("[process] unknown process");
        let Some(group) = self.process_group(pgid) else {
            return false;
        };
        self.change_group(&node, &group);
        true
    }

    fn change_group(&self, node: &Arc<ProcessNode>, new_group: &Arc<ProcessGroup>) {
        let origin = node.get_group();
        if origin.remove_process(node.get_pid()) {
            self.groups.lock().remove(&origin.get_pgid());
        }
        new_group.add_process(node.clone());
        *node.process_group.lock() = Arc::downgrade(new_group);
    }
}
