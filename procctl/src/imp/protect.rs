//! Protection changes, single-node and whole-subtree.

use crate::policy::ControlPolicy;
use crate::types::ProtectFlags;
use alloc::sync::Arc;
use axerrno::{LinuxError, LinuxResult};
use osprey_process::Pid;
use osprey_process::process::{ProcFlags, ProcessNode};
use osprey_process::tree::TreeGuard;

/// Apply the change to one process. System processes and targets failing
/// the scheduling check are left untouched and do not count as changed.
fn protect_setchild(policy: &dyn ControlPolicy, p: &ProcessNode, flags: ProtectFlags) -> bool {
    let mut attrs = p.attrs.lock();
    if attrs.flags.contains(ProcFlags::SYSTEM) || policy.can_sched(p.get_pid(), &attrs).is_err() {
        return false;
    }
    if flags.contains(ProtectFlags::SET) {
        attrs.flags.insert(ProcFlags::PROTECTED);
        if flags.contains(ProtectFlags::INHERIT) {
            attrs.flags.insert(ProcFlags::PROTECT_INHERIT);
        }
    } else {
        attrs
            .flags
            .remove(ProcFlags::PROTECTED | ProcFlags::PROTECT_INHERIT);
    }
    true
}

/// Iterative pre-order walk of the subtree rooted at `top`: descend to the
/// first child when there is one, otherwise move to the next sibling, and
/// when a level is exhausted follow parents back up (never above `top`) to
/// the next unvisited sibling. Each node's attribute lock is released
/// before the walk advances; the tree lock pins the topology for the whole
/// walk.
fn protect_setchildren(
    guard: &TreeGuard<'_>,
    policy: &dyn ControlPolicy,
    top: Pid,
    flags: ProtectFlags,
) -> bool {
    guard.assert_locked();
    let tree = guard.tree();
    let topo = guard.topology();
    let mut changed = false;
    let mut p = top;
    loop {
        if let Some(node) = tree.process(p) {
            changed |= protect_setchild(policy, &node, flags);
        }
        if let Some(child) = topo.first_child(p) {
            p = child;
            continue;
        }
        loop {
            if p == top {
                return changed;
            }
            if let Some(sibling) = topo.next_sibling(p) {
                p = sibling;
                break;
            }
            p = topo.parent(p).expect("[procctl] walk escaped the subtree");
        }
    }
}

/// Set or clear the protection attribute on `p`, or on its whole subtree
/// with `DESCEND`. Reports `EPERM` when not a single node was changed.
pub fn protect_set(
    guard: &TreeGuard<'_>,
    policy: &dyn ControlPolicy,
    p: &Arc<ProcessNode>,
    flags: ProtectFlags,
) -> LinuxResult<()> {
    guard.assert_locked();
    policy.check_protect_privilege()?;
    let changed = if flags.contains(ProtectFlags::DESCEND) {
        protect_setchildren(guard, policy, p.get_pid(), flags)
    } else {
        protect_setchild(policy, p, flags)
    };
    if changed { Ok(()) } else { Err(LinuxError::EPERM) }
}
