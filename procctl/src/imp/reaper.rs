//! The reaper subsystem: acquire/release of reaper status and the status,
//! enumerate and kill queries over a reaper's adopted set.

use crate::policy::{ControlPolicy, ReapPidsSink, SignalDelivery};
use crate::types::{ReapKill, ReapKillFlags, ReapPidFlags, ReapPidInfo, ReaperStatus};
use alloc::sync::Arc;
use alloc::vec::Vec;
use axerrno::{LinuxError, LinuxResult};
use osprey_process::process::ProcessNode;
use osprey_process::tree::TreeGuard;

/// Volunteer the calling process as reaper of its own future subtree.
/// Existing descendants are not re-adopted: the reaper that already
/// observed them keeps them.
pub fn reap_acquire(
    guard: &mut TreeGuard<'_>,
    policy: &dyn ControlPolicy,
    p: &Arc<ProcessNode>,
) -> LinuxResult<()> {
    guard.assert_exclusive();
    if p.get_pid() != policy.caller_pid() {
        return Err(LinuxError::EPERM);
    }
    if guard.topology().is_reaper(p.get_pid()) {
        return Err(LinuxError::EBUSY);
    }
    guard.topology_mut().set_reaper_marker(p.get_pid());
    debug!("[procctl] process {} acquired reaper status", p.get_pid());
    Ok(())
}

/// Resign reaper status; the whole adopted set moves to the next reaper up
/// the tree. The reaper of last resort never resigns.
pub fn reap_release(
    guard: &mut TreeGuard<'_>,
    policy: &dyn ControlPolicy,
    p: &Arc<ProcessNode>,
) -> LinuxResult<()> {
    guard.assert_exclusive();
    if p.get_pid() != policy.caller_pid() {
        return Err(LinuxError::EPERM);
    }
    if p.get_pid() == guard.tree().init_pid() {
        return Err(LinuxError::EINVAL);
    }
    if !guard.topology().is_reaper(p.get_pid()) {
        return Err(LinuxError::EINVAL);
    }
    guard.topology_mut().abandon_children(p.get_pid(), false);
    debug!("[procctl] process {} released reaper status", p.get_pid());
    Ok(())
}

/// Snapshot of the target's effective reaper: identity, counts over the
/// adopted set, and one direct child when the set is not empty.
pub fn reap_status(
    guard: &TreeGuard<'_>,
    p: &Arc<ProcessNode>,
    rs: &mut ReaperStatus,
) -> LinuxResult<()> {
    guard.assert_locked();
    let topo = guard.topology();
    let reap = topo.effective_reaper(p.get_pid());
    *rs = ReaperStatus {
        reaper: reap,
        last_resort: reap == guard.tree().init_pid(),
        ..ReaperStatus::default()
    };
    let list = topo.reap_list(reap);
    for &member in list {
        if topo.parent(member) == Some(reap) {
            rs.children += 1;
        }
        rs.descendants += 1;
    }
    if !list.is_empty() {
        let first = topo.first_child(reap);
        assert!(
            first.is_some(),
            "[procctl] reaper {reap} has an adopted set but no children"
        );
        rs.first_child = first;
    }
    Ok(())
}

/// Enumerate the adopted set of the target's effective reaper, up to
/// `count` records. The member count is snapshotted under the tree lock,
/// the lock is dropped across allocation and across the (possibly
/// blocking) transfer, and the snapshot is treated as a soft upper bound:
/// the set may shrink in the gaps and fewer records may be produced, never
/// more.
pub fn reap_getpids(
    guard: &mut TreeGuard<'_>,
    p: &Arc<ProcessNode>,
    count: usize,
    dst: &mut dyn ReapPidsSink,
) -> LinuxResult<()> {
    guard.assert_locked();
    let reap = guard.topology().effective_reaper(p.get_pid());
    let n = guard.topology().reap_list(reap).len().min(count);
    guard.unlock();
    let mut records: Vec<ReapPidInfo> = Vec::with_capacity(n);
    guard.relock_shared();
    {
        let topo = guard.topology();
        for &member in topo.reap_list(reap) {
            if records.len() == n {
                break;
            }
            let mut flags = ReapPidFlags::VALID;
            if topo.parent(member) == Some(reap) {
                flags |= ReapPidFlags::CHILD;
            }
            records.push(ReapPidInfo {
                pid: member,
                subtree: topo.reap_subtree(member),
                flags,
            });
        }
    }
    guard.unlock();
    let res = dst.transfer(&records);
    guard.relock_shared();
    res
}

/// Signal the adopted set (or only the direct children) of the target's
/// effective reaper, optionally filtered by subtree tag. Every reachable
/// candidate gets a chance: a refused member never ends the loop, it is
/// only remembered as the first failure in case nothing succeeds.
pub fn reap_kill(
    guard: &mut TreeGuard<'_>,
    policy: &dyn ControlPolicy,
    delivery: &dyn SignalDelivery,
    p: &Arc<ProcessNode>,
    rk: &mut ReapKill,
) -> LinuxResult<()> {
    guard.assert_locked();
    if policy.in_restricted_context() {
        return Err(LinuxError::EACCES);
    }
    let flags = ReapKillFlags::from_bits_truncate(rk.flags);
    let tree = guard.tree();
    let topo = guard.topology();
    let reap = topo.effective_reaper(p.get_pid());
    rk.killed = 0;
    rk.first_failed = None;
    let mut error: LinuxResult<()> = Err(LinuxError::ESRCH);
    let children_only = flags.contains(ReapKillFlags::CHILDREN);
    let list = topo.reap_list(reap);
    let mut chain = topo.first_child(reap);
    let mut index = 0;
    loop {
        let candidate = if children_only {
            let Some(q) = chain else { break };
            chain = topo.next_sibling(q);
            q
        } else {
            let Some(&q) = list.get(index) else { break };
            index += 1;
            q
        };
        if flags.contains(ReapKillFlags::SUBTREE) && topo.reap_subtree(candidate) != rk.subtree {
            continue;
        }
        let Some(node) = tree.process(candidate) else {
            continue;
        };
        let mut attrs = node.attrs.lock();
        match policy.can_signal(candidate, &attrs, rk.sig) {
            Ok(()) => {
                delivery.deliver(candidate, &mut attrs, rk.sig);
                rk.killed += 1;
                error = Ok(());
            }
            Err(err) => {
                if matches!(error, Err(LinuxError::ESRCH)) {
                    error = Err(err);
                    rk.first_failed = Some(candidate);
                }
            }
        }
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{Recorder, StubPolicy};
    use crate::types::ReapKillFlags;
    use linux_raw_sys::general::{SIGKILL, SIGTERM};
    use osprey_process::Pid;
    use osprey_process::tree::ProcessTree;

    fn acquire(tree: &ProcessTree, pid: Pid) {
        let node = tree.process(pid).unwrap();
        let mut guard = tree.lock_exclusive();
        reap_acquire(&mut guard, &StubPolicy::new(pid), &node).unwrap();
    }

    fn status(tree: &ProcessTree, pid: Pid) -> ReaperStatus {
        let node = tree.process(pid).unwrap();
        let mut rs = ReaperStatus::default();
        reap_status(&tree.lock_shared(), &node, &mut rs).unwrap();
        rs
    }

    #[test]
    fn acquire_is_self_only_and_single_shot() {
        let tree = ProcessTree::new();
        let a = tree.fork(tree.init_pid());
        {
            let mut guard = tree.lock_exclusive();
            let res = reap_acquire(&mut guard, &StubPolicy::new(1), &a);
            assert!(matches!(res, Err(LinuxError::EPERM)));
        }
        acquire(&tree, a.get_pid());
        let mut guard = tree.lock_exclusive();
        let res = reap_acquire(&mut guard, &StubPolicy::new(a.get_pid()), &a);
        assert!(matches!(res, Err(LinuxError::EBUSY)));
    }

    #[test]
    fn status_right_after_acquire_points_at_self() {
        let tree = ProcessTree::new();
        let a = tree.fork(tree.init_pid());
        acquire(&tree, a.get_pid());
        let rs = status(&tree, a.get_pid());
        assert_eq!(rs.reaper, a.get_pid());
        assert!(!rs.last_resort);
        assert_eq!(rs.descendants, 0);
        assert_eq!(rs.children, 0);
        assert_eq!(rs.first_child, None);
    }

    #[test]
    fn status_of_plain_process_reports_the_last_resort_reaper() {
        let tree = ProcessTree::new();
        let a = tree.fork(tree.init_pid());
        let b = tree.fork(a.get_pid());
        let rs = status(&tree, b.get_pid());
        assert_eq!(rs.reaper, tree.init_pid());
        assert!(rs.last_resort);
        assert_eq!(rs.descendants, 2);
        // only a is still directly parented by init
        assert_eq!(rs.children, 1);
        assert_eq!(rs.first_child, Some(a.get_pid()));
    }

    #[test]
    fn release_moves_the_whole_set_to_the_ancestor_reaper() {
        let tree = ProcessTree::new();
        let a = tree.fork(tree.init_pid());
        acquire(&tree, a.get_pid());
        let b = tree.fork(a.get_pid());
        tree.fork(a.get_pid());
        tree.fork(b.get_pid());
        let before = status(&tree, tree.init_pid());
        assert_eq!(before.descendants, 1);
        assert_eq!(status(&tree, a.get_pid()).descendants, 3);
        {
            let mut guard = tree.lock_exclusive();
            reap_release(&mut guard, &StubPolicy::new(a.get_pid()), &a).unwrap();
        }
        // conservation: the ancestor gained exactly the released set
        let after = status(&tree, tree.init_pid());
        assert_eq!(after.descendants, before.descendants + 3);
        assert_eq!(status(&tree, a.get_pid()).reaper, tree.init_pid());
    }

    #[test]
    fn release_refuses_init_nonreapers_and_other_callers() {
        let tree = ProcessTree::new();
        let init = tree.process(tree.init_pid()).unwrap();
        let a = tree.fork(tree.init_pid());
        let mut guard = tree.lock_exclusive();
        let res = reap_release(&mut guard, &StubPolicy::new(tree.init_pid()), &init);
        assert!(matches!(res, Err(LinuxError::EINVAL)));
        let res = reap_release(&mut guard, &StubPolicy::new(a.get_pid()), &a);
        assert!(matches!(res, Err(LinuxError::EINVAL)));
        let res = reap_release(&mut guard, &StubPolicy::new(999), &a);
        assert!(matches!(res, Err(LinuxError::EPERM)));
    }

    #[test]
    fn getpids_reports_members_tags_and_child_flags() {
        let tree = ProcessTree::new();
        let r = tree.fork(tree.init_pid());
        acquire(&tree, r.get_pid());
        let b = tree.fork(r.get_pid());
        let e = tree.fork(b.get_pid());
        let mut records: Vec<ReapPidInfo> = Vec::new();
        let mut guard = tree.lock_shared();
        reap_getpids(&mut guard, &r, 16, &mut records).unwrap();
        drop(guard);
        assert_eq!(records.len(), 2);
        let rb = records.iter().find(|i| i.pid == b.get_pid()).unwrap();
        assert_eq!(rb.subtree, b.get_pid());
        assert!(rb.flags.contains(ReapPidFlags::CHILD));
        let re = records.iter().find(|i| i.pid == e.get_pid()).unwrap();
        assert_eq!(re.subtree, b.get_pid());
        assert!(re.flags.contains(ReapPidFlags::VALID));
        assert!(!re.flags.contains(ReapPidFlags::CHILD));
    }

    #[test]
    fn getpids_never_exceeds_the_caller_cap() {
        let tree = ProcessTree::new();
        let r = tree.fork(tree.init_pid());
        acquire(&tree, r.get_pid());
        for _ in 0..5 {
            tree.fork(r.get_pid());
        }
        let mut records: Vec<ReapPidInfo> = Vec::new();
        let mut guard = tree.lock_shared();
        reap_getpids(&mut guard, &r, 3, &mut records).unwrap();
        drop(guard);
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn getpids_tolerates_the_set_shrinking_after_status() {
        let tree = ProcessTree::new();
        let r = tree.fork(tree.init_pid());
        acquire(&tree, r.get_pid());
        let doomed = tree.fork(r.get_pid());
        tree.fork(r.get_pid());
        let counted = status(&tree, r.get_pid()).descendants as usize;
        assert_eq!(counted, 2);
        tree.exit(doomed.get_pid());
        let mut records: Vec<ReapPidInfo> = Vec::new();
        let mut guard = tree.lock_shared();
        reap_getpids(&mut guard, &r, counted, &mut records).unwrap();
        drop(guard);
        // a buffer sized from the stale count is a soft upper bound only
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn kill_signals_every_permitted_member() {
        let tree = ProcessTree::new();
        let r = tree.fork(tree.init_pid());
        acquire(&tree, r.get_pid());
        let members: Vec<Pid> = (0..5).map(|_| tree.fork(r.get_pid()).get_pid()).collect();
        let denied = [members[1], members[3]];
        let policy = StubPolicy::new(r.get_pid()).deny_signal(&denied);
        let recorder = Recorder::default();
        let mut rk = ReapKill::new(SIGTERM as i32, 0, 0);
        let mut guard = tree.lock_shared();
        reap_kill(&mut guard, &policy, &recorder, &r, &mut rk).unwrap();
        drop(guard);
        assert_eq!(rk.killed, 3);
        assert_eq!(rk.first_failed, None);
        assert_eq!(recorder.delivered(), 3);
        assert!(!recorder.saw(denied[0]) && !recorder.saw(denied[1]));
    }

    #[test]
    fn kill_reports_the_first_failure_only_when_nothing_succeeded() {
        let tree = ProcessTree::new();
        let r = tree.fork(tree.init_pid());
        acquire(&tree, r.get_pid());
        let a = tree.fork(r.get_pid());
        let b = tree.fork(r.get_pid());
        let policy = StubPolicy::new(r.get_pid()).deny_signal(&[a.get_pid(), b.get_pid()]);
        let recorder = Recorder::default();
        let mut rk = ReapKill::new(SIGTERM as i32, 0, 0);
        let mut guard = tree.lock_shared();
        let res = reap_kill(&mut guard, &policy, &recorder, &r, &mut rk);
        drop(guard);
        assert!(matches!(res, Err(LinuxError::EPERM)));
        assert_eq!(rk.killed, 0);
        // members are tried in adoption order
        assert_eq!(rk.first_failed, Some(a.get_pid()));
    }

    #[test]
    fn kill_with_empty_candidate_set_is_esrch() {
        let tree = ProcessTree::new();
        let r = tree.fork(tree.init_pid());
        acquire(&tree, r.get_pid());
        let recorder = Recorder::default();
        let mut rk = ReapKill::new(SIGKILL as i32, 0, 0);
        let mut guard = tree.lock_shared();
        let res = reap_kill(&mut guard, &StubPolicy::new(r.get_pid()), &recorder, &r, &mut rk);
        assert!(matches!(res, Err(LinuxError::ESRCH)));
        assert_eq!(rk.killed, 0);
    }

    #[test]
    fn kill_children_scope_never_reaches_grandchildren() {
        let tree = ProcessTree::new();
        let r = tree.fork(tree.init_pid());
        acquire(&tree, r.get_pid());
        let child = tree.fork(r.get_pid());
        let grandchild = tree.fork(child.get_pid());
        let recorder = Recorder::default();
        // the grandchild carries the same subtree tag as the child
        let mut rk = ReapKill::new(
            SIGTERM as i32,
            (ReapKillFlags::CHILDREN | ReapKillFlags::SUBTREE).bits(),
            child.get_pid(),
        );
        let mut guard = tree.lock_shared();
        reap_kill(&mut guard, &StubPolicy::new(r.get_pid()), &recorder, &r, &mut rk).unwrap();
        drop(guard);
        assert_eq!(rk.killed, 1);
        assert!(recorder.saw(child.get_pid()));
        assert!(!recorder.saw(grandchild.get_pid()));
    }

    #[test]
    fn kill_subtree_filter_selects_one_branch() {
        let tree = ProcessTree::new();
        let r = tree.fork(tree.init_pid());
        acquire(&tree, r.get_pid());
        let left = tree.fork(r.get_pid());
        let right = tree.fork(r.get_pid());
        let left_leaf = tree.fork(left.get_pid());
        let right_leaf = tree.fork(right.get_pid());
        let recorder = Recorder::default();
        let mut rk = ReapKill::new(
            SIGTERM as i32,
            ReapKillFlags::SUBTREE.bits(),
            left.get_pid(),
        );
        let mut guard = tree.lock_shared();
        reap_kill(&mut guard, &StubPolicy::new(r.get_pid()), &recorder, &r, &mut rk).unwrap();
        drop(guard);
        assert_eq!(rk.killed, 2);
        assert!(recorder.saw(left.get_pid()) && recorder.saw(left_leaf.get_pid()));
        assert!(!recorder.saw(right.get_pid()) && !recorder.saw(right_leaf.get_pid()));
    }

    #[test]
    fn kill_refuses_a_restricted_context_before_touching_anyone() {
        let tree = ProcessTree::new();
        let r = tree.fork(tree.init_pid());
        acquire(&tree, r.get_pid());
        tree.fork(r.get_pid());
        let policy = StubPolicy::new(r.get_pid()).restricted();
        let recorder = Recorder::default();
        let mut rk = ReapKill::new(SIGKILL as i32, 0, 0);
        let mut guard = tree.lock_shared();
        let res = reap_kill(&mut guard, &policy, &recorder, &r, &mut rk);
        assert!(matches!(res, Err(LinuxError::EACCES)));
        assert_eq!(recorder.delivered(), 0);
    }
}
