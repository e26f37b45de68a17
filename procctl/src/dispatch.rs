//! Target resolution and dispatch: validate the request, take the tree lock
//! in the mode the operation needs, expand the target selector and apply
//! the operation, aggregating group results best-effort.

use crate::imp::{protect, reaper, trace};
use crate::policy::{ControlPolicy, SignalDelivery};
use crate::procctl_instrument;
use crate::types::{
    ControlRequest, ProtectFlags, ReapKillFlags, SIG_MAXSIG, TRACE_CTL_DISABLE,
    TRACE_CTL_DISABLE_EXEC, TRACE_CTL_ENABLE,
};
use alloc::sync::Arc;
use axerrno::{LinuxError, LinuxResult};
use osprey_process::Pid;
use osprey_process::process::{ProcFlags, ProcessNode};
use osprey_process::tree::{ProcessTree, TreeGuard};

/// Target selector of a control request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSelector {
    Pid(Pid),
    ProcessGroup(Pid),
}

/// Boundary validation, before any lock is taken or any target resolved:
/// unknown flag bits, malformed operation codes and out-of-range signal
/// numbers are all rejected here.
fn validate(req: &ControlRequest<'_>) -> LinuxResult<()> {
    match req {
        ControlRequest::SetProtect(raw) => {
            let flags = ProtectFlags::from_bits(*raw).ok_or(LinuxError::EINVAL)?;
            // exactly one of set / clear
            if flags.contains(ProtectFlags::SET) == flags.contains(ProtectFlags::CLEAR) {
                return Err(LinuxError::EINVAL);
            }
            Ok(())
        }
        ControlRequest::ReapKill(rk) => {
            if rk.sig <= 0 || rk.sig > SIG_MAXSIG {
                return Err(LinuxError::EINVAL);
            }
            ReapKillFlags::from_bits(rk.flags).ok_or(LinuxError::EINVAL)?;
            Ok(())
        }
        ControlRequest::TraceCtl(state) => match *state {
            TRACE_CTL_ENABLE | TRACE_CTL_DISABLE | TRACE_CTL_DISABLE_EXEC => Ok(()),
            _ => Err(LinuxError::EINVAL),
        },
        _ => Ok(()),
    }
}

fn procctl_single(
    guard: &mut TreeGuard<'_>,
    policy: &dyn ControlPolicy,
    delivery: &dyn SignalDelivery,
    p: &Arc<ProcessNode>,
    req: &mut ControlRequest<'_>,
) -> LinuxResult<()> {
    match req {
        ControlRequest::SetProtect(raw) => {
            protect::protect_set(guard, policy, p, ProtectFlags::from_bits_truncate(*raw))
        }
        ControlRequest::ReapAcquire => reaper::reap_acquire(guard, policy, p),
        ControlRequest::ReapRelease => reaper::reap_release(guard, policy, p),
        ControlRequest::ReapStatus(rs) => reaper::reap_status(guard, p, rs),
        ControlRequest::ReapGetPids { count, dst } => {
            reaper::reap_getpids(guard, p, *count, &mut **dst)
        }
        ControlRequest::ReapKill(rk) => reaper::reap_kill(guard, policy, delivery, p, rk),
        ControlRequest::TraceCtl(state) => trace::trace_ctl(policy, p, *state),
        ControlRequest::TraceStatus(out) => trace::trace_status(p, out),
    }
}

procctl_instrument! {
/// Entry point of the process-control interface: resolve `selector` to one
/// process or a whole process group and apply `req`.
///
/// Group targets are best-effort: members that are still initializing or
/// not visible to the caller are skipped silently, and the request succeeds
/// as soon as one member accepts it. When members were attempted but none
/// succeeded, the first error (in iteration order) is reported; when no
/// member was visible at all, the group is treated as nonexistent.
pub fn kern_procctl(
    tree: &ProcessTree,
    policy: &dyn ControlPolicy,
    delivery: &dyn SignalDelivery,
    selector: ProcessSelector,
    req: &mut ControlRequest<'_>,
) -> LinuxResult<()> {
    debug!("[procctl] {} on {:?} begin", req.name(), selector);
    if req.single_only() && !matches!(selector, ProcessSelector::Pid(_)) {
        return Err(LinuxError::EINVAL);
    }
    validate(req)?;
    let mut guard = match req {
        ControlRequest::ReapAcquire | ControlRequest::ReapRelease => tree.lock_exclusive(),
        ControlRequest::TraceStatus(_) => tree.unlocked(),
        _ => tree.lock_shared(),
    };
    match selector {
        ProcessSelector::Pid(pid) => {
            let Some(p) = tree.process(pid) else {
                return Err(LinuxError::ESRCH);
            };
            {
                let attrs = p.attrs.lock();
                policy.can_see(pid, &attrs)?;
            }
            procctl_single(&mut guard, policy, delivery, &p, req)
        }
        ProcessSelector::ProcessGroup(pgid) => {
            let Some(group) = tree.process_group(pgid) else {
                return Err(LinuxError::ESRCH);
            };
            let mut ok = false;
            let mut first_error: Option<LinuxError> = None;
            for p in group.get_processes() {
                let skip = {
                    let attrs = p.attrs.lock();
                    attrs.flags.contains(ProcFlags::NEW)
                        || policy.can_see(p.get_pid(), &attrs).is_err()
                };
                if skip {
                    continue;
                }
                match procctl_single(&mut guard, policy, delivery, &p, req) {
                    Ok(()) => ok = true,
                    Err(err) => {
                        if first_error.is_none() {
                            first_error = Some(err);
                        }
                    }
                }
            }
            if ok {
                Ok(())
            } else if let Some(err) = first_error {
                Err(err)
            } else {
                // not one member of the group was visible
                Err(LinuxError::ESRCH)
            }
        }
    }
}
}
