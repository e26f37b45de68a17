//! The trace-control state machine: may a debugger ever attach?

use crate::policy::ControlPolicy;
use crate::types::{TRACE_CTL_DISABLE, TRACE_CTL_DISABLE_EXEC, TRACE_CTL_ENABLE, TraceStatus};
use alloc::sync::Arc;
use axerrno::{LinuxError, LinuxResult};
use osprey_process::process::{ProcFlags, ProcessNode};

/// Toggle debuggability. The exec-only qualifier can only be lifted by the
/// process itself; everyone else sees their demotion attempt refused.
pub fn trace_ctl(policy: &dyn ControlPolicy, p: &Arc<ProcessNode>, state: i32) -> LinuxResult<()> {
    let mut attrs = p.attrs.lock();
    // an attached debugger or live tracing state blocks any toggle
    if attrs.flags.contains(ProcFlags::TRACED) || attrs.trace_busy {
        return Err(LinuxError::EBUSY);
    }
    match state {
        TRACE_CTL_ENABLE => {
            if policy.caller_pid() != p.get_pid() {
                return Err(LinuxError::EPERM);
            }
            attrs
                .flags
                .remove(ProcFlags::NOTRACE | ProcFlags::NOTRACE_EXEC);
        }
        TRACE_CTL_DISABLE_EXEC => {
            attrs
                .flags
                .insert(ProcFlags::NOTRACE | ProcFlags::NOTRACE_EXEC);
        }
        TRACE_CTL_DISABLE => {
            if attrs.flags.contains(ProcFlags::NOTRACE_EXEC) {
                assert!(
                    attrs.flags.contains(ProcFlags::NOTRACE),
                    "[procctl] dangling exec-only trace disable on {}",
                    p.get_pid()
                );
                if policy.caller_pid() != p.get_pid() {
                    return Err(LinuxError::EPERM);
                }
                attrs.flags.remove(ProcFlags::NOTRACE_EXEC);
            } else {
                attrs.flags.insert(ProcFlags::NOTRACE);
            }
        }
        _ => return Err(LinuxError::EINVAL),
    }
    Ok(())
}

/// Read-only status: permanently disabled, traced by whom, or neither.
/// Takes only the node's own lock.
pub fn trace_status(p: &Arc<ProcessNode>, out: &mut TraceStatus) -> LinuxResult<()> {
    let attrs = p.attrs.lock();
    *out = if attrs.flags.contains(ProcFlags::NOTRACE) {
        debug_assert!(
            !attrs.flags.contains(ProcFlags::TRACED),
            "[procctl] {} traced but tracing disabled",
            p.get_pid()
        );
        TraceStatus::Disabled
    } else if attrs.flags.contains(ProcFlags::TRACED) {
        TraceStatus::TracedBy(attrs.tracer.expect("[procctl] traced process without tracer"))
    } else {
        TraceStatus::NotTraced
    };
    Ok(())
}
