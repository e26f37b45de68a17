//! Request and reply records of the control interface.

use crate::policy::ReapPidsSink;
use osprey_process::Pid;

/// Highest deliverable signal number.
pub const SIG_MAXSIG: i32 = 64;

/// Trace-control states accepted by the trace toggle.
pub const TRACE_CTL_ENABLE: i32 = 1;
pub const TRACE_CTL_DISABLE: i32 = 2;
pub const TRACE_CTL_DISABLE_EXEC: i32 = 3;

bitflags::bitflags! {
    /// Payload of a protection change: exactly one of `SET`/`CLEAR`, plus
    /// the optional subtree and inheritance qualifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProtectFlags: u32 {
        const SET = 0x1;
        const CLEAR = 0x2;
        /// Apply to the whole subtree below the target as well.
        const DESCEND = 0x10;
        /// Children forked later inherit the protection.
        const INHERIT = 0x20;
    }
}

bitflags::bitflags! {
    /// Scope qualifiers of the reaper kill operation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReapKillFlags: u32 {
        /// Signal only the reaper's direct children instead of the whole
        /// adopted set.
        const CHILDREN = 0x1;
        /// Signal only members whose recorded subtree tag matches.
        const SUBTREE = 0x2;
    }
}

bitflags::bitflags! {
    /// Per-record qualifiers of the enumerate reply.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ReapPidFlags: u32 {
        const VALID = 0x1;
        /// The member is a direct child of the reaper.
        const CHILD = 0x2;
    }
}

/// Snapshot answer of the reaper status query. The counts are taken from
/// the reap list actually walked, so they cannot drift from it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaperStatus {
    /// The effective reaper of the queried process (itself when marked).
    pub reaper: Pid,
    /// Whether that reaper is the root reaper of last resort.
    pub last_resort: bool,
    /// Adopted members still directly parented by the reaper.
    pub children: u32,
    /// Size of the whole adopted set.
    pub descendants: u32,
    /// One direct child, when the adopted set is not empty.
    pub first_child: Option<Pid>,
}

/// One member record of the enumerate reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReapPidInfo {
    pub pid: Pid,
    /// Subtree tag recorded when the member was adopted.
    pub subtree: u32,
    pub flags: ReapPidFlags,
}

/// In/out record of the reaper kill operation. The counters are written
/// back even when the overall result is an error.
#[derive(Debug)]
pub struct ReapKill {
    pub sig: i32,
    pub flags: u32,
    /// Tag filter, consulted when `flags` carries `SUBTREE`.
    pub subtree: u32,
    /// Members actually signalled.
    pub killed: u32,
    /// First member refused by the signal-permission check, reported when
    /// nothing succeeded.
    pub first_failed: Option<Pid>,
}

impl ReapKill {
    pub fn new(sig: i32, flags: u32, subtree: u32) -> Self {
        Self {
            sig,
            flags,
            subtree,
            killed: 0,
            first_failed: None,
        }
    }
}

/// Answer of the trace status query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TraceStatus {
    /// Tracing permanently disabled (-1 on the wire).
    Disabled,
    #[default]
    NotTraced,
    TracedBy(Pid),
}

impl TraceStatus {
    pub fn as_raw(&self) -> i32 {
        match self {
            TraceStatus::Disabled => -1,
            TraceStatus::NotTraced => 0,
            TraceStatus::TracedBy(pid) => *pid as i32,
        }
    }
}

/// One control request: the operation code plus its in/out payload. Out
/// payloads are caller-supplied records written in place, the way the
/// boundary layer copies results back out.
pub enum ControlRequest<'a> {
    SetProtect(u32),
    ReapAcquire,
    ReapRelease,
    ReapStatus(&'a mut ReaperStatus),
    ReapGetPids {
        count: usize,
        dst: &'a mut dyn ReapPidsSink,
    },
    ReapKill(&'a mut ReapKill),
    TraceCtl(i32),
    TraceStatus(&'a mut TraceStatus),
}

impl ControlRequest<'_> {
    /// Operations that only make sense against a single process.
    pub fn single_only(&self) -> bool {
        !matches!(self, Self::SetProtect(_) | Self::TraceCtl(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetProtect(_) => "set_protect",
            Self::ReapAcquire => "reap_acquire",
            Self::ReapRelease => "reap_release",
            Self::ReapStatus(_) => "reap_status",
            Self::ReapGetPids { .. } => "reap_getpids",
            Self::ReapKill(_) => "reap_kill",
            Self::TraceCtl(_) => "trace_ctl",
            Self::TraceStatus(_) => "trace_status",
        }
    }
}
