//! Collaborator seams: permission predicates, the signal-delivery primitive
//! and the caller-buffer transfer used by enumeration.

use crate::types::ReapPidInfo;
use axerrno::LinuxResult;
use osprey_process::Pid;
use osprey_process::process::NodeAttrs;

/// Caller identity and the permission/visibility predicates consulted by
/// the control operations. Predicates receive the target's locked
/// attribute view and must not take further locks.
pub trait ControlPolicy {
    /// Identifier of the calling process.
    fn caller_pid(&self) -> Pid;

    /// May the caller observe the target at all? An error hides the target
    /// as if it did not exist.
    fn can_see(&self, pid: Pid, attrs: &NodeAttrs) -> LinuxResult<()>;

    /// May the caller adjust the target's scheduling-related attributes?
    fn can_sched(&self, pid: Pid, attrs: &NodeAttrs) -> LinuxResult<()>;

    /// May the caller deliver `sig` to the target?
    fn can_signal(&self, pid: Pid, attrs: &NodeAttrs, sig: i32) -> LinuxResult<()>;

    /// Privilege gate for protection changes.
    fn check_protect_privilege(&self) -> LinuxResult<()>;

    /// Whether the caller runs inside a restricted execution context; the
    /// bulk kill operation refuses to run there.
    fn in_restricted_context(&self) -> bool;
}

/// The signal-delivery primitive. Invoked with the target's attribute lock
/// held, for the duration of the permission check and the delivery only.
pub trait SignalDelivery {
    fn deliver(&self, pid: Pid, attrs: &mut NodeAttrs, sig: i32);
}

/// Destination of the enumerate transfer. The transfer may block; it is
/// called with the tree lock released.
pub trait ReapPidsSink {
    fn transfer(&mut self, records: &[ReapPidInfo]) -> LinuxResult<()>;
}

impl ReapPidsSink for alloc::vec::Vec<ReapPidInfo> {
    fn transfer(&mut self, records: &[ReapPidInfo]) -> LinuxResult<()> {
        self.extend_from_slice(records);
        Ok(())
    }
}

/// Fully privileged caller, used by in-kernel consumers of the dispatcher.
pub struct Unrestricted(pub Pid);

impl ControlPolicy for Unrestricted {
    fn caller_pid(&self) -> Pid {
        self.0
    }

    fn can_see(&self, _pid: Pid, _attrs: &NodeAttrs) -> LinuxResult<()> {
        Ok(())
    }

    fn can_sched(&self, _pid: Pid, _attrs: &NodeAttrs) -> LinuxResult<()> {
        Ok(())
    }

    fn can_signal(&self, _pid: Pid, _attrs: &NodeAttrs, _sig: i32) -> LinuxResult<()> {
        Ok(())
    }

    fn check_protect_privilege(&self) -> LinuxResult<()> {
        Ok(())
    }

    fn in_restricted_context(&self) -> bool {
        false
    }
}

/// Delivery sink that drops the signal, for operations that never deliver.
pub struct NullDelivery;

impl SignalDelivery for NullDelivery {
    fn deliver(&self, _pid: Pid, _attrs: &mut NodeAttrs, _sig: i32) {}
}
