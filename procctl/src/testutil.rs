//! Stand-ins for the collaborator seams, shared by the unit tests.

use crate::policy::{ControlPolicy, SignalDelivery};
use axerrno::{LinuxError, LinuxResult};
use osprey_process::Pid;
use osprey_process::process::NodeAttrs;
use std::sync::Mutex;

pub struct StubPolicy {
    caller: Pid,
    privileged: bool,
    restricted: bool,
    deny_sched: Vec<Pid>,
    deny_signal: Vec<Pid>,
    invisible: Vec<Pid>,
}

impl StubPolicy {
    pub fn new(caller: Pid) -> Self {
        Self {
            caller,
            privileged: true,
            restricted: false,
            deny_sched: Vec::new(),
            deny_signal: Vec::new(),
            invisible: Vec::new(),
        }
    }

    pub fn without_privilege(mut self) -> Self {
        self.privileged = false;
        self
    }

    pub fn restricted(mut self) -> Self {
        self.restricted = true;
        self
    }

    pub fn deny_sched(mut self, pids: &[Pid]) -> Self {
        self.deny_sched.extend_from_slice(pids);
        self
    }

    pub fn deny_signal(mut self, pids: &[Pid]) -> Self {
        self.deny_signal.extend_from_slice(pids);
        self
    }

    pub fn invisible(mut self, pids: &[Pid]) -> Self {
        self.invisible.extend_from_slice(pids);
        self
    }
}

impl ControlPolicy for StubPolicy {
    fn caller_pid(&self) -> Pid {
        self.caller
    }

    fn can_see(&self, pid: Pid, _attrs: &NodeAttrs) -> LinuxResult<()> {
        if self.invisible.contains(&pid) {
            Err(LinuxError::ESRCH)
        } else {
            Ok(())
        }
    }

    fn can_sched(&self, pid: Pid, _attrs: &NodeAttrs) -> LinuxResult<()> {
        if self.deny_sched.contains(&pid) {
            Err(LinuxError::EPERM)
        } else {
            Ok(())
        }
    }

    fn can_signal(&self, pid: Pid, _attrs: &NodeAttrs, _sig: i32) -> LinuxResult<()> {
        if self.deny_signal.contains(&pid) {
            Err(LinuxError::EPERM)
        } else {
            Ok(())
        }
    }

    fn check_protect_privilege(&self) -> LinuxResult<()> {
        if self.privileged {
            Ok(())
        } else {
            Err(LinuxError::EPERM)
        }
    }

    fn in_restricted_context(&self) -> bool {
        self.restricted
    }
}

/// Records every delivery instead of posting a signal.
#[derive(Default)]
pub struct Recorder {
    log: Mutex<Vec<(Pid, i32)>>,
}

impl Recorder {
    pub fn delivered(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    pub fn saw(&self, pid: Pid) -> bool {
        self.log.lock().unwrap().iter().any(|&(p, _)| p == pid)
    }
}

impl SignalDelivery for Recorder {
    fn deliver(&self, pid: Pid, _attrs: &mut NodeAttrs, sig: i32) {
        self.log.lock().unwrap().push((pid, sig));
    }
}
