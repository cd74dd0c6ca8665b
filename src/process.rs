//! Process-group signalling shared by the command runner and the local backend.
//!
//! Children are spawned as leaders of their own process group so that a
//! single signal reaches everything they forked.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Send `signal` to the process group led by `pid`.
///
/// Returns false when the group no longer exists.
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: Signal) -> bool {
    let result = unsafe { libc::killpg(pid as libc::pid_t, signal.as_raw()) };
    result == 0
}

#[cfg(not(unix))]
pub fn signal_group(_pid: u32, _signal: Signal) -> bool {
    false
}

/// Whether a process with `pid` still exists and is not a zombie.
#[cfg(target_os = "linux")]
pub fn process_alive(pid: u32) -> bool {
    match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
        // The state field follows the parenthesised command name
        Ok(stat) => stat
            .rsplit_once(')')
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .is_some_and(|state| state != "Z" && state != "X"),
        Err(_) => false,
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn process_alive(pid: u32) -> bool {
    let result = unsafe { libc::kill(pid as libc::pid_t, 0) };
    result == 0
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    false
}
