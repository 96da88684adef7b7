//! Serial device holders
//!
//! Other processes (a forgotten `screen`, `minicom`, a previous run) keep the
//! console device open and steal its input. Before opening the device in
//! serial mode their PIDs are looked up with `lsof -t` (or `fuser` when lsof
//! is unavailable) and terminated: SIGTERM, a short grace period, SIGKILL.

use std::process::Command;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Time holders get to exit after SIGTERM
pub const TERM_GRACE: Duration = Duration::from_millis(500);

/// Extract PIDs from `lsof -t` / `fuser` output.
///
/// `fuser` may append access letters (`1234c`); those are ignored.
pub fn parse_pids(output: &str) -> Vec<u32> {
    let mut pids: Vec<u32> = output
        .split(|c: char| c.is_whitespace() || c == ':')
        .filter_map(|token| {
            let digits: String = token.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
        .filter(|pid| *pid > 0)
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

fn run_lookup(program: &str, args: &[&str]) -> Option<String> {
    match Command::new(program).args(args).output() {
        Ok(out) => Some(String::from_utf8_lossy(&out.stdout).into_owned()),
        Err(e) => {
            debug!(program, "holder lookup unavailable: {e}");
            None
        }
    }
}

/// PIDs of processes holding `device`, excluding this process
pub fn find_holders(device: &str) -> Vec<u32> {
    let output = run_lookup("lsof", &["-t", device]).or_else(|| run_lookup("fuser", &[device]));
    let own = std::process::id();
    output
        .map(|o| parse_pids(&o))
        .unwrap_or_default()
        .into_iter()
        .filter(|pid| *pid != own)
        .collect()
}

#[cfg(unix)]
mod signals {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    fn pid(raw: u32) -> Option<Pid> {
        i32::try_from(raw).ok().map(Pid::from_raw)
    }

    pub fn alive(raw: u32) -> bool {
        pid(raw).is_some_and(|p| !matches!(kill(p, None), Err(Errno::ESRCH)))
    }

    pub fn terminate(raw: u32) -> bool {
        pid(raw).is_some_and(|p| kill(p, Signal::SIGTERM).is_ok())
    }

    pub fn force_kill(raw: u32) -> bool {
        pid(raw).is_some_and(|p| kill(p, Signal::SIGKILL).is_ok())
    }
}

#[cfg(not(unix))]
mod signals {
    pub fn alive(_raw: u32) -> bool {
        false
    }

    pub fn terminate(_raw: u32) -> bool {
        false
    }

    pub fn force_kill(_raw: u32) -> bool {
        false
    }
}

/// SIGTERM every PID, wait up to `grace`, SIGKILL the rest.
///
/// Returns the PIDs that were signalled.
pub fn terminate_pids(pids: &[u32], grace: Duration) -> Vec<u32> {
    let signalled: Vec<u32> = pids.iter().copied().filter(|p| signals::terminate(*p)).collect();
    if signalled.is_empty() {
        return signalled;
    }

    let started = Instant::now();
    while started.elapsed() < grace && signalled.iter().any(|p| signals::alive(*p)) {
        std::thread::sleep(Duration::from_millis(50));
    }

    for pid in signalled.iter().copied().filter(|p| signals::alive(*p)) {
        warn!(pid, "holder ignored SIGTERM, sending SIGKILL");
        signals::force_kill(pid);
    }
    signalled
}

/// Find and terminate everything holding `device`
pub fn release_device(device: &str, grace: Duration) -> Vec<u32> {
    let holders = find_holders(device);
    if holders.is_empty() {
        return holders;
    }
    debug!(device, ?holders, "terminating serial holders");
    terminate_pids(&holders, grace)
}
