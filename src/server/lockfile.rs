//! UUCP-style device lock check.
//!
//! Another program (a fax or dial-out tool) that wants the modem drops a
//! `LCK..<tty>` file holding its PID. While it is present the daemon lets go
//! of the device. A lock whose PID is gone is stale and is removed.

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::path::Path;

/// PID stored in a lock file, text or 4-byte native binary.
fn lock_pid(contents: &[u8]) -> Option<i32> {
    let text = String::from_utf8_lossy(contents);
    if let Ok(pid) = text.trim().parse::<i32>() {
        return Some(pid);
    }
    let raw: [u8; 4] = contents.try_into().ok()?;
    Some(i32::from_ne_bytes(raw))
}

/// True when a foreign, live process holds the lock.
pub fn is_locked(path: &Path) -> bool {
    let contents = match std::fs::read(path) {
        Ok(c) => c,
        Err(_) => return false,
    };
    let pid = match lock_pid(&contents) {
        Some(pid) if pid > 0 => pid,
        _ => {
            debug!("{} holds no usable PID, honoring it", path.display());
            return true;
        }
    };
    if pid as u32 == std::process::id() {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => {
            match std::fs::remove_file(path) {
                Ok(()) => warn!("Removed stale lockfile {} (pid {})", path.display(), pid),
                Err(e) => warn!("Stale lockfile {} not removed: {}", path.display(), e),
            }
            false
        }
    }
}
