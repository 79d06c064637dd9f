//! PID file, held with an advisory lock for the life of the daemon.

use fs2::FileExt;
use log::{info, warn};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::CidError;

#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
    file: File,
}

fn pid_alive(pid: i32) -> bool {
    pid > 0 && matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

impl PidFile {
    /// Write our PID to `path`. Fails when another live daemon owns it.
    pub fn create(path: &Path) -> Result<Self, CidError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let mut existing = String::new();
        file.read_to_string(&mut existing)?;
        if let Ok(pid) = existing.trim().parse::<i32>() {
            if pid as u32 != std::process::id() && pid_alive(pid) {
                return Err(CidError::Config(format!(
                    "pidfile {} held by running process {}",
                    path.display(),
                    pid
                )));
            }
        }

        file.try_lock_exclusive().map_err(|_| {
            CidError::Config(format!("pidfile {} is locked", path.display()))
        })?;
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "{}", std::process::id())?;
        file.flush()?;
        info!("Wrote pid {} in pidfile: {}", std::process::id(), path.display());
        Ok(PidFile {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(self) {
        let _ = self.file.unlock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!("Removed pidfile: {}", self.path.display()),
            Err(e) => warn!("Cannot remove pidfile {}: {}", self.path.display(), e),
        }
    }
}
