//! Error taxonomy for the relay daemon.
//!
//! Fatal faults (device and setup) surface as [`CidError`] and end the process.
//! Client and protocol faults never reach this type; the multiplexer logs them
//! and drops the offending client or line.

use std::path::PathBuf;
use thiserror::Error;

use crate::policy::PolicyError;

#[derive(Debug, Error)]
pub enum CidError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("poll failed: {0}")]
    Poll(#[from] nix::errno::Errno),

    /// The Caller-ID device failed after it was established.
    #[error("fatal device fault: {0}")]
    DeviceFault(String),

    #[error("modem: {0}")]
    Modem(String),

    #[error("TTY lockfile exists: {}", .0.display())]
    Locked(PathBuf),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error("connection table full ({0} slots)")]
    Capacity(usize),
}
