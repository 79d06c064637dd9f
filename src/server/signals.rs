//! Signal flags.
//!
//! Handlers never touch server state. Each signal sets one atomic flag that
//! the poll loop consumes at the top of its next iteration.

use log::info;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};

#[derive(Debug, Clone, Default)]
pub struct SignalFlags {
    /// SIGHUP: re-read alias and list files.
    pub reload: Arc<AtomicBool>,
    /// SIGUSR1: swap in `<cidlog>.new` at the next quiet tick.
    pub rotate: Arc<AtomicBool>,
    /// SIGUSR2: log the connection table.
    pub show: Arc<AtomicBool>,
    pub shutdown: Arc<AtomicBool>,
}

impl SignalFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read and clear a flag.
    pub fn take(flag: &AtomicBool) -> bool {
        flag.swap(false, Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Install listeners on the current tokio runtime.
    pub fn listen(&self) -> std::io::Result<()> {
        let table = [
            (SignalKind::hangup(), "SIGHUP", self.reload.clone()),
            (SignalKind::user_defined1(), "SIGUSR1", self.rotate.clone()),
            (SignalKind::user_defined2(), "SIGUSR2", self.show.clone()),
            (SignalKind::interrupt(), "SIGINT", self.shutdown.clone()),
            (SignalKind::terminate(), "SIGTERM", self.shutdown.clone()),
            (SignalKind::quit(), "SIGQUIT", self.shutdown.clone()),
        ];
        for (kind, name, flag) in table {
            let mut stream = signal(kind)?;
            tokio::spawn(async move {
                while stream.recv().await.is_some() {
                    info!("Received {}", name);
                    flag.store(true, Ordering::SeqCst);
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_clears_flag() {
        let flags = SignalFlags::new();
        flags.rotate.store(true, Ordering::SeqCst);
        assert!(SignalFlags::take(&flags.rotate));
        assert!(!SignalFlags::take(&flags.rotate));
    }

    #[tokio::test]
    async fn sighup_sets_reload() {
        let flags = SignalFlags::new();
        flags.listen().unwrap();
        nix::sys::signal::raise(nix::sys::signal::Signal::SIGHUP).unwrap();
        for _ in 0..50 {
            if flags.reload.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(SignalFlags::take(&flags.reload));
    }
}
