//! # Connection multiplexer
//!
//! [`CidServer`] owns every descriptor the daemon uses (the Caller-ID
//! device, the listening socket, and the client sockets) in one
//! [`SlotTable`] and drives them from a single `poll(2)` loop with a short
//! timeout. There are no worker threads: device lines, client lines and
//! timeout housekeeping are all handled inline, slots in ascending index
//! order.
//!
//! Signals never touch this state directly; see [`signals::SignalFlags`].
//!
//! ```rust,no_run
//! use cidrelay::config::Config;
//! use cidrelay::server::CidServer;
//!
//! # fn main() -> Result<(), cidrelay::error::CidError> {
//! let config = Config::default();
//! let mut server = CidServer::new(config)?;
//! server.start()?;
//! server.run()?;
//! # Ok(())
//! # }
//! ```

pub mod framer;
pub mod handler;
pub mod lockfile;
pub mod signals;
pub mod sink;
pub mod slots;

use log::{debug, error, info, trace, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{SockaddrLike, SockaddrStorage};
use std::ffi::CStr;
use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::path::PathBuf;

use crate::cid::clock::stamp;
use crate::cid::{Clock, Emit, FormatterOptions, LineFormatter, SystemClock};
use crate::config::Config;
use crate::device::{modem::HANGUP, SerialDevice};
use crate::error::CidError;
use crate::helpers::{HelperRunner, ScriptHelpers};
use crate::logutil::escape_log;
use crate::pidfile::PidFile;
use crate::policy::{CallerPolicy, ListPolicy};
use crate::protocol::{
    api_announce, server_announce, LOG_NOT_SENT, OPT_HANGUP, STARTUP_DONE,
};
use signals::SignalFlags;
use sink::{send_line, Sink};
pub use slots::{Client, SlotTable};

/// Poll wait in milliseconds. Ring silence is counted in these ticks.
pub const POLL_TIMEOUT_MS: u16 = 200;

/// Consecutive empty reads after which the device is considered gone.
pub const ZERO_READ_LIMIT: u32 = 10;

pub enum Slot {
    Device(SerialDevice),
    Listener(TcpListener),
    Client(Client),
}

impl AsRawFd for Slot {
    fn as_raw_fd(&self) -> RawFd {
        match self {
            Slot::Device(d) => d.as_raw_fd(),
            Slot::Listener(l) => l.as_raw_fd(),
            Slot::Client(c) => c.stream.as_raw_fd(),
        }
    }
}

/// Reverse lookup of a peer address.
fn lookup_host(addr: &SocketAddr) -> Result<String, String> {
    let sa = SockaddrStorage::from(*addr);
    let mut host = [0 as libc::c_char; 1025];
    // SAFETY: sa points at a valid sockaddr of sa.len() bytes; host is a
    // writable buffer of the length passed.
    let rc = unsafe {
        libc::getnameinfo(
            sa.as_ptr(),
            sa.len(),
            host.as_mut_ptr(),
            host.len() as libc::socklen_t,
            std::ptr::null_mut(),
            0,
            0,
        )
    };
    if rc != 0 {
        // SAFETY: gai_strerror returns a static NUL-terminated string.
        let msg = unsafe { CStr::from_ptr(libc::gai_strerror(rc)) };
        return Err(msg.to_string_lossy().into_owned());
    }
    // SAFETY: getnameinfo NUL-terminates host on success.
    let name = unsafe { CStr::from_ptr(host.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}

fn describe_peer(addr: &SocketAddr) -> String {
    match lookup_host(addr) {
        Ok(host) => format!("{} ({})", host, addr),
        Err(e) => format!("{} [hostname lookup error: {}]", addr, e),
    }
}

fn send_banner(
    stream: &mut TcpStream,
    config: &Config,
    sink: &Sink,
    clock: &dyn Clock,
    hangup: bool,
) -> io::Result<()> {
    send_line(stream, &server_announce())?;
    send_line(stream, &api_announce())?;
    if config.server.send_cidlog {
        sink.send_log(stream, clock)?;
    } else {
        send_line(stream, LOG_NOT_SENT)?;
    }
    if hangup {
        send_line(stream, OPT_HANGUP)?;
    }
    send_line(stream, STARTUP_DONE)
}

pub struct CidServer {
    config: Config,
    slots: SlotTable<Slot>,
    formatter: LineFormatter,
    policy: Box<dyn CallerPolicy + Send>,
    helpers: Box<dyn HelperRunner + Send>,
    clock: Box<dyn Clock + Send>,
    sink: Sink,
    flags: SignalFlags,
    /// Index of the device slot; kept while the slot is reserved for a lock.
    device_slot: Option<usize>,
    /// A foreign program holds the device lock and we let go of the modem.
    device_yielded: bool,
    zero_reads: u32,
    pending_rotate: bool,
    lockfile: PathBuf,
    server_log: Option<PathBuf>,
    pidfile: Option<PidFile>,
}

impl CidServer {
    /// Server with the file-backed policy, subprocess helpers and the local clock.
    pub fn new(config: Config) -> Result<Self, CidError> {
        let policy = ListPolicy::load(&config.lists)?;
        info!("Processed alias file: {} aliases", policy.alias_count());
        Ok(Self::with_parts(
            config,
            Box::new(policy),
            Box::new(ScriptHelpers),
            Box::new(SystemClock),
        ))
    }

    pub fn with_parts(
        config: Config,
        policy: Box<dyn CallerPolicy + Send>,
        helpers: Box<dyn HelperRunner + Send>,
        clock: Box<dyn Clock + Send>,
    ) -> Self {
        let device_slots = usize::from(!config.device.noserial);
        let capacity = config.server.max_clients + 1 + device_slots;
        let server_log = config.logging.file.as_ref().map(PathBuf::from);
        CidServer {
            slots: SlotTable::new(capacity),
            formatter: LineFormatter::new(FormatterOptions::from_config(&config)),
            sink: Sink::new(&config.logs),
            lockfile: config.device.lockfile_path(),
            config,
            policy,
            helpers,
            clock,
            flags: SignalFlags::new(),
            device_slot: None,
            device_yielded: false,
            zero_reads: 0,
            pending_rotate: false,
            server_log,
            pidfile: None,
        }
    }

    pub fn with_flags(mut self, flags: SignalFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Server log consulted for `REQ: RELOAD` feedback.
    pub fn set_server_log(&mut self, path: Option<PathBuf>) {
        self.server_log = path;
    }

    pub fn flags(&self) -> &SignalFlags {
        &self.flags
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.slots.iter().find_map(|(_, s)| match s {
            Slot::Listener(l) => l.local_addr().ok(),
            _ => None,
        })
    }

    /// The device slot holds an open device. False while the modem is
    /// yielded to a lock holder and always false with `noserial`.
    pub fn device_attached(&self) -> bool {
        matches!(
            self.device_slot.and_then(|idx| self.slots.get(idx)),
            Some(Slot::Device(_))
        )
    }

    pub fn device_yielded(&self) -> bool {
        self.device_yielded
    }

    pub fn client_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|(_, s)| matches!(s, Slot::Client(_)))
            .count()
    }

    /// Acquire PID file, device and listening socket. Anything acquired is
    /// released again when a later step fails.
    pub fn start(&mut self) -> Result<(), CidError> {
        let result = self.acquire();
        if result.is_err() {
            self.cleanup();
        }
        result
    }

    fn acquire(&mut self) -> Result<(), CidError> {
        if let Some(path) = self.config.server.pidfile.clone() {
            self.pidfile = Some(PidFile::create(&path)?);
        }

        if self.config.device.noserial {
            info!("Configured to run without a serial device");
        } else {
            if lockfile::is_locked(&self.lockfile) {
                return Err(CidError::Locked(self.lockfile.clone()));
            }
            let device = self.open_device()?;
            let capacity = self.slots.capacity();
            let idx = self
                .slots
                .add(Slot::Device(device))
                .map_err(|_| CidError::Capacity(capacity))?;
            self.device_slot = Some(idx);
        }

        let listener = TcpListener::bind(("0.0.0.0", self.config.server.port))?;
        listener.set_nonblocking(true)?;
        info!("Listening for clients on {}", listener.local_addr()?);
        let capacity = self.slots.capacity();
        self.slots
            .add(Slot::Listener(listener))
            .map_err(|_| CidError::Capacity(capacity))?;
        Ok(())
    }

    fn open_device(&self) -> Result<SerialDevice, CidError> {
        let mut device = SerialDevice::open(&self.config.device)?;
        device.initialize(&self.config.device)?;
        Ok(device)
    }

    /// Poll until shutdown is requested or the device fails, then clean up.
    pub fn run(&mut self) -> Result<(), CidError> {
        info!("Server ready, {} client slots", self.config.server.max_clients);
        let result = loop {
            if self.flags.shutdown_requested() {
                info!("Shutdown requested");
                break Ok(());
            }
            self.consume_flags();
            if let Err(e) = self.poll_once(POLL_TIMEOUT_MS) {
                break Err(e);
            }
        };
        self.cleanup();
        result
    }

    fn consume_flags(&mut self) {
        if SignalFlags::take(&self.flags.reload) {
            match self.policy.reload() {
                Ok(()) => info!("Reloaded alias, blacklist and whitelist files"),
                Err(e) => error!("Reload failed: {}", e),
            }
        }
        if SignalFlags::take(&self.flags.rotate) {
            info!("Call log replacement requested");
            self.pending_rotate = true;
        }
        if SignalFlags::take(&self.flags.show) {
            self.log_connections();
        }
    }

    fn log_connections(&self) {
        info!("{} active slot(s)", self.slots.occupied());
        for (idx, slot) in self.slots.iter() {
            match slot {
                Slot::Device(d) => info!("  slot {}: device {}", idx, d.path()),
                Slot::Listener(l) => info!(
                    "  slot {}: listener {}",
                    idx,
                    l.local_addr().map(|a| a.to_string()).unwrap_or_default()
                ),
                Slot::Client(c) => info!(
                    "  slot {}: client {}{}",
                    idx,
                    c.peer,
                    if c.ack { " (ACK)" } else { "" }
                ),
            }
        }
    }

    /// One poll round. Returns the number of slots that had events; zero
    /// means the timeout passed and housekeeping ran.
    pub fn poll_once(&mut self, timeout_ms: u16) -> Result<usize, CidError> {
        let watched: Vec<(usize, RawFd)> = self
            .slots
            .iter()
            .map(|(idx, slot)| (idx, slot.as_raw_fd()))
            .collect();

        let ready: Vec<(usize, RawFd, PollFlags)> = {
            let mut fds: Vec<PollFd> = watched
                .iter()
                .map(|&(_, fd)| {
                    // SAFETY: every fd is owned by a slot that stays open for this call.
                    let fd = unsafe { BorrowedFd::borrow_raw(fd) };
                    PollFd::new(fd, PollFlags::POLLIN | PollFlags::POLLPRI)
                })
                .collect();

            match poll(&mut fds, PollTimeout::from(timeout_ms)) {
                Ok(0) => {
                    self.on_timeout()?;
                    return Ok(0);
                }
                Ok(_) => watched
                    .iter()
                    .zip(fds.iter())
                    .filter_map(|(&(idx, fd), pfd)| {
                        pfd.revents()
                            .filter(|r| !r.is_empty())
                            .map(|r| (idx, fd, r))
                    })
                    .collect(),
                Err(Errno::EINTR) => return Ok(0),
                Err(e) => return Err(e.into()),
            }
        };

        let count = ready.len();
        for (idx, fd, revents) in ready {
            // A slot closed earlier in this round may already hold a new peer.
            let current = self.slots.get(idx).map(|s| s.as_raw_fd());
            if current != Some(fd) {
                continue;
            }
            self.dispatch(idx, revents)?;
        }
        Ok(count)
    }

    fn dispatch(&mut self, idx: usize, revents: PollFlags) -> Result<(), CidError> {
        let fault = PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL;
        let readable = revents.intersects(PollFlags::POLLIN | PollFlags::POLLPRI);
        match self.slots.get(idx) {
            Some(Slot::Device(d)) => {
                if revents.intersects(fault) {
                    let reason = format!("Serial device {} error or hangup: {:?}", d.path(), revents);
                    return Err(self.device_fault(reason));
                }
                if readable {
                    self.read_device(idx)?;
                }
            }
            Some(Slot::Listener(_)) => {
                if revents.intersects(fault) {
                    error!("Listening socket error: {:?}", revents);
                    self.close_slot(idx);
                } else if readable {
                    self.accept_clients(idx);
                }
            }
            Some(Slot::Client(_)) => {
                if readable {
                    self.read_client(idx)?;
                } else if revents.intersects(fault) {
                    debug!("Client {} poll event {:?}", idx, revents);
                    self.close_slot(idx);
                }
            }
            None => {}
        }
        Ok(())
    }

    fn accept_clients(&mut self, idx: usize) {
        loop {
            let accepted = match self.slots.get(idx) {
                Some(Slot::Listener(l)) => l.accept(),
                _ => return,
            };
            match accepted {
                Ok((stream, addr)) => self.admit(stream, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn admit(&mut self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!("Cannot make client {} non-blocking: {}", addr, e);
            return;
        }
        let peer = describe_peer(&addr);
        match self.slots.add(Slot::Client(Client::new(stream, peer.clone()))) {
            Ok(idx) => {
                info!("Client {} connected from {}", idx, peer);
                let hangup = self.formatter.options().hangup;
                let result = match self.slots.get_mut(idx) {
                    Some(Slot::Client(c)) => send_banner(
                        &mut c.stream,
                        &self.config,
                        &self.sink,
                        self.clock.as_ref(),
                        hangup,
                    ),
                    _ => return,
                };
                if let Err(e) = result {
                    warn!("Startup lines to client {} failed: {}", idx, e);
                    self.close_slot(idx);
                }
            }
            Err(Slot::Client(mut client)) => {
                let max = self.config.server.max_clients;
                warn!("Too many clients connected ({}), rejecting {}", max, peer);
                let notice = format!(
                    "MSG: Too many clients connected ({}) {}",
                    max,
                    stamp(&self.clock.now())
                );
                let _ = send_line(&mut client.stream, LOG_NOT_SENT)
                    .and_then(|_| send_line(&mut client.stream, &notice));
            }
            Err(_) => {}
        }
    }

    fn read_client(&mut self, idx: usize) -> Result<(), CidError> {
        let mut chunk = [0u8; 4096];
        let result = match self.slots.get_mut(idx) {
            Some(Slot::Client(c)) => c.stream.read(&mut chunk),
            _ => return Ok(()),
        };
        match result {
            Ok(0) => {
                self.close_slot(idx);
                return Ok(());
            }
            Ok(n) => {
                trace!("Client {} sent {} bytes", idx, n);
                if let Some(Slot::Client(c)) = self.slots.get_mut(idx) {
                    c.framer.push(&chunk[..n]);
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                return Ok(())
            }
            Err(e) => {
                warn!("Read from client {} failed: {}", idx, e);
                self.close_slot(idx);
                return Ok(());
            }
        }

        loop {
            let line = match self.slots.get_mut(idx) {
                Some(Slot::Client(c)) => c.framer.next_line(),
                _ => None,
            };
            let Some(line) = line else { break };
            self.handle_client_line(idx, &line)?;
        }
        Ok(())
    }

    fn read_device(&mut self, idx: usize) -> Result<(), CidError> {
        let result = match self.slots.get_mut(idx) {
            Some(Slot::Device(d)) => d.read_available(),
            _ => return Ok(()),
        };
        match result {
            Ok(0) => {
                self.zero_reads += 1;
                if self.zero_reads >= ZERO_READ_LIMIT {
                    let reason = format!(
                        "Serial device {} returned no data {} times",
                        self.config.device.ttyport, ZERO_READ_LIMIT
                    );
                    return Err(self.device_fault(reason));
                }
                return Ok(());
            }
            Ok(_) => self.zero_reads = 0,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                return Ok(())
            }
            Err(e) => {
                let reason = format!("Serial device {} read error: {}", self.config.device.ttyport, e);
                return Err(self.device_fault(reason));
            }
        }

        loop {
            let line = match self.slots.get_mut(idx) {
                Some(Slot::Device(d)) => d.next_line(),
                _ => None,
            };
            let Some(line) = line else { break };
            if line.is_empty() {
                continue;
            }
            debug!("Device: {}", escape_log(&line));
            self.sink.data_log(&line);
            let emits = self
                .formatter
                .process_line(&line, self.policy.as_ref(), self.clock.as_ref());
            self.apply_emits(emits, true)?;
        }
        Ok(())
    }

    /// Carry out formatter actions in order. Hangups only apply to calls
    /// seen on our own modem.
    pub(crate) fn apply_emits(&mut self, emits: Vec<Emit>, from_device: bool) -> Result<(), CidError> {
        for emit in emits {
            match emit {
                Emit::Call(line) => {
                    info!("{}", line);
                    self.sink.call_log(&line);
                    self.broadcast(&line);
                }
                Emit::Info(line) => {
                    debug!("{}", line);
                    self.broadcast(&line);
                }
                Emit::EndOfCall(line) => {
                    info!("{}", line);
                    self.sink.call_log(&line);
                }
                Emit::Hangup if from_device => self.hangup()?,
                Emit::Hangup => debug!("Hangup requested for a gateway call, ignored"),
            }
        }
        Ok(())
    }

    fn hangup(&mut self) -> Result<(), CidError> {
        let result = match self.device_slot.and_then(|idx| self.slots.get_mut(idx)) {
            Some(Slot::Device(d)) => d.hangup_call(),
            _ => return Ok(()),
        };
        result.map_err(|e| self.device_fault(format!("Modem hangup failed: {}", e)))
    }

    /// Write one line to every client. Clients that cannot take it are dropped.
    pub(crate) fn broadcast(&mut self, line: &str) {
        let mut dead = Vec::new();
        for (idx, slot) in self.slots.iter_mut() {
            if let Slot::Client(c) = slot {
                if let Err(e) = send_line(&mut c.stream, line) {
                    warn!("Dropping client {} ({}): {}", idx, c.peer, e);
                    dead.push(idx);
                }
            }
        }
        for idx in dead {
            self.close_slot(idx);
        }
    }

    pub(crate) fn close_slot(&mut self, idx: usize) {
        match self.slots.remove(idx) {
            Some(Slot::Client(c)) => info!("Client {} from {} disconnected", idx, c.peer),
            Some(Slot::Device(mut d)) => {
                d.restore();
                if self.device_slot == Some(idx) {
                    self.device_slot = None;
                }
                info!("Closed serial device {}", d.path());
            }
            Some(Slot::Listener(_)) => warn!("Closed listening socket; no new clients"),
            None => {}
        }
    }

    /// Tell clients the device failed and build the fatal error.
    fn device_fault(&mut self, reason: String) -> CidError {
        error!("{}", reason);
        let notice = format!("MSG: {} {}", reason, stamp(&self.clock.now()));
        self.broadcast(&notice);
        CidError::DeviceFault(reason)
    }

    fn on_timeout(&mut self) -> Result<(), CidError> {
        if let Some(emit) = self
            .formatter
            .on_poll_timeout(self.policy.as_ref(), self.clock.as_ref())
        {
            self.apply_emits(vec![emit], false)?;
        }

        if self.pending_rotate {
            self.pending_rotate = false;
            let pending = handler::pending_logs(self.sink.cidlog(), false);
            if pending.is_empty() {
                warn!("No {}.new to replace the call log with", self.sink.cidlog().display());
            }
            for (from, to) in pending {
                match std::fs::rename(&from, &to) {
                    Ok(()) => info!("Replaced {} with {}", to.display(), from.display()),
                    Err(e) => error!("Cannot replace {}: {}", to.display(), e),
                }
            }
        }

        if self.config.device.noserial {
            return Ok(());
        }
        let locked = lockfile::is_locked(&self.lockfile);
        if locked && !self.device_yielded {
            if let Some(idx) = self.device_slot {
                if let Some(Slot::Device(mut d)) = self.slots.reserve(idx) {
                    d.restore();
                }
            }
            self.formatter.reset_ring();
            self.device_yielded = true;
            info!(
                "TTY in use: releasing modem {} to {}",
                self.config.device.ttyport,
                self.lockfile.display()
            );
        } else if !locked && self.device_yielded {
            let device = match self.open_device() {
                Ok(device) => device,
                Err(e) => {
                    let reason = format!("Cannot init TTY {}: {}", self.config.device.ttyport, e);
                    return Err(self.device_fault(reason));
                }
            };
            let restored = match self.device_slot {
                Some(idx) => self.slots.restore(idx, Slot::Device(device)).is_ok(),
                None => false,
            };
            if !restored {
                let reason = format!("No reserved slot for {}", self.config.device.ttyport);
                return Err(self.device_fault(reason));
            }
            self.device_yielded = false;
            self.zero_reads = 0;
            info!("TTY free: using modem {} again", self.config.device.ttyport);
        }
        Ok(())
    }

    /// Restore the device, close every slot and remove the PID file.
    pub fn cleanup(&mut self) {
        if let Some(Slot::Device(d)) = self.device_slot.and_then(|idx| self.slots.get_mut(idx)) {
            if self.config.lists.hangup {
                let _ = d.command(HANGUP, 0);
            }
            d.restore();
        }
        let occupied: Vec<usize> = self.slots.iter().map(|(idx, _)| idx).collect();
        for idx in occupied {
            self.slots.remove(idx);
        }
        self.device_slot = None;
        if let Some(pidfile) = self.pidfile.take() {
            pidfile.remove();
        }
        info!("Terminated");
    }
}
