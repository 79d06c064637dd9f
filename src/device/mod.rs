//! # Caller-ID serial device
//!
//! Opens the modem (or Caller-ID box) with `serialport`, remembers the
//! terminal settings that were in place before we touched it, and speaks the
//! handful of AT commands the daemon needs: initialization, Caller-ID enable
//! and blacklist hangup.
//!
//! Reads after initialization are driven by the server's poll loop; this
//! module only blocks during modem setup and hangup, with 100 ms sleeps.

pub mod modem;

use log::{debug, info, trace, warn};
use nix::sys::termios::{self, FlushArg, SetArg, Termios};
use serialport::{FlowControl, SerialPort, TTYPort};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::thread::sleep;
use std::time::Duration;

use crate::config::DeviceConfig;
use crate::error::CidError;
use crate::logutil::{escape_log, hexdump};
use crate::server::framer::LineFramer;
pub use modem::ModemReply;
use modem::{HANGUP, HANGUP_DELAY_SECS, INITCID_FALLBACK, INITCID_PRIMARY, MODEMTRY, PICKUP, READTRY};

const READWAIT: Duration = Duration::from_millis(100);

pub struct SerialDevice {
    path: String,
    port: TTYPort,
    saved: Option<Termios>,
    framer: LineFramer,
}

/// Terminal settings of the device before we open it for real.
fn saved_settings(path: &str) -> Option<Termios> {
    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
        .open(path)
        .ok()?;
    termios::tcgetattr(&file).ok()
}

impl SerialDevice {
    /// Open the device at the configured speed, 8N1.
    pub fn open(cfg: &DeviceConfig) -> Result<Self, CidError> {
        let saved = saved_settings(&cfg.ttyport);
        let flow = if cfg.clocal {
            FlowControl::None
        } else {
            FlowControl::Hardware
        };
        let mut port = serialport::new(&cfg.ttyport, cfg.ttyspeed)
            .timeout(READWAIT)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(flow)
            .open_native()?;
        let _ = port.write_data_terminal_ready(true);
        let _ = port.clear(serialport::ClearBuffer::All);
        info!("Opened {} at {} baud", cfg.ttyport, cfg.ttyspeed);
        Ok(SerialDevice {
            path: cfg.ttyport.clone(),
            port,
            saved,
            framer: LineFramer::new(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Send the init string and Caller-ID enable string. Skipped for
    /// `nomodem` devices.
    pub fn initialize(&mut self, cfg: &DeviceConfig) -> Result<(), CidError> {
        if cfg.nomodem {
            info!("{} is not a modem, skipping AT initialization", self.path);
            return Ok(());
        }

        if cfg.initstr.is_empty() {
            info!("Initialization string for modem is null.");
        } else {
            let mut reply = ModemReply::Error;
            for attempt in 1..=MODEMTRY {
                reply = self.command(&cfg.initstr, READTRY)?;
                debug!("Try {} to init modem: {:?}", attempt, reply);
                if reply != ModemReply::Error {
                    break;
                }
            }
            match reply {
                ModemReply::Ok => info!("Modem initialized."),
                ModemReply::Connect => warn!("Modem returned \"CONNECT\"."),
                ModemReply::Silent => {
                    return Err(CidError::Modem(format!("No modem found: {}", self.path)))
                }
                ModemReply::Error | ModemReply::Garbled => {
                    return Err(CidError::Modem(format!(
                        "Unable to initialize modem: {}",
                        self.path
                    )))
                }
            }
        }

        let reply = match &cfg.initcid {
            Some(initcid) if initcid.is_empty() => {
                info!("CallerID initialization string for modem is null.");
                return Ok(());
            }
            Some(initcid) => self.command(initcid, READTRY)?,
            None => match self.command(INITCID_PRIMARY, READTRY)? {
                ModemReply::Ok => ModemReply::Ok,
                _ => self.command(INITCID_FALLBACK, READTRY)?,
            },
        };
        if reply != ModemReply::Ok {
            return Err(CidError::Modem(format!(
                "Unable to set modem CallerID: {}",
                self.path
            )));
        }
        info!("Modem set for CallerID.");
        Ok(())
    }

    /// Write `cmd` + CRLF and collect the reply for up to `max_tries` reads.
    /// A `max_tries` of zero sends without waiting.
    pub fn command(&mut self, cmd: &str, max_tries: u32) -> Result<ModemReply, CidError> {
        let line = format!("{}\r\n", cmd);
        self.port.write_all(line.as_bytes())?;
        debug!("Sent modem: {}", escape_log(cmd));

        let mut reply = Vec::new();
        let mut chunk = [0u8; 256];
        let mut state = ModemReply::Silent;
        for _ in 0..max_tries {
            sleep(READWAIT);
            match self.port.read(&mut chunk) {
                Ok(n) => reply.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
            state = ModemReply::classify(&reply);
            if state.is_final() {
                break;
            }
        }
        if !reply.is_empty() {
            debug!("Modem response: {}", escape_log(&String::from_utf8_lossy(&reply)));
            trace!("\n{}", hexdump(&reply));
        }
        Ok(state)
    }

    /// Answer the ringing call, hold it briefly, then hang up.
    pub fn hangup_call(&mut self) -> Result<(), CidError> {
        info!("Hanging up blacklisted call on {}", self.path);
        self.command(PICKUP, READTRY)?;
        sleep(Duration::from_secs(HANGUP_DELAY_SECS));
        self.command(HANGUP, READTRY)?;
        let _ = self.port.clear(serialport::ClearBuffer::Input);
        Ok(())
    }

    /// Read whatever the device has; called when the poll loop reports it readable.
    pub fn read_available(&mut self) -> io::Result<usize> {
        let mut chunk = [0u8; 1024];
        match self.port.read(&mut chunk) {
            Ok(n) => {
                self.framer.push(&chunk[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(io::ErrorKind::WouldBlock.into()),
            Err(e) => Err(e),
        }
    }

    pub fn next_line(&mut self) -> Option<String> {
        self.framer.next_line()
    }

    /// Let queued output (a final `ATH0`) go out, drop unread input and put
    /// back the settings found at open.
    pub fn restore(&mut self) {
        // SAFETY: the fd belongs to self.port, which outlives this borrow.
        let fd = unsafe { BorrowedFd::borrow_raw(self.port.as_raw_fd()) };
        let _ = termios::tcdrain(fd);
        let _ = termios::tcflush(fd, FlushArg::TCIFLUSH);
        if let Some(saved) = &self.saved {
            if let Err(e) = termios::tcsetattr(fd, SetArg::TCSANOW, saved) {
                warn!("Could not restore terminal settings on {}: {}", self.path, e);
            }
        }
    }
}

impl AsRawFd for SerialDevice {
    fn as_raw_fd(&self) -> RawFd {
        self.port.as_raw_fd()
    }
}
