//! Log/broadcast sink: call log and data log appends, and CRLF line writes
//! to client sockets with bounded retry.
//!
//! Both log files are opened, appended to, and closed on every write so an
//! external rotation is picked up without a restart.

use log::{debug, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use crate::cid::clock::{stamp, Clock};
use crate::config::LogsConfig;
use crate::protocol::{log_transfer_line, LOG_EMPTY, LOG_MISSING, LOG_NOT_SENT, LOG_SENT};

const WRITE_RETRIES: u32 = 10;
const WRITE_BACKOFF: Duration = Duration::from_millis(100);

/// Write all of `buf`, retrying short and would-block writes with a short
/// sleep. Gives up with `TimedOut` after a bounded number of stalls.
pub fn write_with_retry<W: Write + ?Sized>(w: &mut W, mut buf: &[u8]) -> io::Result<()> {
    let mut stalls = 0;
    while !buf.is_empty() {
        match w.write(buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                stalls += 1;
                if stalls > WRITE_RETRIES {
                    return Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "peer not accepting data",
                    ));
                }
                sleep(WRITE_BACKOFF);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// One protocol line, CRLF terminated.
pub fn send_line<W: Write + ?Sized>(w: &mut W, line: &str) -> io::Result<()> {
    let mut buf = Vec::with_capacity(line.len() + 2);
    buf.extend_from_slice(line.as_bytes());
    buf.extend_from_slice(b"\r\n");
    write_with_retry(w, &buf)
}

pub fn too_big_message(size: u64, max: u64, clock: &dyn Clock) -> String {
    format!(
        "MSG: Call Log too big: ({} > {}) bytes {}",
        size,
        max,
        stamp(&clock.now())
    )
}

fn append(path: &Path, line: &str, create: bool) -> io::Result<bool> {
    let mut file = match OpenOptions::new().append(true).create(create).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    writeln!(file, "{}", line)?;
    Ok(true)
}

#[derive(Debug, Clone)]
pub struct Sink {
    cidlog: PathBuf,
    datalog: PathBuf,
    cidlogmax: u64,
}

impl Sink {
    pub fn new(cfg: &LogsConfig) -> Self {
        Self {
            cidlog: cfg.cidlog.clone(),
            datalog: cfg.datalog.clone(),
            cidlogmax: cfg.cidlogmax,
        }
    }

    pub fn cidlog(&self) -> &Path {
        &self.cidlog
    }

    /// Append to the call log, creating it if needed.
    pub fn call_log(&self, line: &str) {
        if let Err(e) = append(&self.cidlog, line, true) {
            warn!("Cannot write {}: {}", self.cidlog.display(), e);
        }
    }

    /// Append to the data log. The data log is only kept when it already exists.
    pub fn data_log(&self, line: &str) {
        match append(&self.datalog, line, false) {
            Ok(true) => {}
            Ok(false) => debug!("{} absent, raw line not kept", self.datalog.display()),
            Err(e) => warn!("Cannot write {}: {}", self.datalog.display(), e),
        }
    }

    /// Send the call log to one client, each line relabelled for transfer,
    /// closed by a status line.
    pub fn send_log<W: Write + ?Sized>(&self, w: &mut W, clock: &dyn Clock) -> io::Result<()> {
        let file = match File::open(&self.cidlog) {
            Ok(f) => f,
            Err(e) => {
                debug!("Call log {} unreadable: {}", self.cidlog.display(), e);
                return send_line(w, LOG_MISSING);
            }
        };
        let size = file.metadata()?.len();
        if size > self.cidlogmax {
            warn!("Call log too big: ({} > {}) bytes", size, self.cidlogmax);
            send_line(w, &too_big_message(size, self.cidlogmax, clock))?;
            return send_line(w, LOG_NOT_SENT);
        }

        let mut sent = 0;
        for line in BufReader::new(file).split(b'\n') {
            let line = line?;
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches('\r');
            send_line(w, &log_transfer_line(text))?;
            sent += 1;
        }
        if sent == 0 {
            send_line(w, LOG_EMPTY)
        } else {
            debug!("Sent {} call log lines", sent);
            send_line(w, LOG_SENT)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cid::FixedClock;
    use chrono::NaiveDate;

    /// Accepts at most `chunk` bytes per write and blocks on every other call.
    struct Stutter {
        out: Vec<u8>,
        chunk: usize,
        calls: usize,
        blocked_forever: bool,
    }

    impl Write for Stutter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.calls += 1;
            if self.blocked_forever || self.calls % 2 == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = buf.len().min(self.chunk);
            self.out.extend_from_slice(&buf[..n]);
            Ok(n)
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn clock() -> FixedClock {
        FixedClock(
            NaiveDate::from_ymd_opt(2024, 3, 30)
                .unwrap()
                .and_hms_opt(14, 20, 5)
                .unwrap(),
        )
    }

    #[test]
    fn partial_writes_are_completed() {
        let mut w = Stutter {
            out: Vec::new(),
            chunk: 3,
            calls: 0,
            blocked_forever: false,
        };
        send_line(&mut w, "ACK: REQ: YO").unwrap();
        assert_eq!(w.out, b"ACK: REQ: YO\r\n");
    }

    #[test]
    fn stalled_peer_times_out() {
        let mut w = Stutter {
            out: Vec::new(),
            chunk: 3,
            calls: 0,
            blocked_forever: true,
        };
        let err = send_line(&mut w, "x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(w.calls as u32, WRITE_RETRIES + 1);
    }

    fn sink_in(dir: &Path, max: u64) -> Sink {
        Sink::new(&LogsConfig {
            cidlog: dir.join("cidcall.log"),
            datalog: dir.join("ciddata.log"),
            cidlogmax: max,
        })
    }

    #[test]
    fn send_log_relabels_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path(), 10_000);
        sink.call_log("CID: *DATE*03302024*TIME*1420*LINE*-*NMBR*555*MESG*NONE*NAME*X*");
        sink.call_log("something else");
        let mut out = Vec::new();
        sink.send_log(&mut out, &clock()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(
            text,
            "CIDLOG: *DATE*03302024*TIME*1420*LINE*-*NMBR*555*MESG*NONE*NAME*X*\r\n\
             LOG: something else\r\n\
             250 End of call log\r\n"
        );
    }

    #[test]
    fn send_log_status_codes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path(), 10);

        let mut out = Vec::new();
        sink.send_log(&mut out, &clock()).unwrap();
        assert_eq!(out, b"253 No Call log\r\n");

        std::fs::write(sink.cidlog(), "").unwrap();
        let mut out = Vec::new();
        sink.send_log(&mut out, &clock()).unwrap();
        assert_eq!(out, b"252 Call log empty\r\n");

        std::fs::write(sink.cidlog(), "0123456789abcdef\n").unwrap();
        let mut out = Vec::new();
        sink.send_log(&mut out, &clock()).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "MSG: Call Log too big: (17 > 10) bytes 03/30/2024 14:20:05\r\n251 Call log not sent\r\n"
        );
    }

    #[test]
    fn data_log_only_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let sink = sink_in(dir.path(), 10);
        sink.data_log("RING");
        assert!(!dir.path().join("ciddata.log").exists());
        std::fs::write(dir.path().join("ciddata.log"), "").unwrap();
        sink.data_log("RING");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("ciddata.log")).unwrap(),
            "RING\n"
        );
    }
}
