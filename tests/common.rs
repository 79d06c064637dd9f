//! Test utilities & fixtures shared by the integration tests.
#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use cidrelay::cid::FixedClock;
use cidrelay::config::Config;
use cidrelay::helpers::HelperRunner;
use cidrelay::policy::{Aliased, CallerPolicy, HangupDecision, Membership, PolicyError};
use cidrelay::server::CidServer;

/// 03/30/2024 14:20:05, the instant every test clock is frozen at.
pub fn fixed_clock() -> FixedClock {
    FixedClock(
        NaiveDate::from_ymd_opt(2024, 3, 30)
            .unwrap()
            .and_hms_opt(14, 20, 5)
            .unwrap(),
    )
}

/// Policy with one blacklisted number and no aliases.
#[derive(Debug, Default, Clone)]
pub struct BlockOne {
    pub number: String,
    pub display: Option<String>,
}

impl CallerPolicy for BlockOne {
    fn alias(&self, number: &str, name: &str, line: &str) -> Aliased {
        Aliased {
            number: number.to_string(),
            name: name.to_string(),
            line: line.to_string(),
        }
    }

    fn find_alias(&self, _number: &str, _name: &str, _line: &str) -> String {
        "NOALIAS".to_string()
    }

    fn hangup_decision(&self, _name: &str, number: &str) -> HangupDecision {
        if number == self.number {
            HangupDecision {
                terminate: true,
                whitelisted: false,
                display_name: self.display.clone(),
            }
        } else {
            HangupDecision::default()
        }
    }

    fn classify(&self, _name: &str, number: &str) -> Membership {
        if number == self.number {
            Membership::BlackNumber
        } else {
            Membership::Neither
        }
    }

    fn reload(&mut self) -> Result<(), PolicyError> {
        Ok(())
    }
}

pub type HelperLog = Arc<Mutex<Vec<(PathBuf, Vec<String>)>>>;

/// Records helper invocations and answers with canned output.
pub struct RecordingHelpers {
    pub calls: HelperLog,
    pub output: Vec<String>,
}

impl RecordingHelpers {
    pub fn new(output: &[&str]) -> (Self, HelperLog) {
        let calls: HelperLog = Arc::default();
        (
            RecordingHelpers {
                calls: calls.clone(),
                output: output.iter().map(|s| s.to_string()).collect(),
            },
            calls,
        )
    }
}

impl HelperRunner for RecordingHelpers {
    fn run(&mut self, program: &Path, args: &[String]) -> std::io::Result<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .push((program.to_path_buf(), args.to_vec()));
        Ok(self.output.clone())
    }
}

/// Gateway-only configuration with every file under `dir`, on an ephemeral port.
pub fn gateway_config(dir: &Path, max_clients: usize) -> Config {
    let mut config = Config::default();
    config.server.port = 0;
    config.server.max_clients = max_clients;
    config.device.noserial = true;
    config.logs.cidlog = dir.join("cidcall.log");
    config.logs.datalog = dir.join("ciddata.log");
    config.lists.alias = dir.join("alias");
    config.lists.blacklist = dir.join("blacklist");
    config.lists.whitelist = dir.join("whitelist");
    config.helpers.update = dir.join("cidupdate");
    config.helpers.util = dir.join("ncidutil");
    config
}

/// Run a few short poll rounds so pending accepts and lines are handled.
pub fn pump(server: &mut CidServer) {
    for _ in 0..5 {
        server.poll_once(20).unwrap();
    }
}

pub struct TestClient {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl TestClient {
    /// Connect and let the server accept us and send the startup lines.
    pub fn connect(server: &mut CidServer) -> Self {
        let port = server.local_addr().unwrap().port();
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_millis(300)))
            .unwrap();
        let writer = stream.try_clone().unwrap();
        pump(server);
        TestClient {
            reader: BufReader::new(stream),
            writer,
        }
    }

    pub fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{}\r\n", line).as_bytes())
            .unwrap();
    }

    /// Next line without CRLF; `None` on timeout or end of stream.
    pub fn read_line(&mut self) -> Option<String> {
        let mut buf = String::new();
        match self.reader.read_line(&mut buf) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(buf.trim_end_matches(['\r', '\n']).to_string()),
        }
    }

    /// Read lines up to and including one equal to `last`.
    pub fn read_through(&mut self, last: &str) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.read_line() {
            let done = line == last;
            lines.push(line);
            if done {
                break;
            }
        }
        lines
    }

    /// Consume the four startup lines of a default server.
    pub fn skip_banner(&mut self) {
        let lines = self.read_through("300 End of connection startup");
        assert_eq!(lines.len(), 4, "unexpected banner: {:?}", lines);
    }
}
