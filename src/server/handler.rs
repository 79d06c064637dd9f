//! Client protocol handler: one framed line from a client or gateway in,
//! replies, log writes and broadcasts out.

use log::{debug, error, info, trace, warn};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::sink::send_line;
use super::{CidServer, Slot};
use crate::cid::message::MessageRecord;
use crate::error::CidError;
use crate::logutil::escape_log;
use crate::policy::split_quoted;
use crate::protocol::{
    ClientLine, ListKind, MessageKind, Request, Work, ACK_PREFIX, DATA_ACCEPT, DATA_END, DATA_OK,
    DATA_PERMITTED, DATA_STATUS, INFO_PREFIX, MAX_LINE, NO_CHANGES, RELOADED, RESPONSE_END,
    RESP_PREFIX,
};

impl CidServer {
    pub(super) fn handle_client_line(&mut self, idx: usize, line: &str) -> Result<(), CidError> {
        match ClientLine::parse(line) {
            ClientLine::Empty => trace!("Client {} sent empty line", idx),
            ClientLine::Call(body) => {
                debug!("Gateway {} sent CID: {}", idx, escape_log(body));
                self.ack(idx, line);
                self.sink.data_log(line);
                let emits =
                    self.formatter
                        .process_line(body, self.policy.as_ref(), self.clock.as_ref());
                self.apply_emits(emits, false)?;
            }
            ClientLine::CallInfo(info) => {
                debug!("Gateway {} sent call info: {}", idx, escape_log(info));
                self.ack(idx, line);
                self.sink.data_log(line);
                let emits =
                    self.formatter
                        .process_callinfo(info, self.policy.as_ref(), self.clock.as_ref());
                self.apply_emits(emits, false)?;
            }
            ClientLine::Forward(forwarded) => {
                debug!("Server {} sent {}", idx, escape_log(forwarded));
                self.sink.call_log(forwarded);
                self.broadcast(forwarded);
            }
            ClientLine::UnknownForward(forwarded) => {
                debug!("Ignoring server {} line {}", idx, escape_log(forwarded));
            }
            ClientLine::Message(kind, text) => {
                debug!("Client {} sent {}", idx, kind.label());
                self.sink.data_log(text);
                if kind == MessageKind::Not {
                    self.ack(idx, line);
                }
                let now = self.clock.now();
                let rendered = MessageRecord::parse(text, self.policy.as_ref(), &now).render();
                self.sink.call_log(&rendered);
                self.broadcast(&rendered);
            }
            ClientLine::Request(req) => {
                info!("Client {}: {}", idx, escape_log(line));
                self.handle_request(idx, line, req);
            }
            ClientLine::Work(work) => {
                info!("Client {}: {}", idx, escape_log(line));
                self.handle_work(work);
            }
            ClientLine::Unknown(text) => {
                debug!("Client {} sent unknown data", idx);
                self.sink.data_log(text);
            }
        }
        Ok(())
    }

    /// Echo `ACK: <line>` to a client that asked for acknowledgments.
    fn ack(&mut self, idx: usize, line: &str) {
        let wants_ack = matches!(self.slots.get(idx), Some(Slot::Client(c)) if c.ack);
        if wants_ack {
            self.reply(idx, &[format!("{}{}", ACK_PREFIX, line)]);
        }
    }

    /// Write lines to one client only. A failed write drops the client.
    pub(super) fn reply(&mut self, idx: usize, lines: &[String]) {
        let result = match self.slots.get_mut(idx) {
            Some(Slot::Client(c)) => lines
                .iter()
                .try_for_each(|l| send_line(&mut c.stream, l)),
            _ => return,
        };
        if let Err(e) = result {
            warn!("Write to client {} failed: {}", idx, e);
            self.close_slot(idx);
        }
    }

    fn handle_request(&mut self, idx: usize, line: &str, req: Request<'_>) {
        match req {
            Request::Reload => {
                let mark = self.server_log_len();
                if let Err(e) = self.policy.reload() {
                    error!("Reload failed: {}", e);
                } else {
                    info!("{}", RELOADED);
                }
                let mut out = vec![DATA_OK.to_string()];
                match mark.and_then(|pos| self.server_log_since(pos)) {
                    Some(lines) => out.extend(lines.iter().map(|l| format!("{}{}", INFO_PREFIX, l))),
                    None => out.push(format!("{}{}", INFO_PREFIX, RELOADED)),
                }
                out.push(DATA_END.to_string());
                self.reply(idx, &out);
            }
            Request::Update { multi } => {
                let mut args = vec![
                    "-a".to_string(),
                    self.config.lists.alias.display().to_string(),
                    "-c".to_string(),
                    self.config.logs.cidlog.display().to_string(),
                ];
                if multi {
                    args.push("--multi".to_string());
                }
                if self.config.lists.ignore1 {
                    args.push("--ignore1".to_string());
                }
                let program = self.config.helpers.update.clone();
                let lines = self.run_helper(&program, &args);
                let unchanged = lines
                    .first()
                    .map_or(true, |first| NO_CHANGES.iter().any(|m| first.contains(m)));
                let mut out = Vec::with_capacity(lines.len() + 2);
                if unchanged {
                    out.push(DATA_OK.to_string());
                    out.extend(lines.first().map(|l| format!("{}{}", INFO_PREFIX, l)));
                } else {
                    out.push(DATA_ACCEPT.to_string());
                    out.extend(lines.iter().map(|l| format!("{}{}", INFO_PREFIX, l)));
                }
                out.push(DATA_END.to_string());
                self.reply(idx, &out);
            }
            Request::Reread => {
                let result = match self.slots.get_mut(idx) {
                    Some(Slot::Client(c)) => self.sink.send_log(&mut c.stream, self.clock.as_ref()),
                    _ => return,
                };
                if let Err(e) = result {
                    warn!("Sending call log to client {} failed: {}", idx, e);
                    self.close_slot(idx);
                }
            }
            Request::Ack | Request::Yo => {
                if req == Request::Ack {
                    if let Some(Slot::Client(c)) = self.slots.get_mut(idx) {
                        c.ack = true;
                    }
                }
                self.reply(idx, &[format!("{}{}", ACK_PREFIX, line)]);
            }
            Request::List { list, args } => {
                let lists = &self.config.lists;
                let mut helper_args = Vec::new();
                if lists.ignore1 {
                    helper_args.push("--ignore1".to_string());
                }
                let file = match list {
                    ListKind::Black => &lists.blacklist,
                    ListKind::White => &lists.whitelist,
                    ListKind::Alias => {
                        helper_args.push("--multi".to_string());
                        helper_args.push(format!(
                            "{} {}",
                            lists.blacklist.display(),
                            lists.whitelist.display()
                        ));
                        &lists.alias
                    }
                };
                helper_args.push(file.display().to_string());
                helper_args.push(list.helper_type().to_string());
                helper_args.extend(split_quoted(args));

                let program = self.config.helpers.util.clone();
                let lines = self.run_helper(&program, &helper_args);
                let mut out = vec![DATA_STATUS.to_string()];
                out.extend(lines.iter().map(|l| format!("{}{}", RESP_PREFIX, l)));
                out.push(RESPONSE_END.to_string());
                self.reply(idx, &out);
            }
            Request::Info { number, name, line } => {
                let alias = self.policy.find_alias(number, name, line);
                let class = self.policy.classify(name, number);
                let out = [
                    DATA_PERMITTED.to_string(),
                    format!("{}alias {}", INFO_PREFIX, alias),
                    format!("{}{}", INFO_PREFIX, class.as_str()),
                    RESPONSE_END.to_string(),
                ];
                self.reply(idx, &out);
            }
            Request::Unsupported(body) => {
                let word = body.split(' ').next().unwrap_or(body);
                warn!("Unable to handle {} request - Ignored.", escape_log(word));
            }
        }
    }

    fn run_helper(&mut self, program: &Path, args: &[String]) -> Vec<String> {
        info!("Begin: Executing {}", program.display());
        let lines = match self.helpers.run(program, args) {
            Ok(lines) => lines,
            Err(e) => {
                error!("Cannot run {}: {}", program.display(), e);
                vec![format!("cannot run {}: {}", program.display(), e)]
            }
        };
        info!("End: Executing {}", program.display());
        lines
    }

    fn server_log_len(&self) -> Option<u64> {
        let path = self.server_log.as_ref()?;
        std::fs::metadata(path).ok().map(|m| m.len())
    }

    /// Lines written to the server log since byte offset `pos`, capped at
    /// one wire line's worth of text.
    fn server_log_since(&self, pos: u64) -> Option<Vec<String>> {
        let path = self.server_log.as_ref()?;
        let mut file = std::fs::File::open(path).ok()?;
        file.seek(SeekFrom::Start(pos)).ok()?;
        let mut buf = Vec::new();
        file.take(MAX_LINE as u64).read_to_end(&mut buf).ok()?;
        let text = String::from_utf8_lossy(&buf);
        Some(text.lines().map(str::to_string).collect())
    }

    fn handle_work(&mut self, work: Work) {
        let cidlog = self.config.logs.cidlog.clone();
        match work {
            Work::AcceptLog { all } => {
                for (pending, target) in pending_logs(&cidlog, all) {
                    match std::fs::rename(&pending, &target) {
                        Ok(()) => info!("mv {} {}", pending.display(), target.display()),
                        Err(e) => warn!("Cannot accept {}: {}", pending.display(), e),
                    }
                }
            }
            Work::RejectLog { all } => {
                for (pending, _) in pending_logs(&cidlog, all) {
                    match std::fs::remove_file(&pending) {
                        Ok(()) => info!("rm {}", pending.display()),
                        Err(e) => warn!("Cannot reject {}: {}", pending.display(), e),
                    }
                }
            }
            Work::Unsupported => warn!("Unsupported WRK request - Ignored."),
        }
    }
}

/// Rewritten call logs waiting for acceptance, paired with the file each
/// replaces: `<cidlog>.new`, plus every `<cidlog>.<n>.new` when `all`.
pub(crate) fn pending_logs(cidlog: &Path, all: bool) -> Vec<(PathBuf, PathBuf)> {
    let mut found = Vec::new();
    if all {
        let dir = cidlog.parent().filter(|d| !d.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let base = cidlog
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let name = entry.file_name().to_string_lossy().into_owned();
                let generation = name
                    .strip_prefix(&base)
                    .and_then(|r| r.strip_prefix('.'))
                    .and_then(|r| r.strip_suffix(".new"));
                if let Some(n) = generation {
                    if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) {
                        found.push((entry.path(), dir.join(format!("{}.{}", base, n))));
                    }
                }
            }
        }
        found.sort();
    }
    let mut pending = cidlog.as_os_str().to_owned();
    pending.push(".new");
    let pending = PathBuf::from(pending);
    if pending.exists() {
        found.push((pending, cidlog.to_path_buf()));
    }
    found
}
