//! Per-call state machine: Empty → Partial → Complete → emit → Empty.
//!
//! Every line first goes through RING handling, then format detection in a
//! fixed order (gateway `###`, TCI 70 column, key=value). After merging, two
//! completion rules apply: number and name without date/time gets the current
//! time, and all four core fields present emits the call.

use chrono::NaiveDateTime;
use log::{debug, trace};

use super::accumulator::{clip, CallAccumulator, CallType, FieldSet};
use super::callinfo::EndOfCall;
use super::clock::{self, Clock};
use super::ring::RingState;
use super::Emit;
use crate::config::Config;
use crate::logutil::escape_log;
use crate::policy::CallerPolicy;
use crate::protocol::{NOCID, NONAME, NONMBR};

/// Jump modems send DLE R DLE X ahead of the Caller-ID block.
const JUMP_RESET: &str = "\x10R\x10X";

#[derive(Debug, Clone)]
pub struct FormatterOptions {
    pub lineid: String,
    pub gencid: bool,
    pub cidnoname: bool,
    pub send_cidinfo: bool,
    pub hangup: bool,
}

impl Default for FormatterOptions {
    fn default() -> Self {
        Self {
            lineid: "-".to_string(),
            gencid: true,
            cidnoname: false,
            send_cidinfo: false,
            hangup: false,
        }
    }
}

impl FormatterOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            lineid: config.server.lineid.clone(),
            gencid: config.device.gencid,
            cidnoname: config.device.cidnoname,
            send_cidinfo: config.server.send_cidinfo,
            hangup: config.lists.hangup,
        }
    }
}

/// Single-letter number codes some telcos send in place of a number.
pub fn builtin_alias(value: &str) -> &str {
    match value {
        "O" => "OUT-OF-AREA",
        "A" => "ANONYMOUS",
        "P" => "PRIVATE",
        other => other,
    }
}

fn is_tci(line: &str) -> bool {
    let b = line.as_bytes();
    line.is_ascii() && b.len() == 70 && b[0].is_ascii_digit() && b[9] == b'/' && b[24] == b'M'
}

/// `RING`, `RING A`, `CID RING`; never a field line or a one-line format.
fn is_ring(line: &str) -> bool {
    line.contains("RING") && !line.contains('=') && !line.starts_with("###") && !is_tci(line)
}

/// Value of a `KEY=value` or `KEY = value` line.
fn kv_value(line: &str, key_len: usize) -> &str {
    let value = match line.find('=') {
        Some(i) => &line[i + 1..],
        None => line.get(key_len..).unwrap_or(""),
    };
    value.trim()
}

fn until(s: &str, stop: char) -> &str {
    s.find(stop).map_or(s, |i| &s[..i])
}

fn atoi(s: &str) -> u32 {
    s.trim().parse().unwrap_or(0)
}

pub struct LineFormatter {
    opts: FormatterOptions,
    acc: CallAccumulator,
    ring: RingState,
    info_line: String,
}

impl LineFormatter {
    pub fn new(opts: FormatterOptions) -> Self {
        let acc = CallAccumulator::new(&opts.lineid);
        let info_line = opts.lineid.clone();
        Self {
            opts,
            acc,
            ring: RingState::new(),
            info_line,
        }
    }

    pub fn options(&self) -> &FormatterOptions {
        &self.opts
    }

    pub fn accumulator(&self) -> &CallAccumulator {
        &self.acc
    }

    pub fn ring_count(&self) -> i32 {
        self.ring.count()
    }

    /// Forget ring progress, e.g. when another program takes the modem.
    pub fn reset_ring(&mut self) {
        self.ring.reset();
    }

    /// Feed one device line (or the body of a gateway `CALL:` line).
    pub fn process_line(
        &mut self,
        line: &str,
        policy: &dyn CallerPolicy,
        clock: &dyn Clock,
    ) -> Vec<Emit> {
        let now = clock.now();
        let mut out = Vec::new();
        trace!("formatter <- {}", escape_log(line));

        if is_ring(line) && !self.on_ring(line, policy, &now, &mut out) {
            return out;
        }

        if line.contains(JUMP_RESET) {
            self.acc.fields = FieldSet::EMPTY;
            self.ring.set_cid_sent(false);
        }

        if line.starts_with("###") {
            self.parse_gateway(line, &now);
        } else if is_tci(line) {
            self.parse_tci(line, &now);
        } else if line.starts_with("DATE") {
            self.parse_date(line, &now);
        } else if line.starts_with("TIME") {
            let value = kv_value(line, 4);
            if !value.is_empty() && !self.acc.has(FieldSet::TIME) {
                self.acc.set_time(value);
            }
            self.ring.set_cid_sent(false);
        } else if line.starts_with("NMBR") || line.starts_with("DDN") || line.starts_with("NBR") {
            if !self.acc.has(FieldSet::NMBR) {
                let value = kv_value(line, 4);
                self.acc.set_number(builtin_alias(value));
                self.ring.set_cid_sent(false);
            }
            if self.opts.cidnoname {
                self.acc.set_name(NONAME);
            }
        } else if let Some(pos) = line.find("NAME") {
            if !self.opts.cidnoname && !self.acc.has(FieldSet::NAME) {
                let rest = line[pos + 4..].trim_start();
                let value = rest.strip_prefix('=').unwrap_or(rest).trim();
                self.acc.set_name(builtin_alias(value));
                self.ring.set_cid_sent(false);
            }
        } else if line.starts_with("MESG") {
            if !self.acc.has(FieldSet::MESG) {
                self.acc.set_message(kv_value(line, 4));
            }
            self.ring.set_cid_sent(false);
        }

        let fields = self.acc.fields;
        if fields == FieldSet::NODT || fields == (FieldSet::NODT | FieldSet::MESG) {
            debug!("No date and time found -- using current");
            self.synthesize_date_time(&now);
        }

        if self.acc.is_complete() {
            self.complete(policy, &mut out);
        }
        out
    }

    /// RING handling. Returns false when the ring ends processing of the line.
    fn on_ring(
        &mut self,
        line: &str,
        policy: &dyn CallerPolicy,
        now: &NaiveDateTime,
        out: &mut Vec<Emit>,
    ) -> bool {
        if line.len() == 6 {
            if let Some(label) = line.get(5..6) {
                self.acc.line = label.to_string();
            }
        }
        let count = self.ring.ring();
        self.info_line = self.acc.line.clone();
        if self.opts.send_cidinfo {
            out.push(self.ring_info(count, &self.info_line, policy, now));
        }

        let fields = self.acc.fields;
        if fields == FieldSet::ALL3 {
            debug!("received date, time, nmbr");
            self.acc.set_name(NONAME);
        } else if fields.core() == FieldSet::ALT3 {
            debug!("received date, time, name");
            self.acc.set_number(NONMBR);
        } else if fields == (FieldSet::ALL3 | FieldSet::MESG) {
            debug!("received date, time, nmbr, mesg");
            let name = self.acc.message.clone();
            self.acc.set_name(&name);
        } else if fields.intersects(FieldSet::NODT) {
            self.acc.fill_missing_identity();
            self.synthesize_date_time(now);
        } else if self.opts.gencid && !self.ring.cid_sent() && count == 2 {
            debug!("no Caller ID by ring 2, generating one");
            self.acc.fields = FieldSet::EMPTY;
            self.synthesize_date_time(now);
            self.acc.set_number("RING");
            self.acc.set_name(NOCID);
        } else {
            self.acc.fields = FieldSet::EMPTY;
            self.ring.set_cid_sent(false);
            return false;
        }
        true
    }

    fn synthesize_date_time(&mut self, now: &NaiveDateTime) {
        self.acc.set_date(&clock::date_nosep(now));
        self.acc.set_time(&clock::time_nosep(now));
    }

    /// `###DATE03301423...CALLOUT...LINE1...NMBR4075551212...NAMEJOHN+++`
    fn parse_gateway(&mut self, line: &str, now: &NaiveDateTime) {
        debug!("Detected NetCallerID or gateway format");
        self.acc.fields = FieldSet::EMPTY;
        self.ring.set_cid_sent(false);

        if let Some(pos) = line.find("DATE") {
            let stamp = &line[pos + 4..];
            match (stamp.get(0..4), stamp.get(4..8)) {
                (Some(mmdd), Some(hhmm)) if !stamp.starts_with('.') => {
                    self.acc.set_time(hhmm);
                    self.acc.set_date(&format!("{}{}", mmdd, clock::year(now)));
                }
                _ => self.synthesize_date_time(now),
            }
        }

        self.acc.call_type = CallType::from_gateway_line(line);

        if let Some(pos) = line.find("LINE") {
            let label = until(&line[pos + 4..], '.');
            self.acc.line = if label.is_empty() {
                self.opts.lineid.clone()
            } else {
                clip(label)
            };
        }
        if let Some(pos) = line.find("NMBR") {
            let number = until(&line[pos + 4..], '.');
            if number.is_empty() {
                self.acc.set_number(NONMBR);
            } else {
                self.acc.set_number(builtin_alias(number));
            }
        }
        if let Some(pos) = line.find("NAME") {
            let name = until(&line[pos + 4..], '+');
            if name.is_empty() {
                self.acc.set_name(NONAME);
            } else {
                self.acc.set_name(builtin_alias(name));
            }
        }
    }

    /// Fixed 70 column TCI line; see [`is_tci`] for the anchors.
    fn parse_tci(&mut self, line: &str, now: &NaiveDateTime) {
        debug!("Detected TCI serial device format");
        self.acc.fields = FieldSet::EMPTY;
        self.ring.set_cid_sent(false);

        if self.opts.lineid.starts_with('-') {
            self.acc.line = line[0..2].to_string();
        }

        let month = atoi(&line[7..9]);
        self.acc
            .set_date(&format!("{:02}{}{}", month, &line[10..12], clock::year(now)));

        let mut hour = atoi(&line[17..19]);
        if &line[23..25] == "PM" {
            if hour < 12 {
                hour += 12;
            }
        } else if hour == 12 {
            hour = 0;
        }
        self.acc.set_time(&format!("{:02}{}", hour, &line[20..22]));

        let number = line[29..44].trim();
        if number.starts_with(|c: char| c.is_ascii_digit()) {
            let digits: String = number.chars().filter(|&c| c != '-').collect();
            self.acc.set_number(&digits);
        } else {
            self.acc.set_number(builtin_alias(number));
        }

        let name = line[55..70].trim();
        if name.is_empty() {
            self.acc.set_name(NONAME);
        } else {
            self.acc.set_name(builtin_alias(name));
        }
    }

    /// `DATE = 0330`, or the combined `DATE TIME=11/24 22:10`.
    fn parse_date(&mut self, line: &str, now: &NaiveDateTime) {
        let value = kv_value(line, 4);
        if !value.is_empty() && !self.acc.has(FieldSet::DATE) {
            let year = clock::year(now);
            if line.contains("TIME") {
                let part = |a: usize, b: usize| value.get(a..b).unwrap_or("");
                let time = format!("{}{}", part(6, 8), part(9, 11));
                if !self.acc.has(FieldSet::TIME) {
                    self.acc.set_time(&time);
                }
                self.acc
                    .set_date(&format!("{}{}{}", part(0, 2), part(3, 5), year));
            } else {
                self.acc.set_date(&format!("{}{}", value, year));
            }
        }
        self.ring.set_cid_sent(false);
    }

    fn complete(&mut self, policy: &dyn CallerPolicy, out: &mut Vec<Emit>) {
        let aliased = policy.alias(&self.acc.number, &self.acc.name, &self.acc.line);
        self.acc.number = aliased.number;
        self.acc.name = aliased.name;
        self.acc.line = aliased.line;

        let mut label = self.acc.call_type.label();
        if self.opts.hangup && self.acc.call_type == CallType::Incoming {
            let decision = policy.hangup_decision(&self.acc.name, &self.acc.number);
            if decision.terminate {
                label = CallType::Hangup.label();
                if let Some(name) = decision.display_name {
                    self.acc.name = name;
                }
                out.push(Emit::Hangup);
            } else if decision.whitelisted {
                if let Some(name) = decision.display_name {
                    self.acc.name = name;
                }
            }
        }

        let rendered = self.acc.render(label);
        debug!("call complete: {}", rendered);
        out.push(Emit::Call(rendered));

        self.acc.reset(&self.opts.lineid);
        self.info_line = self.opts.lineid.clone();
        self.ring.set_cid_sent(true);
    }

    fn ring_info(
        &self,
        ring: i32,
        line: &str,
        policy: &dyn CallerPolicy,
        now: &NaiveDateTime,
    ) -> Emit {
        let line = policy.alias("", "", line).line;
        Emit::Info(format!(
            "CIDINFO: *LINE*{}*RING*{}*TIME*{}*",
            line,
            ring,
            clock::time_only(now)
        ))
    }

    /// Poll-timeout tick. Returns the ring-silence broadcast when one is due.
    pub fn on_poll_timeout(
        &mut self,
        policy: &dyn CallerPolicy,
        clock: &dyn Clock,
    ) -> Option<Emit> {
        if !self.ring.on_timeout() {
            return None;
        }
        debug!("ring silence on line {}", self.info_line);
        let line = std::mem::replace(&mut self.info_line, self.opts.lineid.clone());
        if self.opts.send_cidinfo {
            Some(self.ring_info(0, &line, policy, &clock.now()))
        } else {
            None
        }
    }

    /// Parse a gateway `CALLINFO:` line into one `END:` log line.
    pub fn process_callinfo(
        &mut self,
        line: &str,
        policy: &dyn CallerPolicy,
        clock: &dyn Clock,
    ) -> Vec<Emit> {
        let now = clock.now();
        let mut record = EndOfCall::parse(line, &clock::year(&now));
        let mut out = Vec::new();
        if self.opts.send_cidinfo {
            if let Some(marker) = record.htype.ring_marker() {
                out.push(self.ring_info(marker, &record.line, policy, &now));
            }
        }
        record.apply_alias(policy);
        out.push(Emit::EndOfCall(record.render()));
        out
    }
}
