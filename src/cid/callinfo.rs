//! End-of-call records from gateway `CALLINFO:` lines.
//!
//! ```text
//! CALLINFO: ###BYE...DATE03301420...SCALL03/30/2024 14:19:02...ECALL03/30/2024 14:20:10...CALLIN...LINE-...NMBR555...NAMEFoo+++
//! ```
//!
//! Each field runs from its key to the next `...` or the closing `+++`.

use crate::policy::CallerPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The caller gave up before the call was answered.
    Cancel,
    /// The call was answered and then ended.
    Bye,
    Unknown,
}

impl Termination {
    pub fn as_str(self) -> &'static str {
        match self {
            Termination::Cancel => "CANCEL",
            Termination::Bye => "BYE",
            Termination::Unknown => "-",
        }
    }

    /// Ring number announced in `CIDINFO:` for this termination.
    pub fn ring_marker(self) -> Option<i32> {
        match self {
            Termination::Cancel => Some(-1),
            Termination::Bye => Some(-2),
            Termination::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCall {
    pub htype: Termination,
    pub date: String,
    pub time: String,
    pub scall: String,
    pub ecall: String,
    pub ctype: String,
    pub line: String,
    pub number: String,
    pub name: String,
}

/// Text following `key` up to the next `...` or `+++`.
fn block_field<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let start = line.find(key)? + key.len();
    let rest = &line[start..];
    let end = rest
        .find("...")
        .or_else(|| rest.find("+++"))
        .unwrap_or(rest.len());
    Some(&rest[..end])
}

fn or_dash(value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => "-".to_string(),
    }
}

impl EndOfCall {
    /// Parse a `CALLINFO:` line. `year` completes the 4-digit `MMDD` date.
    pub fn parse(line: &str, year: &str) -> Self {
        let htype = if line.contains("CANCEL") {
            Termination::Cancel
        } else if line.contains("BYE") {
            Termination::Bye
        } else {
            Termination::Unknown
        };

        let (date, time) = match line.find("DATE") {
            Some(pos) => {
                let stamp = &line[pos + 4..];
                let mmdd = stamp.get(0..4).unwrap_or(stamp);
                let hhmm = stamp.get(4..8).unwrap_or("");
                (format!("{}{}", mmdd, year), hhmm.to_string())
            }
            None => ("-".to_string(), "-".to_string()),
        };

        EndOfCall {
            htype,
            date,
            time: if time.is_empty() { "-".to_string() } else { time },
            scall: or_dash(block_field(line, "SCALL")),
            ecall: or_dash(block_field(line, "ECALL")),
            ctype: or_dash(block_field(line, ".CALL")),
            line: or_dash(block_field(line, "LINE")),
            number: or_dash(block_field(line, "NMBR")),
            name: or_dash(block_field(line, "NAME")),
        }
    }

    pub fn apply_alias(&mut self, policy: &dyn CallerPolicy) {
        let aliased = policy.alias(&self.number, &self.name, &self.line);
        self.number = aliased.number;
        self.name = aliased.name;
        self.line = aliased.line;
    }

    pub fn render(&self) -> String {
        format!(
            "END: *HTYPE*{}*DATE*{}*TIME*{}*SCALL*{}*ECALL*{}*CTYPE*{}*LINE*{}*NMBR*{}*NAME*{}*",
            self.htype.as_str(),
            self.date,
            self.time,
            self.scall,
            self.ecall,
            self.ctype,
            self.line,
            self.number,
            self.name
        )
    }
}
