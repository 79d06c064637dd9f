//! # Wire protocol
//!
//! Constants for the line protocol spoken with clients, and [`ClientLine`],
//! the classification of one inbound client line.
//!
//! Every line on the wire ends in CRLF. A single line never exceeds
//! [`MAX_LINE`] bytes; longer input is split by the slot framer.
//!
//! Classification order matters: server-forwarded tags are recognized before
//! `MSG: `/`NOT: ` so a peer's already formatted message is relayed verbatim
//! instead of being wrapped a second time.

pub mod fields;

pub use fields::extract_field;

/// Largest line accepted from or sent to a slot, in bytes.
pub const MAX_LINE: usize = 8192;

pub const NONAME: &str = "NO NAME";
pub const NONMBR: &str = "NO-NUMBER";
pub const NOLINE: &str = "NO-LINE";
pub const NOTYPE: &str = "-";
pub const NOMESG: &str = "NONE";
pub const NOCID: &str = "No Caller ID";
pub const NOALIAS: &str = "NOALIAS";

pub const API_VERSION: &str = "1.0";

pub const LOG_SENT: &str = "250 End of call log";
pub const LOG_NOT_SENT: &str = "251 Call log not sent";
pub const LOG_EMPTY: &str = "252 Call log empty";
pub const LOG_MISSING: &str = "253 No Call log";
pub const STARTUP_DONE: &str = "300 End of connection startup";
pub const DATA_OK: &str = "400 Start of data requiring OK";
pub const DATA_ACCEPT: &str = "401 Start of data requiring ACCEPT or REJECT";
pub const DATA_STATUS: &str = "402 Start of data showing status of handled request";
pub const DATA_PERMITTED: &str = "403 Start of data defining permitted requests";
pub const DATA_END: &str = "410 End of data";
pub const RESPONSE_END: &str = "411 End of response";

pub const OPT_HANGUP: &str = "OPT: hangup";

pub const ACK_PREFIX: &str = "ACK: ";
pub const INFO_PREFIX: &str = "INFO: ";
pub const RESP_PREFIX: &str = "RESP: ";
pub const RELOADED: &str = "Alias, blacklist and whitelist files have been read";

/// First-line markers from the update helper meaning "nothing to accept".
pub const NO_CHANGES: [&str; 2] = ["no changes", "denied"];

/// Tags a peer server may forward to us verbatim.
pub const SERVER_TAGS: [&str; 10] = [
    "BLK:", "CID:", "CIDINFO:", "END:", "HUP:", "MSG:", "NOT:", "OUT:", "PID:", "WID:",
];

/// Call log line tags that are rewritten `<TAG>LOG:` when the log is sent.
pub const LOG_TAGS: [&str; 9] = [
    "BLK", "CID", "END", "HUP", "MSG", "NOT", "OUT", "PID", "WID",
];

pub fn server_announce() -> String {
    format!("200 Server: cidrelay {}", env!("CARGO_PKG_VERSION"))
}

pub fn api_announce() -> String {
    format!("210 API: {}", API_VERSION)
}

/// Kind of a client-originated message line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Msg,
    Not,
}

impl MessageKind {
    pub fn label(self) -> &'static str {
        match self {
            MessageKind::Msg => "MSG:",
            MessageKind::Not => "NOT:",
        }
    }
}

/// Target of a list-management request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Black,
    Alias,
    White,
}

impl ListKind {
    /// Argument naming the list to the utility helper.
    pub fn helper_type(self) -> &'static str {
        match self {
            ListKind::Black => "Black",
            ListKind::Alias => "Alias",
            ListKind::White => "White",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    Reload,
    Update { multi: bool },
    Reread,
    Ack,
    Yo,
    List { list: ListKind, args: &'a str },
    Info { number: &'a str, name: &'a str, line: &'a str },
    Unsupported(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Work {
    AcceptLog { all: bool },
    RejectLog { all: bool },
    Unsupported,
}

/// One inbound client line, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientLine<'a> {
    Empty,
    /// `CALL: ` with the prefix removed.
    Call(&'a str),
    /// `CALLINFO: ` line, kept whole.
    CallInfo(&'a str),
    /// A peer server's formatted line with a known tag.
    Forward(&'a str),
    /// Looks server-forwarded but carries no tag we relay.
    UnknownForward(&'a str),
    Message(MessageKind, &'a str),
    Request(Request<'a>),
    Work(Work),
    Unknown(&'a str),
}

/// True when the line has the shape of a formatted server line: a 3, 7 or 8
/// character tag followed by `: *`, or a 3 character tag whose text carries a
/// `***` field block.
pub fn is_server_line(line: &str) -> bool {
    let at = |i: usize, pat: &str| line.get(i..).is_some_and(|s| s.starts_with(pat));
    at(3, ": *") || at(7, ": *") || at(8, ": *") || (at(3, ": ") && line.contains("***"))
}

impl<'a> ClientLine<'a> {
    pub fn parse(line: &'a str) -> ClientLine<'a> {
        if line.is_empty() {
            return ClientLine::Empty;
        }
        if let Some(rest) = line.strip_prefix("CALL: ") {
            return ClientLine::Call(rest);
        }
        if line.starts_with("CALLINFO: ") {
            return ClientLine::CallInfo(line);
        }
        if is_server_line(line) {
            return if SERVER_TAGS.iter().any(|t| line.starts_with(t)) {
                ClientLine::Forward(line)
            } else {
                ClientLine::UnknownForward(line)
            };
        }
        if line.starts_with("MSG: ") {
            return ClientLine::Message(MessageKind::Msg, line);
        }
        if line.starts_with("NOT: ") {
            return ClientLine::Message(MessageKind::Not, line);
        }
        if let Some(body) = line.strip_prefix("REQ: ") {
            return ClientLine::Request(parse_request(body));
        }
        if let Some(body) = line.strip_prefix("WRK: ") {
            return ClientLine::Work(parse_work(body));
        }
        ClientLine::Unknown(line)
    }
}

fn parse_request(body: &str) -> Request<'_> {
    let mut words = body.splitn(2, ' ');
    let keyword = words.next().unwrap_or("");
    let rest = words.next().unwrap_or("").trim();
    match keyword {
        "RELOAD" => Request::Reload,
        "UPDATE" => Request::Update { multi: false },
        "UPDATES" => Request::Update { multi: true },
        "REREAD" => Request::Reread,
        "ACK" if rest.is_empty() => Request::Ack,
        "YO" if rest.is_empty() => Request::Yo,
        "black" if !rest.is_empty() => Request::List { list: ListKind::Black, args: rest },
        "alias" if !rest.is_empty() => Request::List { list: ListKind::Alias, args: rest },
        "white" if !rest.is_empty() => Request::List { list: ListKind::White, args: rest },
        "INFO" if !rest.is_empty() => {
            let mut parts = rest.splitn(3, "&&");
            let number = parts.next().unwrap_or("");
            let name = parts.next().unwrap_or("");
            let line = parts.next().unwrap_or("");
            Request::Info { number, name, line }
        }
        _ => Request::Unsupported(body),
    }
}

fn parse_work(body: &str) -> Work {
    let mut words = body.split_whitespace();
    let action = words.next();
    let target = words.next();
    let all = match target {
        Some("LOG") => false,
        Some("LOGS") => true,
        _ => return Work::Unsupported,
    };
    match action {
        Some("ACCEPT") => Work::AcceptLog { all },
        Some("REJECT") => Work::RejectLog { all },
        _ => Work::Unsupported,
    }
}

/// Rewrite one call log line for transfer to a client: `CID: ...` becomes
/// `CIDLOG: ...`, anything untagged becomes `LOG: ...`.
pub fn log_transfer_line(line: &str) -> String {
    for tag in LOG_TAGS {
        if let Some(rest) = line.strip_prefix(tag).and_then(|r| r.strip_prefix(':')) {
            return format!("{}LOG:{}", tag, rest);
        }
    }
    format!("LOG: {}", line)
}
