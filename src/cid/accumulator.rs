//! In-progress Caller-ID event assembled from one or more device lines.

use std::ops::BitOr;

use crate::config::CIDSIZE;
use crate::protocol::{NOMESG, NONAME, NONMBR};

/// Set of call fields received so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FieldSet(u8);

impl FieldSet {
    pub const EMPTY: FieldSet = FieldSet(0);
    pub const DATE: FieldSet = FieldSet(0x01);
    pub const TIME: FieldSet = FieldSet(0x02);
    pub const NMBR: FieldSet = FieldSet(0x04);
    pub const NAME: FieldSet = FieldSet(0x08);
    pub const MESG: FieldSet = FieldSet(0x10);

    /// date, time and number
    pub const ALL3: FieldSet = FieldSet(0x07);
    /// date, time and name
    pub const ALT3: FieldSet = FieldSet(0x0B);
    /// everything a call line needs
    pub const ALL4: FieldSet = FieldSet(0x0F);
    /// number and name without date or time
    pub const NODT: FieldSet = FieldSet(0x0C);

    pub fn contains(self, other: FieldSet) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: FieldSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn insert(&mut self, other: FieldSet) {
        self.0 |= other.0;
    }

    /// The set without the message bit.
    pub fn core(self) -> FieldSet {
        FieldSet(self.0 & 0x0F)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for FieldSet {
    type Output = FieldSet;

    fn bitor(self, rhs: FieldSet) -> FieldSet {
        FieldSet(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallType {
    #[default]
    Incoming,
    Outgoing,
    Hangup,
    Blocked,
    PhoneId,
    Waiting,
}

impl CallType {
    /// Output label, including the trailing space.
    pub fn label(self) -> &'static str {
        match self {
            CallType::Incoming => "CID: ",
            CallType::Outgoing => "OUT: ",
            CallType::Hangup => "HUP: ",
            CallType::Blocked => "BLK: ",
            CallType::PhoneId => "PID: ",
            CallType::Waiting => "WID: ",
        }
    }

    /// Gateway marker found in a `###` line, `CALLIN` being the default.
    pub fn from_gateway_line(line: &str) -> CallType {
        if line.contains("CALLOUT") {
            CallType::Outgoing
        } else if line.contains("CALLHUP") {
            CallType::Hangup
        } else if line.contains("CALLBLK") {
            CallType::Blocked
        } else if line.contains("CALLPID") {
            CallType::PhoneId
        } else if line.contains("CALLWID") {
            CallType::Waiting
        } else {
            CallType::Incoming
        }
    }
}

/// Clip a raw token to the longest value a call field may hold.
pub fn clip(value: &str) -> String {
    value.chars().take(CIDSIZE - 1).collect()
}

#[derive(Debug, Clone)]
pub struct CallAccumulator {
    pub fields: FieldSet,
    pub date: String,
    pub time: String,
    pub number: String,
    pub name: String,
    pub message: String,
    pub line: String,
    pub call_type: CallType,
}

impl CallAccumulator {
    pub fn new(lineid: &str) -> Self {
        Self {
            fields: FieldSet::EMPTY,
            date: String::new(),
            time: String::new(),
            number: String::new(),
            name: String::new(),
            message: NOMESG.to_string(),
            line: lineid.to_string(),
            call_type: CallType::Incoming,
        }
    }

    /// Back to Empty after an emission, keeping nothing from the last call.
    pub fn reset(&mut self, lineid: &str) {
        *self = CallAccumulator::new(lineid);
    }

    pub fn has(&self, field: FieldSet) -> bool {
        self.fields.contains(field)
    }

    pub fn is_complete(&self) -> bool {
        self.fields.core() == FieldSet::ALL4
    }

    pub fn set_date(&mut self, date: &str) {
        self.date = clip(date);
        self.fields.insert(FieldSet::DATE);
    }

    pub fn set_time(&mut self, time: &str) {
        self.time = clip(time);
        self.fields.insert(FieldSet::TIME);
    }

    pub fn set_number(&mut self, number: &str) {
        self.number = clip(number);
        self.fields.insert(FieldSet::NMBR);
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = clip(name);
        self.fields.insert(FieldSet::NAME);
    }

    pub fn set_message(&mut self, message: &str) {
        self.message = clip(message);
        self.fields.insert(FieldSet::MESG);
    }

    /// Fill whichever of number and name is missing with its placeholder.
    pub fn fill_missing_identity(&mut self) {
        if !self.has(FieldSet::NMBR) {
            self.set_number(NONMBR);
        }
        if !self.has(FieldSet::NAME) {
            self.set_name(NONAME);
        }
    }

    /// `<label>*DATE*..*TIME*..*LINE*..*NMBR*..*MESG*..*NAME*..*`
    pub fn render(&self, label: &str) -> String {
        format!(
            "{}*DATE*{}*TIME*{}*LINE*{}*NMBR*{}*MESG*{}*NAME*{}*",
            label, self.date, self.time, self.line, self.number, self.message, self.name
        )
    }
}
