//! # Caller-ID line formatter
//!
//! Turns raw device and gateway text into canonical call lines. The
//! [`LineFormatter`] owns the [`CallAccumulator`] and the ring counters; it
//! never touches sockets or files itself. Each call returns the [`Emit`]
//! actions the server must carry out, in order.
//!
//! ## Device formats
//!
//! - gateway / NetCallerID: `###DATE03301423...CALLOUT...LINE1...NMBR5551212...NAMEJOHN+++`
//! - TCI: one fixed 70 column line
//! - modem key=value lines: `DATE = 0330`, `TIME = 1423`, `NMBR = ...`, `NAME = ...`, `MESG = ...`
//!
//! plus `RING` lines, which drive the ring counter and may complete a
//! partially received call.

pub mod accumulator;
pub mod callinfo;
pub mod clock;
pub mod formatter;
pub mod message;
pub mod ring;

pub use accumulator::{CallAccumulator, CallType, FieldSet};
pub use clock::{Clock, FixedClock, SystemClock};
pub use formatter::{FormatterOptions, LineFormatter};
pub use ring::{RingState, RINGWAIT};

/// Side effect requested by the formatter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Emit {
    /// Append to the call log and broadcast to every client.
    Call(String),
    /// Broadcast only.
    Info(String),
    /// Append to the call log only.
    EndOfCall(String),
    /// Answer and hang up the call now ringing on the modem.
    Hangup,
}
