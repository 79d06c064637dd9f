//! AT command replies.

/// Attempts (100 ms apart) to read a reply to one command.
pub const READTRY: u32 = 10;
/// Times the init string is resent while the modem answers `ERROR`.
pub const MODEMTRY: u32 = 6;

pub const INITCID_PRIMARY: &str = "AT+VCID=1";
pub const INITCID_FALLBACK: &str = "AT#CID=1";
pub const PICKUP: &str = "ATH1";
pub const HANGUP: &str = "ATH0";

/// Seconds the line is held off-hook before hanging up a blacklisted call.
pub const HANGUP_DELAY_SECS: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModemReply {
    Ok,
    Connect,
    Error,
    /// Something arrived but no result code.
    Garbled,
    Silent,
}

impl ModemReply {
    /// Classify everything read so far. `Garbled` means keep reading.
    pub fn classify(buf: &[u8]) -> ModemReply {
        if buf.is_empty() {
            return ModemReply::Silent;
        }
        let text = String::from_utf8_lossy(buf);
        if text.contains("OK") {
            ModemReply::Ok
        } else if text.contains("CONNECT") {
            ModemReply::Connect
        } else if text.contains("ERROR") {
            ModemReply::Error
        } else {
            ModemReply::Garbled
        }
    }

    pub fn is_final(self) -> bool {
        matches!(self, ModemReply::Ok | ModemReply::Connect | ModemReply::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_result_codes() {
        assert_eq!(ModemReply::classify(b""), ModemReply::Silent);
        assert_eq!(ModemReply::classify(b"AT Z\r\r\nOK\r\n"), ModemReply::Ok);
        assert_eq!(ModemReply::classify(b"\r\nCONNECT 9600\r\n"), ModemReply::Connect);
        assert_eq!(ModemReply::classify(b"AT#CID=1\r\nERROR\r\n"), ModemReply::Error);
        assert_eq!(ModemReply::classify(b"AT#C"), ModemReply::Garbled);
        assert!(!ModemReply::Garbled.is_final());
    }
}
