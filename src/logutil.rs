//! Logging helpers for untrusted wire text and raw modem replies.

use std::fmt::Write;

/// Characters of a line shown before the rest is summarised.
const PREVIEW_CHARS: usize = 160;

/// ASCII control names, indexed by code point.
const C0_NAMES: [&str; 32] = [
    "NUL", "SOH", "STX", "ETX", "EOT", "ENQ", "ACK", "BEL", "BS", "HT", "LF", "VT", "FF", "CR",
    "SO", "SI", "DLE", "DC1", "DC2", "DC3", "DC4", "NAK", "SYN", "ETB", "CAN", "EM", "SUB",
    "ESC", "FS", "GS", "RS", "US",
];

/// Escape a client or device line for single-line logging.
///
/// Controls print as their ASCII names, so a Jump modem's shielded reset
/// reads `<DLE>R<DLE>X` and a stray terminator reads `<CR>`. Lines past
/// [`PREVIEW_CHARS`] end with a count of what was left out.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(PREVIEW_CHARS) + 16);
    let mut chars = s.chars();
    for ch in chars.by_ref().take(PREVIEW_CHARS) {
        match ch as u32 {
            c @ 0..=0x1f => {
                out.push('<');
                out.push_str(C0_NAMES[c as usize]);
                out.push('>');
            }
            0x7f => out.push_str("<DEL>"),
            c if ch.is_control() => {
                let _ = write!(&mut out, "<x{:02X}>", c);
            }
            _ => out.push(ch),
        }
    }
    let rest = chars.count();
    if rest > 0 {
        let _ = write!(&mut out, "...(+{} chars)", rest);
    }
    out
}

/// Render bytes as `hex | ascii` rows of 16, for modem reply tracing.
pub fn hexdump(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in bytes.chunks(16).enumerate() {
        let _ = write!(&mut out, "{:04x}: ", row * 16);
        for i in 0..16 {
            match chunk.get(i) {
                Some(b) => {
                    let _ = write!(&mut out, "{:02x} ", b);
                }
                None => out.push_str("   "),
            }
        }
        out.push_str("| ");
        for b in chunk {
            out.push(if b.is_ascii_graphic() || *b == b' ' {
                *b as char
            } else {
                '.'
            });
        }
        out.push('\n');
    }
    out
}
