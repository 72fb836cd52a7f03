//! NMEA-0183 checksum verification and `$GPGSA` fix extraction.
//!
//! The receiver chatters constantly; the loop cares about exactly one
//! thing, the fix mode in the GSA sentence (plus the PDOP field, kept for
//! diagnostics). Everything undecodable is dropped without comment.

/// No sentence is shorter than `$GPGGA*xx`.
const MIN_SENTENCE: usize = 9;

/// PDOP is kept verbatim, capped at four characters.
const MAX_PDOP: usize = 4;

/// Fix state extracted from one valid `$GPGSA` sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GsaUpdate {
    pub fix_3d: bool,
    pub pdop: String,
}

fn hex_val(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

/// Verify the `*HH` trailer: XOR of every byte between `$` and `*` must
/// equal the two hex digits after the `*`.
pub fn checksum_ok(sentence: &[u8]) -> bool {
    if sentence.len() < MIN_SENTENCE || sentence[0] != b'$' {
        return false;
    }
    let mut checksum = 0u8;
    let mut star = None;
    for (i, &byte) in sentence.iter().enumerate().skip(1) {
        if byte == b'*' {
            star = Some(i);
            break;
        }
        checksum ^= byte;
    }
    let Some(star) = star else { return false };
    if star + 2 >= sentence.len() {
        return false;
    }
    let sent = (hex_val(sentence[star + 1]) << 4) | hex_val(sentence[star + 2]);
    sent == checksum
}

/// Parse one complete sentence. Returns `None` for anything that is not a
/// well-formed `$GPGSA`: wrong talker, short sentence, bad checksum,
/// missing fields. Field 2 carries the fix mode; `'3'` is a 3D fix and
/// everything else is not. Field 15 is the PDOP.
pub fn parse_gsa(sentence: &[u8]) -> Option<GsaUpdate> {
    if !checksum_ok(sentence) {
        return None;
    }
    if !sentence.starts_with(b"$GPGSA") {
        return None;
    }

    let mut fields = sentence.split(|&b| b == b',');
    let fix_3d = fields.nth(2)?.first() == Some(&b'3');

    // Fields 3..=14 are the satellite slots; 15 is the PDOP. Best effort:
    // a receiver that truncates the tail still delivers the fix mode.
    let pdop = fields
        .nth(12)
        .map(|f| String::from_utf8_lossy(&f[..f.len().min(MAX_PDOP)]).into_owned())
        .unwrap_or_default();

    Some(GsaUpdate { fix_3d, pdop })
}

/// Render a GSA sentence with a correct checksum. The bench GPS feed and
/// the tests both use this.
pub fn encode_gsa(fix_3d: bool, pdop: &str) -> Vec<u8> {
    let mode = if fix_3d { '3' } else { '1' };
    let body = format!("GPGSA,A,{mode},02,06,12,24,25,29,,,,,,,{pdop},1.33,0.90");
    let checksum = body.bytes().fold(0u8, |acc, b| acc ^ b);
    format!("${body}*{checksum:02X}").into_bytes()
}
