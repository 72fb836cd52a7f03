//! GPS serial input: `$`-anchored sentence assembly and 9600-8N1 port setup.

use std::fs::{File, OpenOptions};
use std::path::Path;

use anyhow::{Context, Result};
use nix::sys::termios::{self, BaudRate, ControlFlags, SetArg};

/// Longest sentence kept; anything longer restarts the scan.
pub const MAX_SENTENCE: usize = 64;

/// Assembles NMEA sentences one byte at a time, the way the receive
/// interrupt does: bytes before the `$` anchor are discarded, CR or LF
/// completes a sentence.
#[derive(Debug, Default)]
pub struct SentenceReader {
    buf: Vec<u8>,
}

impl SentenceReader {
    pub fn new() -> Self {
        SentenceReader::default()
    }

    /// Feed one byte; returns a complete sentence (without the terminator)
    /// when one just finished.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if self.buf.is_empty() && byte != b'$' {
            return None;
        }
        if byte == b'\r' || byte == b'\n' {
            if self.buf.is_empty() {
                return None;
            }
            return Some(std::mem::take(&mut self.buf));
        }
        self.buf.push(byte);
        if self.buf.len() == MAX_SENTENCE {
            self.buf.clear();
        }
        None
    }
}

/// Open a GPS receiver port raw at 9600 8N1.
pub fn open_port(path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("opening GPS port {}", path.display()))?;

    let mut tios = termios::tcgetattr(&file).context("tcgetattr on GPS port")?;
    termios::cfmakeraw(&mut tios);
    termios::cfsetispeed(&mut tios, BaudRate::B9600).context("setting input baud")?;
    termios::cfsetospeed(&mut tios, BaudRate::B9600).context("setting output baud")?;
    tios.control_flags &= !(ControlFlags::PARENB | ControlFlags::CSTOPB);
    tios.control_flags |= ControlFlags::CS8 | ControlFlags::CLOCAL | ControlFlags::CREAD;
    termios::tcsetattr(&file, SetArg::TCSANOW, &tios).context("tcsetattr on GPS port")?;

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(reader: &mut SentenceReader, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| reader.push(b)).collect()
    }

    #[test]
    fn test_assembles_one_sentence() {
        let mut reader = SentenceReader::new();
        let out = feed(&mut reader, b"$GPGSA,A,3*30\r\n");
        assert_eq!(out, vec![b"$GPGSA,A,3*30".to_vec()]);
    }

    #[test]
    fn test_discards_until_anchor() {
        let mut reader = SentenceReader::new();
        let out = feed(&mut reader, b"xx,junk\n$GPGSA,A,1*32\r");
        assert_eq!(out, vec![b"$GPGSA,A,1*32".to_vec()]);
    }

    #[test]
    fn test_crlf_does_not_emit_empty_sentence() {
        let mut reader = SentenceReader::new();
        let out = feed(&mut reader, b"$A*00\r\n\r\n$B*00\n");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_overlong_sentence_restarts() {
        let mut reader = SentenceReader::new();
        let mut input = vec![b'$'];
        input.extend(std::iter::repeat(b'x').take(MAX_SENTENCE));
        assert!(feed(&mut reader, &input).is_empty());
        // The scan restarted: a fresh sentence still comes through.
        let out = feed(&mut reader, b"$GPGSA,A,3*30\n");
        assert_eq!(out.len(), 1);
    }
}
