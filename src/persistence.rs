//! Last-good-trim persistence: the write gate and the file-backed cell.

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::info;

use crate::config::PersistenceConfig;
use crate::fixed::Centi;
use crate::traits::TrimStore;
use crate::trim::DAC_MIDPOINT;

/// Unprogrammed non-volatile memory reads as all ones.
pub const BLANK_WORD: u16 = 0xFFFF;

pub struct TrimPersistence<S: TrimStore> {
    store: S,
    steady_error_limit: i64,
    update_offset: i32,
}

impl<S: TrimStore> TrimPersistence<S> {
    pub fn new(store: S, cfg: &PersistenceConfig) -> Self {
        TrimPersistence {
            store,
            steady_error_limit: cfg.steady_error_limit,
            update_offset: i32::from(cfg.update_offset),
        }
    }

    /// Boot-time restore. A blank cell means the oscillator has never been
    /// dialed in; start from mid-scale.
    pub fn restore(&mut self) -> Result<u16> {
        let stored = self.store.read()?;
        let word = if stored == BLANK_WORD {
            DAC_MIDPOINT
        } else {
            stored
        };
        info!("EE=0x{:04x}", stored);
        Ok(word)
    }

    /// Record the word only when the loop is exactly dialed in this window
    /// and the stored value is far enough away to be worth an EEPROM cycle.
    /// Returns whether a write happened.
    pub fn maybe_store(&mut self, current_error: Centi, word: u16) -> Result<bool> {
        if current_error.abs() >= self.steady_error_limit {
            return Ok(false);
        }
        let stored = self.store.read()?;
        if (i32::from(stored) - i32::from(word)).abs() <= self.update_offset {
            return Ok(false);
        }
        self.store.write(word)?;
        info!("EEUP");
        Ok(true)
    }
}

/// One 16-bit word in a little file, standing in for the EEPROM cell.
pub struct FileTrimStore {
    path: PathBuf,
}

impl FileTrimStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileTrimStore { path: path.into() }
    }
}

impl TrimStore for FileTrimStore {
    fn read(&mut self) -> Result<u16> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.len() >= 2 => Ok(u16::from_le_bytes([bytes[0], bytes[1]])),
            Ok(_) => Ok(BLANK_WORD),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BLANK_WORD),
            Err(e) => {
                Err(e).with_context(|| format!("reading trim store {}", self.path.display()))
            }
        }
    }

    fn write(&mut self, word: u16) -> Result<()> {
        std::fs::write(&self.path, word.to_le_bytes())
            .with_context(|| format!("writing trim store {}", self.path.display()))
    }
}
