//! Retrying audio-sector reader. Each sector gets a few attempts to
//! smooth over drive jitter; a sector that stays unreadable aborts the
//! track rather than silently corrupting it.

use crate::cd::ffi::{Device, SECTOR_BYTES};
use thiserror::Error;
use tracing::warn;

const READ_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum ParanoiaError {
    #[error("Read error at sector {lba}: {message}")]
    Read { lba: i64, message: String },
}

/// Sequential sector reader over an open device
pub struct ParanoiaReader<'a> {
    device: &'a Device,
    position: i64,
    errors: u32,
}

impl<'a> ParanoiaReader<'a> {
    pub fn new(device: &'a Device) -> Self {
        Self {
            device,
            position: 0,
            errors: 0,
        }
    }

    /// Position the reader at an absolute LBA.
    pub fn seek(&mut self, lba: i64) {
        self.position = lba;
    }

    /// Recoverable read retries seen so far.
    pub fn error_count(&self) -> u32 {
        self.errors
    }

    /// Read the next sector into `buf` (SECTOR_BYTES long), retrying on
    /// transient failures.
    pub fn read_sector(&mut self, buf: &mut [u8]) -> Result<(), ParanoiaError> {
        debug_assert_eq!(buf.len(), SECTOR_BYTES);
        let lba = self.position;
        let mut last_err = String::new();
        for attempt in 0..READ_RETRIES {
            match self.device.read_audio_sector(lba, buf) {
                Ok(()) => {
                    if attempt > 0 {
                        self.errors += attempt;
                    }
                    self.position += 1;
                    return Ok(());
                }
                Err(e) => {
                    if attempt == 0 {
                        warn!("retrying sector {}: {}", lba, e);
                    }
                    last_err = e.to_string();
                }
            }
        }
        self.errors += READ_RETRIES;
        Err(ParanoiaError::Read {
            lba,
            message: last_err,
        })
    }

    /// Read `count` sectors into `buf` (count * SECTOR_BYTES long).
    pub fn read_sectors(&mut self, count: usize, buf: &mut [u8]) -> Result<(), ParanoiaError> {
        debug_assert_eq!(buf.len(), count * SECTOR_BYTES);
        for chunk in buf.chunks_exact_mut(SECTOR_BYTES) {
            self.read_sector(chunk)?;
        }
        Ok(())
    }
}
