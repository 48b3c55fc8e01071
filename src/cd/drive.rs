//! Drive-level TOC reading and disc identifier computation.

use crate::cd::ffi::{self, Device};
use crate::toc::{self, DiscToc, TrackInfo, FRAMES_PER_SECOND};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("Could not open drive {0}")]
    DeviceUnavailable(String),
    #[error("No audio tracks found on disc")]
    NoMedia,
    #[error("Failed to read disc leadout")]
    ReadError,
    #[error("{0}")]
    Cdio(#[from] ffi::DeviceError),
}

/// An opened CD drive ready for TOC reads and ripping
pub struct CdDrive {
    device: Device,
}

impl CdDrive {
    /// Open a drive, applying the read-speed hint (1x for slow, drive
    /// maximum for fast).
    pub fn open(device_path: &Path, speed_fast: bool) -> Result<Self, DriveError> {
        let device = Device::open(device_path)
            .map_err(|_| DriveError::DeviceUnavailable(device_path.display().to_string()))?;
        device.set_speed(if speed_fast { 0 } else { 1 });
        Ok(Self { device })
    }

    pub fn device_path(&self) -> &Path {
        self.device.device_path()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Read the disc TOC and derive both disc identifiers.
    pub fn read_toc(&self) -> Result<DiscToc, DriveError> {
        let track_count = self.device.num_tracks()?;
        if track_count == 0 {
            return Err(DriveError::NoMedia);
        }
        let first_track = self.device.first_track_num().unwrap_or(1);

        let leadout = self.device.leadout_lba().map_err(|_| DriveError::ReadError)?;
        if leadout <= 0 {
            return Err(DriveError::ReadError);
        }

        let mut tracks = Vec::with_capacity(track_count as usize);
        let mut any_audio = false;
        for i in 0..track_count {
            let number = first_track + i;
            let start = self.device.track_start_lba(number)?;
            let end = if i + 1 < track_count {
                self.device.track_start_lba(number + 1)? - 1
            } else {
                leadout - 1
            };
            let is_audio = self.device.track_is_audio(number);
            any_audio |= is_audio;
            tracks.push(TrackInfo {
                number,
                start,
                end,
                is_audio,
            });
        }
        if !any_audio {
            return Err(DriveError::NoMedia);
        }

        let mut disc_toc = DiscToc {
            tracks,
            leadout_sector: leadout,
            length_seconds: (leadout / FRAMES_PER_SECOND) as u32,
            ..Default::default()
        };
        disc_toc.cddb_discid = toc::cddb_disc_id(&disc_toc);
        match toc::musicbrainz_disc_id(&disc_toc) {
            Some((discid, _)) => disc_toc.mb_discid = Some(discid),
            None => warn!("disc not eligible for a MusicBrainz disc id"),
        }

        info!(
            "💿 TOC: {} track(s), {} sectors, {} s",
            disc_toc.tracks.len(),
            disc_toc.leadout_sector,
            disc_toc.length_seconds
        );
        Ok(disc_toc)
    }
}

impl CdDrive {
    /// Close the drive and eject the disc. Ejection needs the handle
    /// released first, so this consumes the drive.
    pub fn eject(self) -> Result<(), DriveError> {
        let path = self.device.device_path().to_path_buf();
        drop(self);
        ffi::eject_media(&path)?;
        Ok(())
    }
}

/// Candidate drive device paths. The configured device short-circuits
/// detection; otherwise drives with media sort first.
pub fn detect_drives(configured: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = configured {
        return vec![path.to_path_buf()];
    }
    let mut detected = ffi::detect_drives();
    detected.sort_by_key(|d| !d.has_media);
    detected.into_iter().map(|d| d.path).collect()
}
