//! Safe wrapper around libcdio-sys for drive access and raw audio
//! sector reads.
//!
//! Requires the libcdio system library:
//! - Linux: `apt-get install libcdio-dev` or `dnf install libcdio-devel`
//! - macOS: `brew install libcdio`

use std::ffi::{CStr, CString};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bytes in one raw CD audio sector
pub const SECTOR_BYTES: usize = libcdio_sys::CDIO_CD_FRAMESIZE_RAW as usize;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Could not open drive {0}")]
    Open(String),
    #[error("Invalid device path")]
    InvalidPath,
    #[error("libcdio error: {0}")]
    Cdio(String),
    #[error("Read error: {0}")]
    Read(String),
}

/// An open libcdio device handle
pub struct Device {
    cdio: *mut libcdio_sys::CdIo_t,
    device_path: PathBuf,
}

// The handle is only ever used from one thread at a time; the raw
// pointer itself is safe to move across threads.
unsafe impl Send for Device {}

impl Device {
    pub fn open(device_path: &Path) -> Result<Self, DeviceError> {
        let path_str = device_path.to_str().ok_or(DeviceError::InvalidPath)?;
        let c_path = CString::new(path_str).map_err(|_| DeviceError::InvalidPath)?;
        unsafe {
            let cdio =
                libcdio_sys::cdio_open(c_path.as_ptr(), libcdio_sys::driver_id_t_DRIVER_DEVICE);
            if cdio.is_null() {
                return Err(DeviceError::Open(path_str.to_string()));
            }
            Ok(Self {
                cdio,
                device_path: device_path.to_path_buf(),
            })
        }
    }

    pub fn device_path(&self) -> &Path {
        &self.device_path
    }

    pub fn has_disc(&self) -> bool {
        unsafe {
            libcdio_sys::cdio_get_discmode(self.cdio)
                != libcdio_sys::discmode_t_CDIO_DISC_MODE_NO_INFO
        }
    }

    pub fn first_track_num(&self) -> Result<u32, DeviceError> {
        let first = unsafe { libcdio_sys::cdio_get_first_track_num(self.cdio) } as i32;
        if first < 0 {
            return Err(DeviceError::Cdio("failed to get first track".to_string()));
        }
        Ok(first as u32)
    }

    pub fn num_tracks(&self) -> Result<u32, DeviceError> {
        let num = unsafe { libcdio_sys::cdio_get_num_tracks(self.cdio) } as i32;
        if num < 0 {
            return Err(DeviceError::Cdio("failed to get track count".to_string()));
        }
        Ok(num as u32)
    }

    pub fn track_start_lba(&self, track_num: u32) -> Result<i64, DeviceError> {
        let lba = unsafe {
            libcdio_sys::cdio_get_track_lba(self.cdio, track_num as libcdio_sys::track_t)
        };
        if lba < 0 {
            return Err(DeviceError::Cdio(format!(
                "failed to get LBA for track {}",
                track_num
            )));
        }
        Ok(i64::from(lba))
    }

    pub fn leadout_lba(&self) -> Result<i64, DeviceError> {
        let lba = unsafe {
            libcdio_sys::cdio_get_track_lba(
                self.cdio,
                libcdio_sys::cdio_track_enums_CDIO_CDROM_LEADOUT_TRACK as libcdio_sys::track_t,
            )
        };
        if lba < 0 {
            return Err(DeviceError::Cdio("failed to get leadout LBA".to_string()));
        }
        Ok(i64::from(lba))
    }

    pub fn track_is_audio(&self, track_num: u32) -> bool {
        unsafe {
            libcdio_sys::cdio_get_track_format(self.cdio, track_num as libcdio_sys::track_t)
                == libcdio_sys::track_format_t_TRACK_FORMAT_AUDIO
        }
    }

    /// Drive read-speed hint; not all drives honor it, errors ignored.
    pub fn set_speed(&self, speed: i32) {
        unsafe {
            libcdio_sys::cdio_set_speed(self.cdio, speed);
        }
    }

    /// Read one raw audio sector into `buf` (must be SECTOR_BYTES long).
    pub fn read_audio_sector(&self, lba: i64, buf: &mut [u8]) -> Result<(), DeviceError> {
        debug_assert_eq!(buf.len(), SECTOR_BYTES);
        let result = unsafe {
            libcdio_sys::cdio_read_audio_sector(
                self.cdio,
                buf.as_mut_ptr() as *mut libc::c_void,
                lba as libcdio_sys::lba_t,
            )
        };
        if result != 0 {
            return Err(DeviceError::Read(format!(
                "failed to read sector at LBA {}",
                lba
            )));
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if !self.cdio.is_null() {
                libcdio_sys::cdio_destroy(self.cdio);
            }
        }
    }
}

/// Eject the disc from a drive by device path. The device handle must
/// be closed first.
pub fn eject_media(device_path: &Path) -> Result<(), DeviceError> {
    let path_str = device_path.to_str().ok_or(DeviceError::InvalidPath)?;
    let c_path = CString::new(path_str).map_err(|_| DeviceError::InvalidPath)?;
    let rc = unsafe { libcdio_sys::cdio_eject_media_drive(c_path.as_ptr()) };
    if rc != libcdio_sys::driver_return_code_t_DRIVER_OP_SUCCESS {
        return Err(DeviceError::Cdio(format!(
            "failed to eject disc from {}",
            path_str
        )));
    }
    Ok(())
}

/// A drive libcdio knows about, with a cheap media probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedDrive {
    pub path: PathBuf,
    pub has_media: bool,
}

fn probe_media(path: &Path) -> bool {
    Device::open(path).map(|d| d.has_disc()).unwrap_or(false)
}

/// Enumerate CD drives via libcdio's device list, falling back to the
/// usual Unix device nodes when it reports none.
pub fn detect_drives() -> Vec<DetectedDrive> {
    let mut drives: Vec<DetectedDrive> = Vec::new();
    unsafe {
        let device_list = libcdio_sys::cdio_get_devices(libcdio_sys::driver_id_t_DRIVER_DEVICE);
        if !device_list.is_null() {
            let mut p = device_list;
            while !(*p).is_null() {
                let path = PathBuf::from(CStr::from_ptr(*p).to_string_lossy().to_string());
                let has_media = probe_media(&path);
                if !drives.iter().any(|d| d.path == path) {
                    drives.push(DetectedDrive { path, has_media });
                }
                p = p.add(1);
            }
            libcdio_sys::cdio_free_device_list(device_list);
        }
    }

    #[cfg(unix)]
    if drives.is_empty() {
        for path_str in ["/dev/cdrom", "/dev/sr0", "/dev/sr1", "/dev/cdrom0", "/dev/cdrom1"] {
            let path = PathBuf::from(path_str);
            if path.exists() && Device::open(&path).is_ok() {
                let has_media = probe_media(&path);
                drives.push(DetectedDrive { path, has_media });
            }
        }
    }

    drives
}
