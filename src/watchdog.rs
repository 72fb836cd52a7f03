//! Hardware watchdog behind the Linux watchdog device.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use anyhow::{Context, Result};
use nix::{ioctl_read, ioctl_readwrite, libc::c_int};

use crate::traits::Watchdog;

// Watchdog ioctl magic 'W'; 5 = keepalive, 6 = set timeout.
ioctl_read!(wd_keepalive, b'W', 5, c_int);
ioctl_readwrite!(wd_set_timeout, b'W', 6, c_int);

/// `/dev/watchdog`-style device. Opening it arms the timer; missing a pet
/// resets the machine, which re-enters through the persisted trim word.
pub struct DeviceWatchdog {
    file: File,
}

impl DeviceWatchdog {
    /// Arm the device with the shortest timeout it will grant. Device
    /// granularity is whole seconds, so the 500 ms target rounds up to 1 s.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .open(path)
            .with_context(|| format!("opening watchdog {}", path.display()))?;
        let mut timeout: c_int = 1;
        // Not all drivers allow reprogramming; the compiled-in timeout wins.
        unsafe {
            let _ = wd_set_timeout(file.as_raw_fd(), &mut timeout);
        }
        Ok(DeviceWatchdog { file })
    }
}

impl Watchdog for DeviceWatchdog {
    fn pet(&mut self) {
        let mut dummy: c_int = 0;
        unsafe {
            let _ = wd_keepalive(self.file.as_raw_fd(), &mut dummy);
        }
    }
}

impl Drop for DeviceWatchdog {
    fn drop(&mut self) {
        // Magic close: disarm so a clean exit is not followed by a reset.
        let _ = self.file.write_all(b"V");
    }
}
