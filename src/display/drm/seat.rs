//! Seat management for DRM master acquisition (spec.md §4.8).
//!
//! Two paths: acquire master via `libseat`/logind when the
//! `session-libseat` feature is enabled (the non-root, multi-session-aware
//! path), or fall back to a direct `drmSetMaster` ioctl when running with
//! sufficient privilege outside a seat (e.g. a root systemd service with
//! no other DRM master active).

use std::os::unix::io::RawFd;

use anyhow::{Context, Result};

#[cfg(feature = "session-libseat")]
mod libseat_backend {
    use super::*;
    use libseat::Seat;

    pub struct SeatHandle {
        seat: Seat,
    }

    impl SeatHandle {
        pub fn open() -> Result<Self> {
            let seat = Seat::open(|_seat, _event| {}).context("opening libseat session")?;
            Ok(Self { seat })
        }

        pub fn open_device(&mut self, path: &std::path::Path) -> Result<RawFd> {
            self.seat
                .open_device(path)
                .map(|(fd, _device_id)| fd)
                .with_context(|| format!("acquiring {} via libseat", path.display()))
        }
    }
}

#[cfg(not(feature = "session-libseat"))]
mod direct_backend {
    use super::*;
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    pub struct SeatHandle;

    impl SeatHandle {
        pub fn open() -> Result<Self> {
            Ok(Self)
        }

        pub fn open_device(&mut self, path: &std::path::Path) -> Result<RawFd> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_CLOEXEC)
                .open(path)
                .with_context(|| format!("opening {} directly", path.display()))?;
            let fd = file.as_raw_fd();
            // SAFETY: drmSetMaster requires an fd that outlives this call;
            // leaking the File here is intentional, ownership passes to
            // the caller's drm::Device wrapper which closes it on drop.
            std::mem::forget(file);
            unsafe {
                if libc::ioctl(fd, DRM_IOCTL_SET_MASTER, 0) != 0 {
                    log::warn!(
                        "drmSetMaster failed on {}: {}",
                        path.display(),
                        std::io::Error::last_os_error()
                    );
                }
            }
            Ok(fd)
        }
    }

    const DRM_IOCTL_SET_MASTER: u64 = 0x641e;
}

#[cfg(feature = "session-libseat")]
pub use libseat_backend::SeatHandle;
#[cfg(not(feature = "session-libseat"))]
pub use direct_backend::SeatHandle;
