//! The shared-memory window handed to each out-of-process worker.
//!
//! Named POSIX shared memory (`shm_open`/`shm_unlink`, as in
//! `extractor_ipc_gnu.c`'s `/libextractor-shm-<pid>-<rand>` scheme) mapped
//! with [`memmap2`]. On Windows the equivalent pair is
//! `CreateFileMappingW`/`MapViewOfFile` against a pagefile-backed, named
//! mapping — there is no unlink step; the mapping disappears once every
//! handle to it is closed.

#[cfg(unix)]
use std::ffi::CString;
#[cfg(unix)]
use std::fs::File;
#[cfg(unix)]
use std::os::unix::io::FromRawFd;

#[cfg(unix)]
use memmap2::MmapMut as Mapping;
#[cfg(windows)]
use windows_mapping::Mapping;

use crate::config::{SHM_NAME_PREFIX, SHM_WINDOW_SIZE};
use crate::error::ShmError;
use crate::source::facade::DataSource;

/// A single round's shared-memory window: a fixed-size mapping refilled from
/// the data source as the scheduler processes `SEEK`/`UPDATED_SHM` frames.
pub struct SharedWindow {
    name: String,
    map: Mapping,
    /// Absolute offset in the (decompressed) source that `map[0]` currently
    /// mirrors.
    base_offset: u64,
    /// Number of valid bytes starting at `map[0]` (may be less than
    /// [`SHM_WINDOW_SIZE`] near end-of-file).
    valid_len: usize,
}

fn shm_name() -> String {
    let pid = std::process::id();
    let rand: u32 = {
        // A worker-visible name only needs to avoid collisions between
        // concurrently-running engines on the same host; process id plus a
        // coarse counter is enough without pulling in a dedicated RNG crate.
        use std::time::{SystemTime, UNIX_EPOCH};
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        nanos ^ pid
    };
    format!("{SHM_NAME_PREFIX}-{pid}-{rand:08x}")
}

impl SharedWindow {
    /// Create a new named shared-memory segment of [`SHM_WINDOW_SIZE`] bytes
    /// and map it read-write into this process. The worker maps the same
    /// name read-only after it is handed the name in `INIT_STATE`.
    pub fn create() -> Result<SharedWindow, ShmError> {
        let name = shm_name();

        #[cfg(unix)]
        let map = {
            let cname = CString::new(name.as_str()).expect("shm name has no interior NUL");

            let fd = unsafe {
                libc::shm_open(
                    cname.as_ptr(),
                    libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                    0o600,
                )
            };
            if fd < 0 {
                return Err(ShmError::Create(std::io::Error::last_os_error()));
            }
            if unsafe { libc::ftruncate(fd, SHM_WINDOW_SIZE as libc::off_t) } != 0 {
                let err = std::io::Error::last_os_error();
                unsafe {
                    libc::close(fd);
                    let _ = libc::shm_unlink(cname.as_ptr());
                }
                return Err(ShmError::Create(err));
            }

            let file = unsafe { File::from_raw_fd(fd) };
            let map = unsafe { Mapping::map_mut(&file) }.map_err(ShmError::Map)?;
            // `file` owned the fd only long enough for `mmap`; the mapping keeps
            // the pages alive after the descriptor is dropped.
            drop(file);
            map
        };

        #[cfg(windows)]
        let map = Mapping::create(&name, SHM_WINDOW_SIZE)?;

        Ok(SharedWindow {
            name,
            map,
            base_offset: 0,
            valid_len: 0,
        })
    }

    /// The name a worker should `shm_open` to map this window read-only,
    /// carried in the `INIT_STATE` frame.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn valid_len(&self) -> usize {
        self.valid_len
    }

    /// Refill the window from `source` starting at `offset`, updating
    /// `base_offset`/`valid_len`. Short reads near end-of-file leave the
    /// remainder of the window's previous contents in place; only the first
    /// `valid_len` bytes are meaningful.
    pub fn fill(&mut self, source: &mut DataSource, offset: u64) -> Result<(), ShmError> {
        source.seek(offset as i64, crate::source::SeekWhence::Set)?;
        let mut total = 0;
        while total < SHM_WINDOW_SIZE {
            let n = source.read(&mut self.map[total..])?;
            if n == 0 {
                break;
            }
            total += n;
        }
        self.base_offset = offset;
        self.valid_len = total;
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map[..self.valid_len]
    }
}

#[cfg(unix)]
impl Drop for SharedWindow {
    fn drop(&mut self) {
        if let Ok(cname) = CString::new(self.name.as_str()) {
            unsafe {
                let _ = libc::shm_unlink(cname.as_ptr());
            }
        }
    }
}

// The Windows mapping has no unlink step of its own: `Mapping::drop` already
// unmaps the view and closes the handle, which is all a pagefile-backed
// named mapping needs.
#[cfg(windows)]
impl Drop for SharedWindow {
    fn drop(&mut self) {}
}

#[cfg(windows)]
mod windows_mapping {
    use std::ffi::OsStr;
    use std::ops::{Deref, DerefMut};
    use std::os::windows::ffi::OsStrExt;
    use std::ptr;

    use winapi::shared::minwindef::DWORD;
    use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
    use winapi::um::memoryapi::{CreateFileMappingW, MapViewOfFile, UnmapViewOfFile, FILE_MAP_WRITE};
    use winapi::um::winnt::{HANDLE, PAGE_READWRITE};

    use crate::error::ShmError;

    /// A pagefile-backed named mapping, the Windows analogue of POSIX named
    /// shared memory. `Deref`/`DerefMut` to `[u8]` so callers can treat it
    /// the same as [`memmap2::MmapMut`].
    pub struct Mapping {
        handle: HANDLE,
        view: *mut u8,
        len: usize,
    }

    // SAFETY: `Mapping` is only ever owned by a single `SharedWindow`; the
    // raw handle and pointer are not shared across threads behind this type.
    unsafe impl Send for Mapping {}

    impl Mapping {
        pub fn create(name: &str, len: usize) -> Result<Mapping, ShmError> {
            let wide: Vec<u16> = OsStr::new(name)
                .encode_wide()
                .chain(std::iter::once(0))
                .collect();

            // SAFETY: `INVALID_HANDLE_VALUE` requests a pagefile-backed
            // mapping rather than one tied to a file; `wide` is NUL-terminated.
            let handle = unsafe {
                CreateFileMappingW(
                    INVALID_HANDLE_VALUE,
                    ptr::null_mut(),
                    PAGE_READWRITE,
                    0,
                    len as DWORD,
                    wide.as_ptr(),
                )
            };
            if handle.is_null() {
                return Err(ShmError::Create(std::io::Error::last_os_error()));
            }

            // SAFETY: `handle` was just created above and is a valid mapping
            // object of at least `len` bytes.
            let view = unsafe { MapViewOfFile(handle, FILE_MAP_WRITE, 0, 0, len) } as *mut u8;
            if view.is_null() {
                let err = std::io::Error::last_os_error();
                unsafe {
                    CloseHandle(handle);
                }
                return Err(ShmError::Map(err));
            }

            Ok(Mapping { handle, view, len })
        }
    }

    impl Deref for Mapping {
        type Target = [u8];
        fn deref(&self) -> &[u8] {
            // SAFETY: `view` is valid for `len` bytes for the lifetime of `self`.
            unsafe { std::slice::from_raw_parts(self.view, self.len) }
        }
    }

    impl DerefMut for Mapping {
        fn deref_mut(&mut self) -> &mut [u8] {
            // SAFETY: see `deref`; `&mut self` rules out a second live borrow.
            unsafe { std::slice::from_raw_parts_mut(self.view, self.len) }
        }
    }

    impl Drop for Mapping {
        fn drop(&mut self) {
            unsafe {
                UnmapViewOfFile(self.view as _);
                CloseHandle(self.handle);
            }
        }
    }
}
