//! Thin safe wrappers around the handful of `libc` calls the engine needs.
//!
//! Everything here captures `errno` into an [`std::io::Error`] at the call
//! site, so callers can use `?` and inspect `raw_os_error()` at the FUSE
//! boundary. Positional reads and writes never touch the descriptor's file
//! offset, which is what makes concurrent reads on shared backing files safe.

use std::ffi::CString;
use std::io;
use std::mem::MaybeUninit;
use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Builds the NUL-terminated form of `path` for the C interface.
///
/// An interior NUL cannot name anything on disk, so it maps to `EINVAL`.
fn cstring(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

/// Opens `path` with raw `open(2)` flags and returns an owned descriptor.
pub fn open(path: &Path, flags: libc::c_int) -> io::Result<OwnedFd> {
    let cpath = cstring(path)?;
    let fd = unsafe { libc::open(cpath.as_ptr(), flags) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // freshly returned by the kernel, nothing else owns it yet
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// `creat(2)`: open for writing, creating or truncating with `mode`.
pub fn create(path: &Path, mode: libc::mode_t) -> io::Result<OwnedFd> {
    let cpath = cstring(path)?;
    let fd = unsafe {
        libc::open(
            cpath.as_ptr(),
            libc::O_CREAT | libc::O_WRONLY | libc::O_TRUNC,
            libc::c_uint::from(mode),
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Duplicates a descriptor we do not own into one we do.
pub fn dup(fd: RawFd) -> io::Result<OwnedFd> {
    let new = unsafe { libc::dup(fd) };
    if new < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { OwnedFd::from_raw_fd(new) })
}

/// Closes a raw descriptor whose ownership never made it into an [`OwnedFd`].
///
/// Errors from `close(2)` are ignored, matching release semantics where
/// there is nobody left to report them to.
pub fn close(fd: RawFd) {
    unsafe { libc::close(fd) };
}

/// `pread(2)`: positional read, descriptor offset untouched.
pub fn pread(fd: RawFd, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    let rv = unsafe {
        libc::pread(
            fd,
            buf.as_mut_ptr().cast::<libc::c_void>(),
            buf.len(),
            offset as libc::off_t,
        )
    };
    if rv < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rv as usize)
}

/// `pwrite(2)`: positional write, descriptor offset untouched.
pub fn pwrite(fd: RawFd, buf: &[u8], offset: u64) -> io::Result<usize> {
    let rv = unsafe {
        libc::pwrite(
            fd,
            buf.as_ptr().cast::<libc::c_void>(),
            buf.len(),
            offset as libc::off_t,
        )
    };
    if rv < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rv as usize)
}

/// `stat(2)`, following symlinks.
pub fn stat(path: &Path) -> io::Result<libc::stat> {
    let cpath = cstring(path)?;
    let mut st = MaybeUninit::<libc::stat>::uninit();
    if unsafe { libc::stat(cpath.as_ptr(), st.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { st.assume_init() })
}

/// `lstat(2)`, reporting symlinks themselves.
pub fn lstat(path: &Path) -> io::Result<libc::stat> {
    let cpath = cstring(path)?;
    let mut st = MaybeUninit::<libc::stat>::uninit();
    if unsafe { libc::lstat(cpath.as_ptr(), st.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(unsafe { st.assume_init() })
}

/// `truncate(2)` by path.
pub fn truncate(path: &Path, size: u64) -> io::Result<()> {
    let cpath = cstring(path)?;
    if unsafe { libc::truncate(cpath.as_ptr(), size as libc::off_t) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `mknod(2)` by path.
pub fn mknod(path: &Path, mode: u32, rdev: u32) -> io::Result<()> {
    let cpath = cstring(path)?;
    if unsafe { libc::mknod(cpath.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `access(2)` by path.
pub fn access(path: &Path, mask: u32) -> io::Result<()> {
    let cpath = cstring(path)?;
    if unsafe { libc::access(cpath.as_ptr(), mask as libc::c_int) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// `utimensat(2)` with `UTIME_OMIT` standing in for absent timestamps.
pub fn utimens(
    path: &Path,
    atime: Option<SystemTime>,
    mtime: Option<SystemTime>,
) -> io::Result<()> {
    let cpath = cstring(path)?;
    let times = [to_timespec(atime), to_timespec(mtime)];
    if unsafe { libc::utimensat(libc::AT_FDCWD, cpath.as_ptr(), times.as_ptr(), 0) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn to_timespec(t: Option<SystemTime>) -> libc::timespec {
    match t.map(|t| t.duration_since(UNIX_EPOCH)) {
        Some(Ok(d)) => libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: libc::c_long::from(d.subsec_nanos()),
        },
        // pre-epoch timestamps collapse to the epoch itself
        Some(Err(_)) => libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        },
        None => libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_OMIT,
        },
    }
}
