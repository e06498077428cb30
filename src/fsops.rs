//! The FUSE-facing adapter.
//!
//! Every operation resolves the inbound path against the source directory
//! and forwards to the host filesystem. Paths classified as concatenation
//! descriptions take the virtual branches instead: getattr reports the
//! concatenated size, open parses and registers a [`VirtualFile`], read
//! runs the segmented engine, and write is refused outright. Everything
//! else is passthrough.

use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::os::unix::ffi::OsStringExt;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuse_mt::{
    CallbackResult, CreatedEntry, DirectoryEntry, FileAttr, FileType, FilesystemMT, RequestInfo,
    ResultCreate, ResultData, ResultEmpty, ResultEntry, ResultOpen, ResultReaddir, ResultSlice,
    ResultWrite,
};
use log::{debug, warn};

use crate::classify::is_concat_path;
use crate::registry::Registry;
use crate::syscalls;
use crate::vfile::VirtualFile;

/// Attribute validity handed to the kernel. Virtual sizes are recomputed
/// on every getattr, so a short lease keeps them honest.
const TTL: Duration = Duration::from_secs(1);

/// The overlay filesystem: a source directory plus the table of open
/// virtual handles. The source path is fixed at construction.
#[derive(Debug)]
pub struct ConcatFs {
    source: PathBuf,
    open_files: Registry,
}

impl ConcatFs {
    #[must_use]
    pub fn new(source: PathBuf) -> Self {
        Self {
            source,
            open_files: Registry::new(),
        }
    }

    /// Maps a mount-relative path onto the source directory.
    fn real_path(&self, partial: &Path) -> PathBuf {
        self.source
            .join(partial.strip_prefix("/").unwrap_or(partial))
    }
}

fn errno(err: io::Error) -> libc::c_int {
    err.raw_os_error().unwrap_or(libc::EIO)
}

fn systime(sec: i64, nsec: i64) -> SystemTime {
    if sec >= 0 {
        UNIX_EPOCH + Duration::new(sec as u64, nsec as u32)
    } else {
        UNIX_EPOCH - Duration::from_secs(sec.unsigned_abs())
    }
}

fn mode_to_kind(mode: u32) -> FileType {
    match mode & (libc::S_IFMT as u32) {
        m if m == libc::S_IFDIR as u32 => FileType::Directory,
        m if m == libc::S_IFLNK as u32 => FileType::Symlink,
        m if m == libc::S_IFBLK as u32 => FileType::BlockDevice,
        m if m == libc::S_IFCHR as u32 => FileType::CharDevice,
        m if m == libc::S_IFIFO as u32 => FileType::NamedPipe,
        m if m == libc::S_IFSOCK as u32 => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn stat_to_attr(st: &libc::stat) -> FileAttr {
    #[cfg(target_os = "macos")]
    let crtime = systime(st.st_birthtime, st.st_birthtime_nsec);
    #[cfg(not(target_os = "macos"))]
    let crtime = systime(st.st_ctime, st.st_ctime_nsec);

    FileAttr {
        size: st.st_size as u64,
        blocks: st.st_blocks as u64,
        atime: systime(st.st_atime, st.st_atime_nsec),
        mtime: systime(st.st_mtime, st.st_mtime_nsec),
        ctime: systime(st.st_ctime, st.st_ctime_nsec),
        crtime,
        kind: mode_to_kind(st.st_mode as u32),
        perm: (st.st_mode & 0o7777) as u16,
        nlink: st.st_nlink as u32,
        uid: st.st_uid,
        gid: st.st_gid,
        rdev: st.st_rdev as u32,
        flags: 0,
    }
}

fn dir_kind(t: fs::FileType) -> FileType {
    if t.is_dir() {
        FileType::Directory
    } else if t.is_symlink() {
        FileType::Symlink
    } else if t.is_block_device() {
        FileType::BlockDevice
    } else if t.is_char_device() {
        FileType::CharDevice
    } else if t.is_fifo() {
        FileType::NamedPipe
    } else if t.is_socket() {
        FileType::Socket
    } else {
        FileType::RegularFile
    }
}

impl FilesystemMT for ConcatFs {
    fn getattr(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>) -> ResultEntry {
        let real = self.real_path(path);
        let st = syscalls::lstat(&real).map_err(errno)?;
        let mut attr = stat_to_attr(&st);
        if is_concat_path(path) {
            // only the size comes from the concatenation; ownership, mode
            // and times stay those of the description file
            attr.size = VirtualFile::size_of(&real);
        }
        Ok((TTL, attr))
    }

    fn readlink(&self, _req: RequestInfo, path: &Path) -> ResultData {
        let real = self.real_path(path);
        let target = fs::read_link(&real).map_err(errno)?;
        Ok(target.into_os_string().into_vec())
    }

    fn mknod(
        &self,
        _req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        mode: u32,
        rdev: u32,
    ) -> ResultEntry {
        let real = self.real_path(parent).join(name);
        syscalls::mknod(&real, mode, rdev).map_err(errno)?;
        let st = syscalls::lstat(&real).map_err(errno)?;
        Ok((TTL, stat_to_attr(&st)))
    }

    fn mkdir(&self, _req: RequestInfo, parent: &Path, name: &OsStr, mode: u32) -> ResultEntry {
        let real = self.real_path(parent).join(name);
        fs::DirBuilder::new()
            .mode(mode)
            .create(&real)
            .map_err(errno)?;
        let st = syscalls::lstat(&real).map_err(errno)?;
        Ok((TTL, stat_to_attr(&st)))
    }

    fn unlink(&self, _req: RequestInfo, parent: &Path, name: &OsStr) -> ResultEmpty {
        fs::remove_file(self.real_path(parent).join(name)).map_err(errno)
    }

    fn rmdir(&self, _req: RequestInfo, parent: &Path, name: &OsStr) -> ResultEmpty {
        fs::remove_dir(self.real_path(parent).join(name)).map_err(errno)
    }

    fn symlink(
        &self,
        _req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        target: &Path,
    ) -> ResultEntry {
        let real = self.real_path(parent).join(name);
        std::os::unix::fs::symlink(target, &real).map_err(errno)?;
        let st = syscalls::lstat(&real).map_err(errno)?;
        Ok((TTL, stat_to_attr(&st)))
    }

    fn rename(
        &self,
        _req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        newparent: &Path,
        newname: &OsStr,
    ) -> ResultEmpty {
        let from = self.real_path(parent).join(name);
        let to = self.real_path(newparent).join(newname);
        fs::rename(from, to).map_err(errno)
    }

    fn link(
        &self,
        _req: RequestInfo,
        path: &Path,
        newparent: &Path,
        newname: &OsStr,
    ) -> ResultEntry {
        let real = self.real_path(path);
        let new = self.real_path(newparent).join(newname);
        fs::hard_link(&real, &new).map_err(errno)?;
        let st = syscalls::lstat(&new).map_err(errno)?;
        Ok((TTL, stat_to_attr(&st)))
    }

    fn chmod(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>, mode: u32) -> ResultEmpty {
        let real = self.real_path(path);
        fs::set_permissions(&real, fs::Permissions::from_mode(mode)).map_err(errno)
    }

    fn chown(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: Option<u64>,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> ResultEmpty {
        let real = self.real_path(path);
        std::os::unix::fs::chown(&real, uid, gid).map_err(errno)
    }

    fn truncate(&self, _req: RequestInfo, path: &Path, _fh: Option<u64>, size: u64) -> ResultEmpty {
        syscalls::truncate(&self.real_path(path), size).map_err(errno)
    }

    fn utimens(
        &self,
        _req: RequestInfo,
        path: &Path,
        _fh: Option<u64>,
        atime: Option<SystemTime>,
        mtime: Option<SystemTime>,
    ) -> ResultEmpty {
        syscalls::utimens(&self.real_path(path), atime, mtime).map_err(errno)
    }

    fn open(&self, _req: RequestInfo, path: &Path, flags: u32) -> ResultOpen {
        let real = self.real_path(path);
        let fd = syscalls::open(&real, flags as libc::c_int).map_err(errno)?;
        let fh = fd.as_raw_fd() as u64;
        // the handle carries the raw descriptor from here on
        let raw = fd.into_raw_fd();

        if is_concat_path(path) {
            match VirtualFile::from_handle(&real, raw) {
                Some(vf) => {
                    debug!(
                        "opened {} as virtual file: {} segments, {} bytes",
                        real.display(),
                        vf.segments().len(),
                        vf.total_size()
                    );
                    self.open_files.insert(fh, vf);
                }
                // reads through this handle will report EINVAL
                None => warn!("description {} opened but not readable", real.display()),
            }
        }
        Ok((fh, flags))
    }

    fn read(
        &self,
        _req: RequestInfo,
        path: &Path,
        fh: u64,
        offset: u64,
        size: u32,
        callback: impl FnOnce(ResultSlice<'_>) -> CallbackResult,
    ) -> CallbackResult {
        let mut buf = vec![0u8; size as usize];
        if is_concat_path(path) {
            let Some(vf) = self.open_files.find(fh) else {
                return callback(Err(libc::EINVAL));
            };
            match vf.read_at(&mut buf, offset) {
                Ok(n) => callback(Ok(&buf[..n])),
                Err(err) => callback(Err(errno(err))),
            }
        } else {
            match syscalls::pread(fh as RawFd, &mut buf, offset) {
                Ok(n) => callback(Ok(&buf[..n])),
                Err(err) => callback(Err(errno(err))),
            }
        }
    }

    fn write(
        &self,
        _req: RequestInfo,
        path: &Path,
        fh: u64,
        offset: u64,
        data: Vec<u8>,
        _flags: u32,
    ) -> ResultWrite {
        if is_concat_path(path) {
            // virtual files are read-only by construction
            return Err(libc::EINVAL);
        }
        let n = syscalls::pwrite(fh as RawFd, &data, offset).map_err(errno)?;
        Ok(n as u32)
    }

    fn release(
        &self,
        _req: RequestInfo,
        path: &Path,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> ResultEmpty {
        if is_concat_path(path) {
            match self.open_files.remove(fh) {
                // dropping the object closes the backing descriptors and
                // the description descriptor it owns
                Some(vf) => debug!(
                    "released virtual handle {fh} ({} segments)",
                    vf.segments().len()
                ),
                // opened but never parsed; the raw descriptor is still ours
                None => syscalls::close(fh as RawFd),
            }
        } else {
            syscalls::close(fh as RawFd);
        }
        Ok(())
    }

    fn opendir(&self, _req: RequestInfo, _path: &Path, _flags: u32) -> ResultOpen {
        // directories are listed by path, no state to carry
        Ok((0, 0))
    }

    fn readdir(&self, _req: RequestInfo, path: &Path, _fh: u64) -> ResultReaddir {
        let real = self.real_path(path);
        let mut entries = Vec::new();
        for entry in fs::read_dir(&real).map_err(errno)? {
            let entry = entry.map_err(errno)?;
            let kind = entry
                .file_type()
                .map(dir_kind)
                .unwrap_or(FileType::RegularFile);
            entries.push(DirectoryEntry {
                name: entry.file_name(),
                kind,
            });
        }
        Ok(entries)
    }

    fn releasedir(&self, _req: RequestInfo, _path: &Path, _fh: u64, _flags: u32) -> ResultEmpty {
        Ok(())
    }

    fn access(&self, _req: RequestInfo, path: &Path, mask: u32) -> ResultEmpty {
        syscalls::access(&self.real_path(path), mask).map_err(errno)
    }

    fn create(
        &self,
        _req: RequestInfo,
        parent: &Path,
        name: &OsStr,
        mode: u32,
        flags: u32,
    ) -> ResultCreate {
        let real = self.real_path(parent).join(name);
        let fd = syscalls::create(&real, mode as libc::mode_t).map_err(errno)?;
        let st = syscalls::lstat(&real).map_err(errno)?;
        Ok(CreatedEntry {
            ttl: TTL,
            attr: stat_to_attr(&st),
            fh: fd.into_raw_fd() as u64,
            flags,
        })
    }
}
