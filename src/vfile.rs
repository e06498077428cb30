//! The materialized form of a parsed description: an ordered run of
//! backing-file slices and the random-access read engine over them.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use crate::parse::{self, SliceSpec};
use crate::syscalls;

/// One backing-file slice of a virtual file.
///
/// The backing descriptor is opened read-only when the description line is
/// accepted and lives exactly as long as the segment. `start + length`
/// never exceeds the backing file's size as observed at parse time; the
/// file may still shrink afterwards, which reads surface as a short count.
#[derive(Debug)]
pub struct Segment {
    path: PathBuf,
    backing: OwnedFd,
    start: u64,
    length: u64,
}

impl Segment {
    /// Resolved path of the backing file, kept for diagnostics.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the slice within the backing file.
    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Slice length in bytes, always at least 1.
    #[must_use]
    pub fn length(&self) -> u64 {
        self.length
    }

    fn open(spec: SliceSpec) -> Option<Self> {
        match syscalls::open(&spec.path, libc::O_RDONLY | libc::O_CLOEXEC) {
            Ok(backing) => Some(Self {
                path: spec.path,
                backing,
                start: spec.start,
                length: spec.length,
            }),
            // descriptor pressure or a racing unlink; the line is dropped so
            // the advertised size stays equal to the readable bytes
            Err(err) => {
                log::debug!("cannot open backing file {}: {err}", spec.path.display());
                None
            }
        }
    }
}

/// A virtual concatenated file: ordered segments, their summed size, and
/// (when it came from a real open) the description file's own descriptor.
///
/// The object exclusively owns every descriptor it holds; dropping it
/// closes them all. It is immutable after construction, so concurrent
/// reads through a shared reference are safe.
#[derive(Debug)]
pub struct VirtualFile {
    segments: Vec<Segment>,
    size: u64,
    desc: Option<OwnedFd>,
}

impl VirtualFile {
    /// Builds the virtual file behind an open description handle.
    ///
    /// Reads the description through a private dup of `desc_fd`, opening a
    /// read-only backing descriptor per accepted line. On success the
    /// returned object takes ownership of `desc_fd` and will close it on
    /// drop; on `None` (the dup failed, e.g. the handle is stale) the
    /// caller keeps ownership.
    pub fn from_handle(desc_path: &Path, desc_fd: RawFd) -> Option<Self> {
        let dup = syscalls::dup(desc_fd).ok()?;
        let (segments, size) = collect(BufReader::new(File::from(dup)), desc_path, true);
        Some(Self {
            segments,
            size,
            desc: Some(unsafe { OwnedFd::from_raw_fd(desc_fd) }),
        })
    }

    /// Total size of the description at `desc_path` without opening any
    /// backing descriptor. This is the getattr path and may be called
    /// often; an unreadable description reports 0.
    #[must_use]
    pub fn size_of(desc_path: &Path) -> u64 {
        match File::open(desc_path) {
            Ok(f) => collect(BufReader::new(f), desc_path, false).1,
            Err(_) => 0,
        }
    }

    /// Sum of all segment lengths.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.size
    }

    /// Segments in description order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The description file's own descriptor, present only when this
    /// object took ownership of a real open handle.
    #[must_use]
    pub fn description_fd(&self) -> Option<BorrowedFd<'_>> {
        self.desc.as_ref().map(OwnedFd::as_fd)
    }

    /// Reads up to `buf.len()` bytes of the virtual stream starting at
    /// `offset`, walking as few segments as the request allows.
    ///
    /// Semantics follow POSIX reads: an offset at or past the end returns
    /// 0, a short or zero count from a backing file ends the request with
    /// whatever accumulated, and an I/O error is only surfaced when it
    /// strikes before any byte was delivered. Every backing access is
    /// positional, so concurrent reads on other handles are undisturbed.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }

        // locate the segment containing the starting offset
        let mut segs = self.segments.iter();
        let mut seg_ofs = offset;
        let mut current = loop {
            match segs.next() {
                Some(seg) if seg_ofs >= seg.length => seg_ofs -= seg.length,
                other => break other,
            }
        };

        let mut done = 0usize;
        while let Some(seg) = current {
            let remaining = buf.len() - done;
            if remaining == 0 {
                break;
            }
            let want = u64::min(remaining as u64, seg.length - seg_ofs) as usize;
            let n = match syscalls::pread(
                seg.backing.as_raw_fd(),
                &mut buf[done..done + want],
                seg.start + seg_ofs,
            ) {
                Ok(n) => n,
                Err(err) if done == 0 => return Err(err),
                // partial progress wins; the error resurfaces on the next call
                Err(_) => break,
            };
            done += n;
            if n < want {
                // the backing file came up short, stop here
                break;
            }
            seg_ofs = 0;
            current = segs.next();
        }
        Ok(done)
    }
}

/// Shared walk over a description: yields segments (when `open_backing`)
/// and the running total of accepted slice lengths.
fn collect<R: BufRead>(mut reader: R, desc_path: &Path, open_backing: bool) -> (Vec<Segment>, u64) {
    let base_dir = desc_path.parent().unwrap_or_else(|| Path::new("/"));
    let mut segments = Vec::new();
    let mut size = 0u64;
    let mut line = Vec::new();

    loop {
        line.clear();
        // raw bytes, not lines(): backing paths need not be UTF-8
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            // an unreadable description yields what was accepted so far
            Err(_) => break,
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        let Some(spec) = parse::parse_line(&line, base_dir) else {
            continue;
        };
        if open_backing {
            let Some(segment) = Segment::open(spec) else {
                continue;
            };
            size += segment.length;
            segments.push(segment);
        } else {
            size += spec.length;
        }
    }
    (segments, size)
}
