//! Line grammar for concatenation description files.
//!
//! Each non-empty line names one slice of a backing file:
//!
//! ```text
//! path[:[start][:[length]]]
//! ```
//!
//! `start` and `length` are optional non-negative decimals. A missing start
//! means 0, a missing length means "from start to end of file". Paths that
//! do not begin with `/` are resolved against the directory holding the
//! description file. Lines that fail to stat or name an empty file are
//! dropped without complaint so that one stale entry does not poison the
//! rest of the description.

use std::ffi::OsStr;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::syscalls;

/// One validated description line: a resolved path and a clamped slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SliceSpec {
    pub path: PathBuf,
    pub start: u64,
    pub length: u64,
}

/// Parses and validates a single description line (newline already
/// stripped). Returns `None` for every line that must be dropped: blank
/// lines, lines whose path does not stat, and zero-size backing files.
pub(crate) fn parse_line(raw: &[u8], base_dir: &Path) -> Option<SliceSpec> {
    if raw.is_empty() {
        return None;
    }

    let (path_part, fields) = match raw.iter().position(|&b| b == b':') {
        Some(i) => (&raw[..i], Some(&raw[i + 1..])),
        None => (raw, None),
    };
    if path_part.is_empty() {
        return None;
    }

    let path = resolve(path_part, base_dir);

    let size = match syscalls::stat(&path) {
        // nothing usable can be sliced out of an empty file
        Ok(st) if st.st_size < 1 => {
            log::trace!("dropping {}: empty backing file", path.display());
            return None;
        }
        Ok(st) => st.st_size as u64,
        Err(err) => {
            log::trace!("dropping {}: {err}", path.display());
            return None;
        }
    };

    let (start_field, length_field) = match fields {
        Some(rest) => match rest.iter().position(|&b| b == b':') {
            Some(j) => (&rest[..j], Some(&rest[j + 1..])),
            None => (rest, None),
        },
        None => (b"".as_slice(), None),
    };

    // lenient numeric fields: absent and unparseable both mean the default
    let start = decimal_prefix(start_field).unwrap_or(0).min(size - 1);
    let length = length_field
        .and_then(decimal_prefix)
        .unwrap_or(u64::MAX)
        .clamp(1, size - start);

    Some(SliceSpec {
        path,
        start,
        length,
    })
}

fn resolve(path_part: &[u8], base_dir: &Path) -> PathBuf {
    let os = OsStr::from_bytes(path_part);
    if path_part[0] == b'/' {
        PathBuf::from(os)
    } else {
        base_dir.join(os)
    }
}

/// Reads the leading run of ASCII digits, saturating on overflow.
/// `None` when the field does not start with a digit.
pub(crate) fn decimal_prefix(field: &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    let mut seen = false;
    for &b in field {
        if !b.is_ascii_digit() {
            break;
        }
        value = value
            .saturating_mul(10)
            .saturating_add(u64::from(b - b'0'));
        seen = true;
    }
    seen.then_some(value)
}
