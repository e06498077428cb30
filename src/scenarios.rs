//! End-to-end engine tests over real temp trees: whole descriptions
//! parsed, registered and read back, the way the FUSE adapter drives them.

use std::os::fd::IntoRawFd;
use std::path::Path;
use std::sync::Arc;

use crate::registry::Registry;
use crate::syscalls;
use crate::vfile::VirtualFile;

fn open_vfile(desc: &Path) -> VirtualFile {
    let fd = syscalls::open(desc, libc::O_RDONLY).expect("open description");
    VirtualFile::from_handle(desc, fd.into_raw_fd()).expect("build virtual file")
}

fn read_exact_at(vf: &VirtualFile, offset: u64, count: usize) -> Vec<u8> {
    let mut buf = vec![0u8; count];
    let n = vf.read_at(&mut buf, offset).expect("read");
    buf.truncate(n);
    buf
}

#[test]
fn three_files_concatenate_in_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a"), b"AAAA").expect("write");
    std::fs::write(dir.path().join("b"), b"BB").expect("write");
    std::fs::write(dir.path().join("c"), b"CCC").expect("write");
    let desc = dir.path().join("m-concat-x");
    std::fs::write(&desc, b"a\nb\nc\n").expect("write desc");

    assert_eq!(VirtualFile::size_of(&desc), 9);

    let vf = open_vfile(&desc);
    assert_eq!(read_exact_at(&vf, 0, 9), b"AAAABBCCC");
    // a read entirely inside the middle segment
    assert_eq!(read_exact_at(&vf, 4, 2), b"BB");
    // a read spanning three segments
    assert_eq!(read_exact_at(&vf, 3, 4), b"ABBC");
}

#[test]
fn sliced_reuse_of_one_backing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a"), b"0123456789").expect("write");
    let desc = dir.path().join("m-concat-x");
    std::fs::write(&desc, b"a:2:5\na:7:\n").expect("write desc");

    let vf = open_vfile(&desc);
    assert_eq!(vf.total_size(), 8);
    assert_eq!(read_exact_at(&vf, 0, 8), b"23456789");
}

#[test]
fn bad_lines_do_not_poison_good_ones() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("good"), b"GOOD").expect("write");
    let desc = dir.path().join("m-concat-x");
    std::fs::write(&desc, b"\nno-such-file\ngood\n").expect("write desc");

    let vf = open_vfile(&desc);
    assert_eq!(vf.total_size(), 4);
    assert_eq!(read_exact_at(&vf, 0, 16), b"GOOD");
}

#[test]
fn split_reads_compose() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a"), b"AAAA").expect("write");
    std::fs::write(dir.path().join("b"), b"BB").expect("write");
    std::fs::write(dir.path().join("c"), b"CCC").expect("write");
    let desc = dir.path().join("m-concat-x");
    std::fs::write(&desc, b"a:1:3\nb\nc::2\n").expect("write desc");

    let vf = open_vfile(&desc);
    let whole = read_exact_at(&vf, 0, vf.total_size() as usize);
    assert_eq!(whole, b"AAABBCC");

    // reading [offset, offset+count) in two pieces must agree with one shot,
    // wherever the cut lands
    for offset in 0..whole.len() as u64 {
        let count = whole.len() - offset as usize;
        for cut in 0..=count {
            let mut pieces = read_exact_at(&vf, offset, cut);
            pieces.extend(read_exact_at(&vf, offset + cut as u64, count - cut));
            assert_eq!(pieces, &whole[offset as usize..], "offset {offset} cut {cut}");
        }
    }
}

#[test]
fn interleaved_reads_on_distinct_handles() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("x"), b"xxxxxxxx").expect("write");
    std::fs::write(dir.path().join("y"), b"yyyyyyyy").expect("write");
    let desc_x = dir.path().join("one-concat-x");
    let desc_y = dir.path().join("two-concat-y");
    std::fs::write(&desc_x, b"x\ny:0:2\n").expect("write desc");
    std::fs::write(&desc_y, b"y\nx:0:2\n").expect("write desc");

    let registry = Arc::new(Registry::new());
    registry.insert(11, open_vfile(&desc_x));
    registry.insert(22, open_vfile(&desc_y));

    let workers: Vec<_> = [(11u64, b"xxxxxxxxyy".to_vec()), (22u64, b"yyyyyyyyxx".to_vec())]
        .into_iter()
        .map(|(fh, expect)| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let vf = registry.find(fh).expect("registered");
                    let mut buf = vec![0u8; expect.len()];
                    assert_eq!(vf.read_at(&mut buf, 0).expect("read"), expect.len());
                    assert_eq!(buf, expect);
                    // offset reads too, straddling the segment border
                    let mut tail = vec![0u8; 4];
                    assert_eq!(vf.read_at(&mut tail, 6).expect("read"), 4);
                    assert_eq!(tail, &expect[6..10]);
                }
            })
        })
        .collect();
    for w in workers {
        w.join().expect("worker");
    }

    assert!(registry.remove(11).is_some());
    assert!(registry.remove(22).is_some());
    assert!(registry.is_empty());
}

#[test]
fn shrunken_backing_file_ends_the_read_early() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a"), b"AAAA").expect("write");
    std::fs::write(dir.path().join("b"), b"BBBB").expect("write");
    std::fs::write(dir.path().join("c"), b"CCCC").expect("write");
    let desc = dir.path().join("m-concat-x");
    std::fs::write(&desc, b"a\nb\nc\n").expect("write desc");

    let vf = open_vfile(&desc);
    assert_eq!(vf.total_size(), 12);

    // the middle backing file shrinks after parse time
    let f = std::fs::OpenOptions::new()
        .write(true)
        .open(dir.path().join("b"))
        .expect("reopen");
    f.set_len(1).expect("truncate");

    // the short segment ends the request; no spill into the next segment
    let mut buf = vec![0u8; 12];
    assert_eq!(vf.read_at(&mut buf, 0).expect("read"), 5);
    assert_eq!(&buf[..5], b"AAAAB");

    // a read starting inside the hole sees nothing at all
    assert_eq!(vf.read_at(&mut buf, 5).expect("read"), 0);

    // the last segment is still reachable by explicit offset
    assert_eq!(read_exact_at(&vf, 8, 4), b"CCCC");
}

#[cfg(target_os = "linux")]
#[test]
fn first_read_error_propagates() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("subdir")).expect("mkdir");
    let desc = dir.path().join("m-concat-x");
    // directories stat with a nonzero size and even open read-only,
    // but pread on them fails
    std::fs::write(&desc, b"subdir\n").expect("write desc");

    let vf = open_vfile(&desc);
    assert!(vf.total_size() > 0);
    let mut buf = [0u8; 8];
    let err = vf.read_at(&mut buf, 0).unwrap_err();
    assert_eq!(err.raw_os_error(), Some(libc::EISDIR));
}

#[cfg(target_os = "linux")]
#[test]
fn error_after_partial_progress_returns_the_partial_count() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a"), b"AAAA").expect("write");
    std::fs::create_dir(dir.path().join("subdir")).expect("mkdir");
    let desc = dir.path().join("m-concat-x");
    std::fs::write(&desc, b"a\nsubdir\n").expect("write desc");

    let vf = open_vfile(&desc);
    let mut buf = vec![0u8; vf.total_size() as usize];
    assert_eq!(vf.read_at(&mut buf, 0).expect("read"), 4);
    assert_eq!(&buf[..4], b"AAAA");
}

#[test]
fn registry_reflects_open_and_release() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a"), b"A").expect("write");
    let desc = dir.path().join("m-concat-x");
    std::fs::write(&desc, b"a\n").expect("write desc");

    let registry = Registry::new();
    assert!(registry.is_empty());

    // two concurrent opens of one description are two independent handles
    let first = open_vfile(&desc);
    let second = open_vfile(&desc);
    registry.insert(3, first);
    registry.insert(4, second);
    assert_eq!(registry.len(), 2);

    assert!(registry.remove(3).is_some());
    assert_eq!(registry.len(), 1);
    assert!(registry.find(4).is_some());
    assert!(registry.remove(4).is_some());
    assert!(registry.is_empty());
}
