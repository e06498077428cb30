/*!
 A FUSE overlay filesystem that turns concat description files into
 virtual concatenated files.

 Any file whose name contains `-concat-` is treated as a description: a
 plain text file listing, one per line, slices of other files as
 `path[:start[:length]]`. Through the mount, that file reads as the
 concatenation of the listed slices while every other path passes straight
 through to the source directory.

 ```text
 $ cat clips/movie-concat-full.mts
 part1.mts
 part2.mts:4096:
 part3.mts
 ```

 The library half of the crate is the concatenation engine itself: the
 description parser, the virtual file object with its segmented positional
 read engine, the registry of open virtual handles, and the adapter that
 maps FUSE operations onto them.
*/

mod classify;
mod error;
mod fsops;
mod parse;
mod registry;
pub mod syscalls;
mod vfile;

pub use classify::{CONCAT_MARKER, is_concat_path};
pub use error::{Result, StitchError};
pub use fsops::ConcatFs;
pub use registry::Registry;
pub use vfile::{Segment, VirtualFile};

#[cfg(test)]
mod scenarios;

#[cfg(all(feature = "mimalloc", any(target_os = "linux", target_os = "macos")))]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;
