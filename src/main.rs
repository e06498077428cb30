use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

use clap::{Parser, ValueHint};
use stitchfs::{ConcatFs, Result, StitchError};

/// Mount a source directory with concat description files expanded into
/// virtual concatenated files.
#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[arg(
        value_name = "SOURCE_DIR",
        help = "Directory to overlay (absolute, or relative to the current directory)",
        value_hint = ValueHint::DirPath,
        index = 1
    )]
    source: PathBuf,

    #[arg(
        value_name = "MOUNTPOINT",
        help = "Where to mount the overlay",
        value_hint = ValueHint::DirPath,
        index = 2
    )]
    mountpoint: PathBuf,

    #[arg(
        short = 'j',
        long = "threads",
        default_value_t = default_threads(),
        help = "Number of dispatch threads, defaults to available parallelism"
    )]
    threads: usize,

    #[arg(
        value_name = "FUSE_OPTION",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        help = "Options handed to the FUSE layer verbatim, e.g. -o allow_other"
    )]
    options: Vec<OsString>,
}

fn default_threads() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZero::get)
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let source = resolve_source(&args.source)?;

    if unsafe { libc::getuid() == 0 || libc::geteuid() == 0 } {
        eprintln!(
            "WARNING! stitchfs does no file access checking \
             and therefore is dangerous to use as root!"
        );
    }

    log::info!(
        "mounting {} on {} with {} threads",
        source.display(),
        args.mountpoint.display(),
        args.threads
    );

    let options: Vec<&OsStr> = args.options.iter().map(OsString::as_os_str).collect();
    fuse_mt::mount(
        fuse_mt::FuseMT::new(ConcatFs::new(source), args.threads),
        &args.mountpoint,
        &options,
    )?;
    Ok(())
}

/// Absolute sources are taken as given, relative ones attach to the
/// current working directory. The result must be an existing directory.
fn resolve_source(source: &Path) -> Result<PathBuf> {
    let resolved = if source.is_absolute() {
        source.to_path_buf()
    } else {
        std::env::current_dir()?.join(source)
    };
    if !resolved.is_dir() {
        return Err(StitchError::NotADirectory(resolved));
    }
    Ok(resolved)
}
