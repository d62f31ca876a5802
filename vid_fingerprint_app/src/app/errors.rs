use thiserror::Error;
use vid_fingerprint_lib::{CacheError, Error, StoreError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Fingerprint(#[from] Error),

    #[error("Fingerprint store error: {0}")]
    Store(#[from] StoreError),

    #[error("Thumbnail cache error: {0}")]
    Thumbnail(#[from] CacheError),

    #[error("Could not parse --ffmpeg-args {args:?}: {msg}")]
    FfmpegArgs { args: String, msg: String },

    #[error("Cannot compare {0} with {1}: at least one of them could not be sampled, or they share no sample positions")]
    NotComparable(String, String),
}

pub fn print_error_and_quit(e: eyre::Report) -> ! {
    #[allow(clippy::print_stderr)]
    let () = eprintln!("{:?}", e);
    std::process::exit(1);
}
