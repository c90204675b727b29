//! Cross-platform default paths.

mod paths;

pub use paths::default_download_dir;
