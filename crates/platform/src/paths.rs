use std::path::PathBuf;

/// The directory downloads land in when no explicit output path is given
/// (spec §4.G `add`'s "configured output directory").
///
/// Prefers the platform download directory (`~/Downloads` and analogues),
/// falling back to the current directory if the platform has none.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_download_dir_is_never_empty() {
        let dir = default_download_dir();
        assert!(!dir.as_os_str().is_empty());
    }
}
