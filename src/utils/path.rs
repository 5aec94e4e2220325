//! Path utility functions

use std::path::PathBuf;

/// Per-user cache directory for this application.
///
/// Falls back to the system temp directory when the platform has no cache dir.
pub fn get_cache_dir(app_name: &str) -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(app_name)
}

/// Last path segment of a URL, ignoring any query string
pub fn filename_from_url(url: &str) -> Option<&str> {
    let url_path = url.split(['?', '#']).next().unwrap_or(url);
    url_path.rsplit('/').next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://firmware.ardupilot.org/Sub/stable/Pixhawk1/ardusub.apj"),
            Some("ardusub.apj")
        );
        assert_eq!(
            filename_from_url("https://example.com/fw/ardusub?token=abc"),
            Some("ardusub")
        );
        assert_eq!(filename_from_url("https://example.com/fw/"), None);
    }

    #[test]
    fn test_cache_dir_ends_with_app_name() {
        assert!(get_cache_dir("ardupilot-firmware").ends_with("ardupilot-firmware"));
    }
}
