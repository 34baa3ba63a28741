//! Standard locations for HandDJ configuration

use std::path::PathBuf;

/// Config file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Per-user config directory
///
/// Returns: `{config_dir}/handdj` (e.g. `~/.config/handdj` on Linux), or
/// `./handdj` when the platform has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("handdj")
}

/// Returns: `{config_dir}/handdj/config.yaml`
pub fn default_config_path() -> PathBuf {
    default_config_dir().join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_layout() {
        let path = default_config_path();
        assert!(path.ends_with("handdj/config.yaml"));
        assert_eq!(path.parent().unwrap(), default_config_dir());
    }
}
