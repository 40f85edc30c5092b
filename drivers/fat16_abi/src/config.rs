use std::str::FromStr;

use fat16::MountOptions;
use log::LevelFilter;

pub const ENV_LOG: &str = "FAT16_LOG";
pub const ENV_MAX_OPEN_FILES: &str = "FAT16_MAX_OPEN_FILES";
pub const ENV_ALLOW_NON_FAT16: &str = "FAT16_ALLOW_NON_FAT16";

/// Process settings read from the environment the first time the library is
/// entered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbiConfig {
    pub log_level: LevelFilter,
    pub mount:     MountOptions,
}

impl Default for AbiConfig {
    fn default() -> Self {
        Self { log_level: LevelFilter::Warn, mount: MountOptions::DEFAULT }
    }
}

impl AbiConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values keep their defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(level) = get(ENV_LOG).and_then(|v| LevelFilter::from_str(v.trim()).ok()) {
            cfg.log_level = level;
        }
        if let Some(n) = get(ENV_MAX_OPEN_FILES).and_then(|v| v.trim().parse::<usize>().ok()) {
            cfg.mount = cfg.mount.with_max_open_files(n);
        }
        if let Some(v) = get(ENV_ALLOW_NON_FAT16) {
            let allow = matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
            cfg.mount = cfg.mount.with_require_fat16(!allow);
        }
        cfg
    }
}
