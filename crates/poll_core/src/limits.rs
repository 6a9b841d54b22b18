use anyhow::Result;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Validation bounds applied by `create_poll`. A host can override the
/// defaults from a TOML file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollLimits {
    pub min_options: usize,
    pub max_options: usize,
    pub min_duration_secs: i64,
    pub max_title_len: usize,
    pub max_description_len: usize,
    pub max_option_len: usize,
}

impl Default for PollLimits {
    fn default() -> Self {
        Self {
            min_options: 2,
            max_options: 10,
            min_duration_secs: 60,
            max_title_len: 100,
            max_description_len: 500,
            max_option_len: 50,
        }
    }
}

impl PollLimits {
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let limits = toml::from_str(&raw)?;
        Ok(limits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits() {
        let limits = PollLimits::default();
        assert_eq!(limits.min_options, 2);
        assert_eq!(limits.max_options, 10);
        assert_eq!(limits.min_duration_secs, 60);
        assert_eq!(limits.max_title_len, 100);
        assert_eq!(limits.max_description_len, 500);
        assert_eq!(limits.max_option_len, 50);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let limits: PollLimits = toml::from_str("max_options = 4\n").unwrap();
        assert_eq!(limits.max_options, 4);
        assert_eq!(limits.min_options, 2);
        assert_eq!(limits.min_duration_secs, 60);
    }
}
