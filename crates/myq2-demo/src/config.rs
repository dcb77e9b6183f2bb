// config.rs — parser options, loadable from TOML

use std::path::Path;

use serde::Deserialize;

use crate::error::DemoResult;

/// What to do when a multi-view frame names a player slot beyond the
/// server's published client count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPlayerPolicy {
    /// Track the slot anyway, logging a warning.
    #[default]
    Placeholder,
    /// Fail the parse with a protocol violation.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ParseOptions {
    pub unknown_player_policy: UnknownPlayerPolicy,
    /// Largest single-view lump accepted.
    pub max_lump_size: usize,
    /// Upper bound on decompressed multi-view input.
    pub max_decompressed_size: u64,
    /// Keep decoded frames in the resulting demo. When false frames are
    /// only handed to the dispatcher.
    pub retain_frames: bool,
    /// Treat an unknown sub-message tag as an error instead of skipping
    /// the rest of its block.
    pub strict_tags: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            unknown_player_policy: UnknownPlayerPolicy::Placeholder,
            max_lump_size: 0x10000,
            max_decompressed_size: 256 << 20,
            retain_frames: true,
            strict_tags: false,
        }
    }
}

impl ParseOptions {
    pub fn from_toml_str(s: &str) -> DemoResult<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: impl AsRef<Path>) -> DemoResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DemoError;

    #[test]
    fn test_defaults() {
        let opts = ParseOptions::default();
        assert_eq!(opts.max_lump_size, 65536);
        assert_eq!(opts.max_decompressed_size, 268435456);
        assert!(opts.retain_frames);
        assert!(!opts.strict_tags);
        assert_eq!(opts.unknown_player_policy, UnknownPlayerPolicy::Placeholder);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let opts = ParseOptions::from_toml_str("unknown_player_policy = \"reject\"\nstrict_tags = true\n").unwrap();
        assert_eq!(opts.unknown_player_policy, UnknownPlayerPolicy::Reject);
        assert!(opts.strict_tags);
        assert_eq!(opts.max_lump_size, 0x10000);
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            ParseOptions::from_toml_str("unknown_player_policy = \"maybe\""),
            Err(DemoError::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            ParseOptions::load("/nonexistent/myq2-demo.toml"),
            Err(DemoError::Io(_))
        ));
    }
}
