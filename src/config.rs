//! Runtime configuration types.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Operand bytes address at most this many locals per frame.
const SLOTS_PER_FRAME: usize = 256;

/// Runtime configuration for the compiler, VM and heap.
///
/// Can be loaded from a TOML file; missing keys take their defaults:
///
/// ```toml
/// trace_execution = false
/// log_gc = true
/// gc_initial_threshold = 65536
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Print the stack and each instruction before executing it
    pub trace_execution: bool,
    /// Print the disassembly of each function after compiling it
    pub print_code: bool,
    /// Log allocations, frees and collections
    pub log_gc: bool,
    /// Collect before every allocation
    pub stress_gc: bool,
    /// Bytes allocated before the first collection
    pub gc_initial_threshold: usize,
    /// Multiplier applied to the live size to get the next threshold
    pub gc_grow_factor: usize,
    /// Maximum call depth
    pub max_frames: usize,
    /// Value stack capacity in slots; `max_frames * 256` when unset
    pub stack_max: Option<usize>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trace_execution: false,
            print_code: false,
            log_gc: false,
            stress_gc: false,
            gc_initial_threshold: 1024 * 1024,
            gc_grow_factor: 2,
            max_frames: 64,
            stack_max: None,
        }
    }
}

impl RuntimeConfig {
    /// Slots available to the value stack.
    pub fn stack_capacity(&self) -> usize {
        self.stack_max
            .unwrap_or(self.max_frames.saturating_mul(SLOTS_PER_FRAME))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert!(!config.stress_gc);
        assert_eq!(config.max_frames, 64);
        assert_eq!(config.stack_capacity(), 16384);
    }

    #[test]
    fn test_partial_toml() {
        let config = RuntimeConfig::from_toml_str("log_gc = true\nmax_frames = 8\n").unwrap();
        assert!(config.log_gc);
        assert_eq!(config.max_frames, 8);
        assert_eq!(config.gc_grow_factor, 2);
    }

    #[test]
    fn test_stack_capacity_follows_max_frames() {
        let config = RuntimeConfig::from_toml_str("max_frames = 128\n").unwrap();
        assert_eq!(config.stack_capacity(), 128 * 256);

        let config = RuntimeConfig::from_toml_str("max_frames = 128\nstack_max = 100\n").unwrap();
        assert_eq!(config.stack_capacity(), 100);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = RuntimeConfig::from_toml_str("jit = true").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = RuntimeConfig::load(Path::new("/nonexistent/lox.toml")).unwrap_err();
        assert!(err.to_string().contains("lox.toml"));
    }
}
