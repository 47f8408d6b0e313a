//! Runtime-tunable thresholds, read once from the environment.
//!
//! Grounded on `otter-vm-exec/src/jit_runtime.rs`'s `parse_env_u32`: parse
//! via `Option`/`and_then`, fall back silently to the compiled default on
//! anything missing or malformed (spec §6/§7 — these values are never
//! reported as misconfigured, just defaulted).

use std::env;

/// Byte count above which the heap triggers a major collection cycle
/// (spec §4.1/§6 "collection trigger").
pub const DEFAULT_MAJOR_COLLECTION: u32 = 64 * 1024;

/// Byte count of allocation between paced incremental mark steps (spec
/// §4.2/§6 "threshold for an incremental mark increment").
pub const DEFAULT_INCMARK_THRESHOLD: u32 = 4 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    /// Bytes allocated since the last collection that trigger a new, full
    /// synchronous cycle (`MAJOR_COLLECTION` env var, in bytes).
    pub major_collection: u32,
    /// Bytes allocated since the last incremental mark step that trigger
    /// another one (`INCMARK` env var, in bytes).
    pub incmark_threshold: u32,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            major_collection: DEFAULT_MAJOR_COLLECTION,
            incmark_threshold: DEFAULT_INCMARK_THRESHOLD,
        }
    }
}

impl GcConfig {
    /// Build a config from the environment, falling back to defaults for
    /// anything absent or unparsable.
    pub fn from_env() -> Self {
        Self {
            major_collection: parse_env_u32("MAJOR_COLLECTION").unwrap_or(DEFAULT_MAJOR_COLLECTION),
            incmark_threshold: parse_env_u32("INCMARK").unwrap_or(DEFAULT_INCMARK_THRESHOLD),
        }
    }
}

fn parse_env_u32(name: &str) -> Option<u32> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_var_falls_back_to_default() {
        assert_eq!(parse_env_u32("QCGC_TEST_DOES_NOT_EXIST"), None);
        assert_eq!(
            GcConfig {
                major_collection: parse_env_u32("QCGC_TEST_DOES_NOT_EXIST")
                    .unwrap_or(DEFAULT_MAJOR_COLLECTION),
                ..Default::default()
            }
            .major_collection,
            DEFAULT_MAJOR_COLLECTION
        );
    }

    #[test]
    fn malformed_value_parses_to_none() {
        // SAFETY: test-local env mutation; no other thread reads this var.
        unsafe { env::set_var("QCGC_TEST_MALFORMED", "not-a-number") };
        assert_eq!(parse_env_u32("QCGC_TEST_MALFORMED"), None);
        unsafe { env::remove_var("QCGC_TEST_MALFORMED") };
    }
}
