//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Memory cap and pubsub output buffer limit policy."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Memory and pub/sub output-buffer policy applied to a freshly launched
//! server.

use foam_common::StoreConfig;

use crate::{Result, SupervisorError};

/// Fraction used when the configured one is outside `[0.01, 0.5]`.
pub const FALLBACK_MEMORY_FRACTION: f64 = 0.3;

const MIN_MEMORY_FRACTION: f64 = 0.01;
const MAX_MEMORY_FRACTION: f64 = 0.5;

/// Client classes in `client-output-buffer-limit`, four tokens each.
const BUFFER_LIMIT_TOKENS: usize = 12;
const PUBSUB_CLASS_OFFSET: usize = 8;

/// Clamp a configured memory fraction.
pub fn effective_memory_fraction(fraction: f64) -> f64 {
    if fraction.is_nan() || !(MIN_MEMORY_FRACTION..=MAX_MEMORY_FRACTION).contains(&fraction) {
        FALLBACK_MEMORY_FRACTION
    } else {
        fraction
    }
}

/// `maxmemory` in bytes for `fraction` of `total_memory`.
pub fn max_memory_bytes(fraction: f64, total_memory: u64) -> u64 {
    (effective_memory_fraction(fraction) * total_memory as f64) as u64
}

/// Pub/sub client output-buffer limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLimits {
    /// Disconnect immediately above this many bytes.
    pub hard: u64,
    /// Disconnect when above this many bytes for `soft_seconds`.
    pub soft: u64,
    /// Grace period for the soft limit.
    pub soft_seconds: u64,
}

impl BufferLimits {
    /// Limits from the `[store]` configuration block.
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            hard: config.pubsub_hard_limit,
            soft: config.pubsub_soft_limit,
            soft_seconds: config.pubsub_soft_seconds,
        }
    }
}

/// Replace the pub/sub class of a `client-output-buffer-limit` value,
/// keeping the normal and replica classes as reported by the server.
pub fn rewrite_output_buffer_limit(current: &str, limits: BufferLimits) -> Result<String> {
    let mut tokens: Vec<String> = current.split_whitespace().map(str::to_owned).collect();
    if tokens.len() != BUFFER_LIMIT_TOKENS {
        return Err(SupervisorError::Configuration(format!(
            "unexpected client-output-buffer-limit '{current}': expected {BUFFER_LIMIT_TOKENS} tokens, found {}",
            tokens.len()
        )));
    }
    tokens.truncate(PUBSUB_CLASS_OFFSET);
    tokens.extend([
        "pubsub".to_owned(),
        limits.hard.to_string(),
        limits.soft.to_string(),
        limits.soft_seconds.to_string(),
    ]);
    Ok(tokens.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_fractions_fall_back() {
        assert_eq!(effective_memory_fraction(0.6), FALLBACK_MEMORY_FRACTION);
        assert_eq!(effective_memory_fraction(0.0), FALLBACK_MEMORY_FRACTION);
        assert_eq!(effective_memory_fraction(f64::NAN), FALLBACK_MEMORY_FRACTION);
        assert_eq!(effective_memory_fraction(0.2), 0.2);
        assert_eq!(effective_memory_fraction(0.5), 0.5);
        assert_eq!(effective_memory_fraction(0.01), 0.01);
    }

    #[test]
    fn max_memory_is_a_share_of_total() {
        let gib = 1024 * 1024 * 1024;
        assert_eq!(max_memory_bytes(0.25, 16 * gib), 4 * gib);
        assert_eq!(
            max_memory_bytes(0.9, 10 * gib),
            max_memory_bytes(FALLBACK_MEMORY_FRACTION, 10 * gib)
        );
    }

    #[test]
    fn pubsub_class_is_replaced() {
        let current = "normal 0 0 0 slave 268435456 67108864 60 pubsub 33554432 8388608 60";
        let limits = BufferLimits::from_config(&StoreConfig::default());
        let rewritten = rewrite_output_buffer_limit(current, limits).unwrap();
        assert_eq!(
            rewritten,
            "normal 0 0 0 slave 268435456 67108864 60 pubsub 536870912 134217728 60"
        );
    }

    #[test]
    fn unexpected_token_count_is_a_configuration_error() {
        let limits = BufferLimits::from_config(&StoreConfig::default());
        let err = rewrite_output_buffer_limit("normal 0 0 0", limits).unwrap_err();
        assert!(matches!(err, SupervisorError::Configuration(_)));
    }
}
