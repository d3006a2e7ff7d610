//! Lenient boolean parsing shared by every boolean surface.
//!
//! All four boolean CLI flags and the boolean environment variables go
//! through this one routine, so the accepted textual forms cannot drift
//! between surfaces.

use crate::error::ConfigError;

/// Parse a lenient textual boolean.
///
/// Accepted truthy forms: `true`, `1`, `yes`, `y`, `on`.
/// Accepted falsy forms: `false`, `0`, `no`, `n`, `off`.
/// Matching is case-insensitive and ignores surrounding whitespace.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidBool`] for any other value, quoting the
/// rejected input.
pub fn parse_bool_arg(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Ok(true),
        "false" | "0" | "no" | "n" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidBool {
            value: String::from(value),
        }),
    }
}
