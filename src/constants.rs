//! Engine limits and tuning constants
//!
//! This module contains the fixed limits and default sizes used throughout
//! the sigmap engine.

/// Maximum vector length for a signal or map slot
///
/// Admin messages declaring a longer vector are rejected field-by-field.
pub const MAX_VECTOR_LEN: usize = 128;

/// Default history size for a freshly allocated slot buffer (one sample)
pub const DEFAULT_HISTORY_SIZE: usize = 1;

/// Maximum history size a compiled expression may request per slot
pub const MAX_HISTORY_SIZE: usize = 256;

/// Default number of instances allocated when a map becomes ready
pub const DEFAULT_INSTANCE_COUNT: usize = 1;

/// Maximum accepted length of an expression string in admin messages
pub const MAX_EXPRESSION_LEN: usize = 256;

/// Maximum number of source slots in a single map
pub const MAX_NUM_SOURCES: usize = 8;

/// Maximum encoded size of an outbound wire frame
pub const MAX_FRAME_BYTES: usize = 1500;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970)
pub const NTP_UNIX_EPOCH_OFFSET: u64 = 2_208_988_800;

/// Fractional timetag units per second (2^32, NTP fixed-point)
pub const TIMETAG_FRACTION_PER_SEC: f64 = 4_294_967_296.0;

/// Validate that all constants are properly configured
pub fn validate_constants() -> Result<(), &'static str> {
    if MAX_VECTOR_LEN == 0 {
        return Err("MAX_VECTOR_LEN must be greater than 0");
    }
    if DEFAULT_HISTORY_SIZE == 0 || DEFAULT_HISTORY_SIZE > MAX_HISTORY_SIZE {
        return Err("DEFAULT_HISTORY_SIZE must be in [1, MAX_HISTORY_SIZE]");
    }
    if DEFAULT_INSTANCE_COUNT == 0 {
        return Err("DEFAULT_INSTANCE_COUNT must be greater than 0");
    }
    if MAX_NUM_SOURCES == 0 {
        return Err("MAX_NUM_SOURCES must be greater than 0");
    }
    if MAX_EXPRESSION_LEN == 0 {
        return Err("MAX_EXPRESSION_LEN must be greater than 0");
    }
    if MAX_FRAME_BYTES < 64 {
        return Err("MAX_FRAME_BYTES too small for a frame header");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants_validation() {
        assert!(validate_constants().is_ok());
    }

    #[test]
    fn test_history_limits_are_ordered() {
        assert!(DEFAULT_HISTORY_SIZE <= MAX_HISTORY_SIZE);
    }
}
