//! # Scan Parsing
//!
//! Turns raw label text from a reader into a validated [`StageUpdate`].
//!
//! Labels encode the stage as a single digit followed by `@`:
//!
//! | Prefix | Stage |
//! |--------|-------|
//! | `0@` | scheduled |
//! | `1@` | cut |
//! | `2@` | cleaned |
//! | `3@` | stored |
//! | `4@` | partially_shipped |
//! | `5@` | shipped |
//!
//! Text without a recognised prefix carries no stage and is rejected.

use crate::primitives::{MAX_BATCH_LENGTH, MAX_DEVICE_LENGTH, SCAN_PREFIX_SEPARATOR};
use crate::types::has_stage_prefix;
use crate::{Barcode, Stage, StageUpdate, Timestamp, TrackError};

/// Split a raw scan into its stage and barcode text.
///
/// Returns `None` when the text does not start with a stage prefix.
#[must_use]
pub fn split_prefix(raw: &str) -> Option<(Stage, &str)> {
    let trimmed = raw.trim();
    if !has_stage_prefix(trimmed) {
        return None;
    }
    let digit = trimmed.chars().next()?;
    let stage = Stage::from_scan_prefix(digit)?;
    // digit and separator are both single-byte
    Some((stage, &trimmed[2..]))
}

/// Parse raw scanner output into a stage update observed at `at`.
pub fn parse_scan(
    raw: &str,
    at: Timestamp,
    device: Option<&str>,
) -> Result<StageUpdate, TrackError> {
    let (stage, rest) = split_prefix(raw).ok_or_else(|| {
        TrackError::InvalidScan(format!(
            "'{}' has no stage prefix (expected 0{sep} .. 5{sep})",
            raw.trim(),
            sep = SCAN_PREFIX_SEPARATOR
        ))
    })?;

    let barcode = validate_barcode(rest)?;
    let mut update = StageUpdate::new(barcode, stage, at);
    if let Some(device) = device {
        update.device = Some(validate_device(device)?);
    }
    Ok(update)
}

/// Validate a bare barcode.
pub fn validate_barcode(raw: &str) -> Result<Barcode, TrackError> {
    Barcode::new(raw)
}

/// Validate a reader identifier.
pub fn validate_device(raw: &str) -> Result<String, TrackError> {
    let device = raw.trim();
    if device.is_empty() || device.len() > MAX_DEVICE_LENGTH {
        return Err(TrackError::InvalidScan(format!(
            "device id must be 1..={} bytes",
            MAX_DEVICE_LENGTH
        )));
    }
    Ok(device.to_string())
}

/// Render an update back into label form (`3@Rich-07212025-05`).
#[must_use]
pub fn format_scan(update: &StageUpdate) -> String {
    format!(
        "{}{}{}",
        update.stage.scan_prefix(),
        SCAN_PREFIX_SEPARATOR,
        update.barcode
    )
}

/// Reject batches above `MAX_BATCH_LENGTH`.
pub fn validate_batch_len(len: usize) -> Result<(), TrackError> {
    if len > MAX_BATCH_LENGTH {
        return Err(TrackError::InvalidScan(format!(
            "batch of {} updates exceeds maximum {}",
            len, MAX_BATCH_LENGTH
        )));
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const AT: Timestamp = Timestamp(1_000);

    #[test]
    fn parses_every_prefix() {
        for stage in Stage::ALL {
            let raw = format!("{}@Rich-07212025-03", stage.scan_prefix());
            let update = parse_scan(&raw, AT, None).expect("parse");
            assert_eq!(update.stage, stage);
            assert_eq!(update.barcode.as_str(), "Rich-07212025-03");
            assert_eq!(update.at, AT);
        }
    }

    #[test]
    fn rejects_unprefixed_scan() {
        assert!(matches!(
            parse_scan("Rich-07212025-10", AT, None),
            Err(TrackError::InvalidScan(_))
        ));
        assert!(parse_scan("123456789012", AT, None).is_err());
        assert!(parse_scan("6@Rich", AT, None).is_err());
    }

    #[test]
    fn rejects_prefix_without_barcode() {
        assert!(matches!(
            parse_scan("2@", AT, None),
            Err(TrackError::InvalidBarcode(_))
        ));
        assert!(parse_scan("2@   ", AT, None).is_err());
    }

    #[test]
    fn rejects_double_prefix() {
        assert!(matches!(
            parse_scan("1@2@Rich", AT, None),
            Err(TrackError::InvalidBarcode(_))
        ));
    }

    #[test]
    fn trims_reader_noise() {
        let update = parse_scan("  3@Rich-052125-16-17\r\n", AT, Some(" COM3 ")).expect("parse");
        assert_eq!(update.stage, Stage::Stored);
        assert_eq!(update.barcode.as_str(), "Rich-052125-16-17");
        assert_eq!(update.device.as_deref(), Some("COM3"));
    }

    #[test]
    fn format_is_inverse_of_parse() {
        let update = parse_scan("4@Rich-052125-16-19", AT, None).expect("parse");
        assert_eq!(format_scan(&update), "4@Rich-052125-16-19");
    }

    #[test]
    fn batch_limit() {
        assert!(validate_batch_len(MAX_BATCH_LENGTH).is_ok());
        assert!(validate_batch_len(MAX_BATCH_LENGTH + 1).is_err());
    }
}
