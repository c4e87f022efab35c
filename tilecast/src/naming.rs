//! Output filenames for prediction tiles.
//!
//! Each finished tile is stored as `pred_{row}-{col}.tif` with an optional
//! comparison image `pred_{row}-{col}_results.png`. While a mask is being
//! written it lives at `.pred_{row}-{col}.tif.partial` and is renamed into
//! place only once complete, so the done-scan never sees a half-written file.
//!
//! Examples:
//! - `pred_0-0.tif`
//! - `pred_300-10500.tif`

use regex::Regex;
use std::sync::OnceLock;

use crate::grid::TileOrigin;

/// Name of the append-only log of invalid tile origins.
pub const INVALID_LOG_NAME: &str = "invalid_indices.txt";

/// Filename of a finished mask tile.
pub fn mask_filename(origin: TileOrigin) -> String {
    format!("pred_{}-{}.tif", origin.row, origin.col)
}

/// Filename used while a mask tile is being written.
pub fn partial_mask_filename(origin: TileOrigin) -> String {
    format!(".pred_{}-{}.tif.partial", origin.row, origin.col)
}

/// Filename of the side-by-side comparison image.
pub fn comparison_filename(origin: TileOrigin) -> String {
    format!("pred_{}-{}_results.png", origin.row, origin.col)
}

/// Get the mask filename pattern.
///
/// Pattern: `pred_<row>-<col>.tif`, anchored at both ends so comparison
/// images and partial files never match.
fn mask_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // (\d+) row, (\d+) col
        Regex::new(r"^pred_(\d+)-(\d+)\.tif$").expect("mask filename pattern is valid")
    })
}

/// Parse a finished mask filename back into its tile origin.
///
/// Returns `None` for anything that is not exactly `pred_<row>-<col>.tif`,
/// including coordinates too large for `usize`.
///
/// ```
/// use tilecast::grid::TileOrigin;
/// use tilecast::naming::parse_mask_filename;
///
/// assert_eq!(parse_mask_filename("pred_300-500.tif"), Some(TileOrigin::new(300, 500)));
/// assert_eq!(parse_mask_filename("pred_300-500_results.png"), None);
/// ```
pub fn parse_mask_filename(filename: &str) -> Option<TileOrigin> {
    let captures = mask_pattern().captures(filename)?;
    let row = captures.get(1)?.as_str().parse::<usize>().ok()?;
    let col = captures.get(2)?.as_str().parse::<usize>().ok()?;
    Some(TileOrigin::new(row, col))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_for_origin() {
        let origin = TileOrigin::new(300, 10500);
        assert_eq!(mask_filename(origin), "pred_300-10500.tif");
        assert_eq!(partial_mask_filename(origin), ".pred_300-10500.tif.partial");
        assert_eq!(comparison_filename(origin), "pred_300-10500_results.png");
    }

    #[test]
    fn test_parse_round_trips_mask_name() {
        let origin = TileOrigin::new(8500, 0);
        assert_eq!(parse_mask_filename(&mask_filename(origin)), Some(origin));
    }

    #[test]
    fn test_parse_ignores_partial_and_comparison_files() {
        let origin = TileOrigin::new(1, 2);
        assert_eq!(parse_mask_filename(&partial_mask_filename(origin)), None);
        assert_eq!(parse_mask_filename(&comparison_filename(origin)), None);
    }

    #[test]
    fn test_parse_rejects_other_names() {
        assert_eq!(parse_mask_filename("mosaic.tif"), None);
        assert_eq!(parse_mask_filename("pred_1-2.TIF"), None);
        assert_eq!(parse_mask_filename("pred_-1-2.tif"), None);
        assert_eq!(parse_mask_filename("xpred_1-2.tif"), None);
        assert_eq!(parse_mask_filename("pred_1-2.tif.bak"), None);
    }

    #[test]
    fn test_parse_rejects_overflowing_coordinates() {
        assert_eq!(
            parse_mask_filename("pred_99999999999999999999999-1.tif"),
            None
        );
    }
}
