//! Shared primitive types used across the entire build.

/// A regulator-assigned institution identifier (RSSD ID), kept as text.
pub type Rssd = String;

/// The canonical run identifier.
pub type RunId = String;

/// Placeholder identifier for registry rows that carry no usable RSSD ID.
pub const UNKNOWN_RSSD: &str = "unknown";

/// Collapse internal whitespace, trim, and uppercase an institution name.
/// Every name-keyed join in the build goes through this.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Normalize a raw identifier cell. Returns `None` for blanks, zero, and
/// values that are not integral (`"1234.0"` is accepted as `"1234"`).
pub fn normalize_rssd(raw: &str) -> Option<Rssd> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNKNOWN_RSSD) {
        return None;
    }
    let digits = trimmed.strip_suffix(".0").unwrap_or(trimmed);
    let id: u64 = digits.parse().ok()?;
    if id == 0 {
        return None;
    }
    Some(id.to_string())
}
