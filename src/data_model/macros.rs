//! Markers embedded in generated column names
//!
//! Staging and the preprocessors synthesise columns whose names carry marker
//! tokens. The SQL transpiler and the error paths rewrite these tokens into
//! the staging-table names users actually see; internal code matches on them
//! to tell generated columns from user-supplied ones.

/// Marker for the synthetic join key added when a join has no declared key.
pub const SYNTHETIC_JOIN_KEY: &str = "$synthetic_join_key$";

/// Marker for the synthetic time stamp added during staging.
pub const GENERATED_TS: &str = "$generated_ts$";

/// Marker for the row-id column added by the text field splitter.
pub const ROWID: &str = "$rowid$";

/// Marker for the word column of an exploded text field.
pub const TEXT_FIELD: &str = "$text_field$";

pub const HOUR_BEGIN: &str = "$hour(";
pub const MINUTE_BEGIN: &str = "$minute(";
pub const MONTH_BEGIN: &str = "$month(";
pub const WEEKDAY_BEGIN: &str = "$weekday(";
pub const YEAR_BEGIN: &str = "$year(";
pub const EMAIL_DOMAIN_BEGIN: &str = "$email_domain(";
pub const SUBSTRING_BEGIN: &str = "$substring(";
pub const MAPPING_BEGIN: &str = "$mapping(";
pub const IMPUTATION_DUMMY_BEGIN: &str = "$imputation_dummy(";
pub const SEASONAL_END: &str = ")$";

/// Prefix marking a column that was flattened into the population table
/// during staging. The full name is `$joined$<table>.<column>`.
pub const JOINED: &str = "$joined$";

/// Whether the name contains any generated-column marker.
pub fn is_generated(name: &str) -> bool {
    name.contains('$')
}

/// Rewrites every marker token in `name` into its human-readable staging
/// form, e.g. `$hour(ts)$` becomes `hour( ts )`.
pub fn make_readable(name: &str) -> String {
    let seasonal = [
        (HOUR_BEGIN, "hour( "),
        (MINUTE_BEGIN, "minute( "),
        (MONTH_BEGIN, "month( "),
        (WEEKDAY_BEGIN, "weekday( "),
        (YEAR_BEGIN, "year( "),
        (EMAIL_DOMAIN_BEGIN, "email domain( "),
        (SUBSTRING_BEGIN, "substring( "),
        (MAPPING_BEGIN, "mapping( "),
        (IMPUTATION_DUMMY_BEGIN, "imputation dummy( "),
    ];

    let mut result = name.to_string();

    for (marker, readable) in seasonal {
        if let Some(stripped) = result.strip_prefix(marker) {
            result = format!("{}{}", readable, stripped.replace(SEASONAL_END, " )"));
        }
    }

    result = result
        .replace(SYNTHETIC_JOIN_KEY, "join key")
        .replace(GENERATED_TS, "time stamp")
        .replace(ROWID, "rowid")
        .replace(TEXT_FIELD, "text field");

    if let Some(stripped) = result.strip_prefix(JOINED) {
        result = stripped.to_string();
    }

    result
}
