use time::{format_description::FormatItem, macros::format_description, OffsetDateTime};

/// RFC3339 a larghezza fissa (microsecondi sempre presenti): l'ordine testuale coincide con
/// l'ordine temporale, quindi le colonne TEXT si possono ordinare direttamente in SQL.
const TIMESTAMP_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z");

/// Restituisce l'istante corrente in UTC (es. "2025-11-02T12:34:56.123456Z").
pub fn now_timestamp() -> String {
    format_timestamp(OffsetDateTime::now_utc())
}

pub fn format_timestamp(at: OffsetDateTime) -> String {
    at.to_offset(time::UtcOffset::UTC)
        .format(TIMESTAMP_FORMAT)
        .expect("error formatting timestamp")
}
