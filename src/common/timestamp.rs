use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// RFC 3339 in UTC with a fixed nine-digit fraction.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_timestamp(input: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(input.trim())
        .with_context(|| format!("invalid timestamp {:?}", input))?;
    Ok(parsed.with_timezone(&Utc))
}
