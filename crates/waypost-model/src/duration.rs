//! Protobuf-JSON duration strings (`"5s"`, `"0.25s"`), the form used both by
//! gRPC service config documents and by registry check definitions.
use std::time::Duration;

use crate::error::PolicyError;

/// Render a duration as `<seconds>[.<fraction>]s` with trailing zeros trimmed.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let nanos = d.subsec_nanos();
    if nanos == 0 {
        return format!("{secs}s");
    }
    let frac = format!("{nanos:09}");
    format!("{secs}.{}s", frac.trim_end_matches('0'))
}

/// Parse a `<seconds>[.<fraction>]s` string.
pub fn parse_duration(s: &str) -> Result<Duration, PolicyError> {
    let invalid = || PolicyError::InvalidDuration(s.to_string());

    let body = s.trim().strip_suffix('s').ok_or_else(invalid)?;
    let (whole, frac) = match body.split_once('.') {
        Some((w, f)) => (w, f),
        None => (body, ""),
    };
    if whole.is_empty() || frac.len() > 9 {
        return Err(invalid());
    }

    let secs: u64 = whole.parse().map_err(|_| invalid())?;
    let nanos: u32 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{frac:0<9}");
        padded.parse().map_err(|_| invalid())?
    };
    Ok(Duration::new(secs, nanos))
}
