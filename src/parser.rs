/// Decoding of rtl_433 JSON output lines
use crate::error::ParseError;
use crate::models::TelemetryRecord;

/// Decode one line of decoder output
///
/// An empty or whitespace-only line is not an error: it means the decoder had
/// nothing to say, which the supervisor treats as a stalled stream.
///
/// # Returns
/// Ok(None) for an empty line, Ok(Some(record)) for a decoded record, or a
/// ParseError carrying the raw text for anything else
pub fn parse(line: &str) -> Result<Option<TelemetryRecord>, ParseError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    serde_json::from_str::<TelemetryRecord>(trimmed)
        .map(Some)
        .map_err(|e| ParseError::Malformed {
            raw: trimmed.to_string(),
            message: e.to_string(),
        })
}
