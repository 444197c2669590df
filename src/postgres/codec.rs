//! Wire format of the change envelope carried on the notification channel.
//!
//! ```json
//! {"table":"s_config","operation":"UPDATE","data":{"id":1},"timestamp":"2024-01-01T12:00:00Z"}
//! ```
//!
//! All four fields are required. Unknown fields are ignored so the trigger
//! can grow new metadata without breaking older listeners.

use tracing::trace;

use super::types::ChangeEvent;
use crate::{Error, Result};

/// Decodes a raw notification payload into a [`ChangeEvent`].
///
/// Either the whole envelope decodes or an [`Error::MalformedEnvelope`]
/// is returned; there is no partial result.
pub fn decode(raw: &str) -> Result<ChangeEvent> {
    let event: ChangeEvent =
        serde_json::from_str(raw).map_err(|e| Error::malformed(e.to_string()))?;

    if event.table.is_empty() {
        return Err(Error::malformed("field `table` is empty"));
    }

    trace!(table = %event.table, operation = %event.operation, "Decoded change envelope");
    Ok(event)
}

/// Decodes an envelope from raw bytes. Invalid UTF-8 is a malformed envelope.
pub fn decode_bytes(raw: &[u8]) -> Result<ChangeEvent> {
    let text = std::str::from_utf8(raw).map_err(|e| Error::malformed(e.to_string()))?;
    decode(text)
}

/// Encodes an event in the same shape the trigger publishes.
pub fn encode(event: &ChangeEvent) -> Result<String> {
    serde_json::to_string(event).map_err(Into::into)
}
