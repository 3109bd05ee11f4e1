//! Base64 helpers shared by every text-facing operation.

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::error::{Result, VaultError};

/// Encodes without line wrapping.
pub fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decodes standard Base64, ignoring ASCII whitespace.
///
/// Line-wrapped output from MIME-style encoders decodes the same as the
/// unwrapped form.
pub fn decode(text: &str) -> Result<Vec<u8>> {
    let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| VaultError::format(format!("invalid base64: {e}")))
}
