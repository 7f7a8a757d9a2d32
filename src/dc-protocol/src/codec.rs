// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Line framing for the JSON protocol.

use serde::Serialize;

use crate::types::{ClientCommand, ClientEnvelope};

/// Parse one request line.
///
/// Accepts a full envelope, or a bare command which is wrapped with no
/// token and no device.
pub fn parse_envelope(input: &str) -> Result<ClientEnvelope, serde_json::Error> {
    match serde_json::from_str::<ClientEnvelope>(input) {
        Ok(envelope) => Ok(envelope),
        Err(_) => {
            let cmd = serde_json::from_str::<ClientCommand>(input)?;
            Ok(ClientEnvelope {
                token: None,
                device: None,
                cmd,
            })
        }
    }
}

/// Serialize a value as one newline-terminated line.
pub fn encode_line<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(value)?;
    line.push('\n');
    Ok(line)
}
