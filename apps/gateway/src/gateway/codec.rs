//! Inbound message decoding.
//!
//! Text frames carry JSON control messages; media inside them is base64,
//! optionally wrapped in a `data:<mime>;base64,` URL as browsers produce it.
//! Binary frames are `[tag][payload]` with tag `0x01` for video and `0x02`
//! for audio.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;

use crate::errors::GatewayError;
use crate::models::frame::Modality;
use crate::models::messages::ClientMessage;

pub const TAG_VIDEO: u8 = 0x01;
pub const TAG_AUDIO: u8 = 0x02;

/// A decoded inbound message, ready for dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Auth {
        session_id: String,
        user_id: Option<String>,
    },
    Media {
        modality: Modality,
        payload: Bytes,
        client_timestamp: Option<f64>,
    },
    Ping {
        timestamp: Option<f64>,
    },
    GetStatus,
}

pub fn parse_text(text: &str) -> Result<Command, GatewayError> {
    let msg: ClientMessage =
        serde_json::from_str(text).map_err(|e| GatewayError::InvalidMessage(e.to_string()))?;

    Ok(match msg {
        ClientMessage::Auth {
            session_id,
            user_id,
        } => {
            if session_id.trim().is_empty() {
                return Err(GatewayError::InvalidMessage(
                    "auth requires a non-empty session_id".to_string(),
                ));
            }
            Command::Auth {
                session_id,
                user_id,
            }
        }
        ClientMessage::VideoFrame { data, timestamp } => Command::Media {
            modality: Modality::Video,
            payload: decode_base64(&data)?,
            client_timestamp: timestamp,
        },
        ClientMessage::AudioChunk { data, timestamp } => Command::Media {
            modality: Modality::Audio,
            payload: decode_base64(&data)?,
            client_timestamp: timestamp,
        },
        ClientMessage::Ping { timestamp } => Command::Ping { timestamp },
        ClientMessage::GetStatus => Command::GetStatus,
    })
}

pub fn parse_binary(data: &[u8]) -> Result<Command, GatewayError> {
    let (&tag, payload) = data
        .split_first()
        .ok_or_else(|| GatewayError::InvalidMessage("empty binary frame".to_string()))?;

    let modality = match tag {
        TAG_VIDEO => Modality::Video,
        TAG_AUDIO => Modality::Audio,
        other => {
            return Err(GatewayError::InvalidMessage(format!(
                "unknown binary frame tag 0x{other:02x}"
            )))
        }
    };

    if payload.is_empty() {
        return Err(GatewayError::Decode(format!("empty {modality} payload")));
    }

    Ok(Command::Media {
        modality,
        payload: Bytes::copy_from_slice(payload),
        client_timestamp: None,
    })
}

fn decode_base64(data: &str) -> Result<Bytes, GatewayError> {
    let encoded = match data.split_once(',') {
        Some((header, body)) if header.starts_with("data:") => body,
        _ => data,
    };
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| GatewayError::Decode(e.to_string()))?;
    if decoded.is_empty() {
        return Err(GatewayError::Decode("empty media payload".to_string()));
    }
    Ok(Bytes::from(decoded))
}
