//! Wire protocol for the assistant socket
//!
//! Frames are JSON objects tagged by `type`:
//!
//! ```text
//! → {"type":"message","data":{"message":"…","session_id":"…"}}
//! ← {"type":"response","data":{"message":"…","products":[…],"session_id":"…"}}
//! ```
//!
//! Inbound `error` and `query` frames, and any unknown type, are decoded but
//! never delivered to reply subscribers.

use serde::{Deserialize, Serialize};

use crate::Result;

/// A product recommended by the assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub price: f64,
    pub description: String,
    pub flavor_notes: Vec<String>,
    pub category: String,
    pub roast_level: String,
    pub url: String,
    pub image_url: String,
    /// Relevance to the query, in `[0, 1]`
    pub relevance_score: f64,
    /// Why the assistant picked this product
    pub reason: String,
}

impl Product {
    /// Relevance as a whole percentage, for display
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn relevance_percent(&self) -> u8 {
        (self.relevance_score.clamp(0.0, 1.0) * 100.0).round() as u8
    }
}

/// Payload of an inbound `response` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantReply {
    /// Text to be spoken to the caller
    pub message: String,

    /// Recommended products, possibly empty
    #[serde(default)]
    pub products: Vec<Product>,

    /// Server-side conversation id; echo it on the next query
    pub session_id: String,
}

/// An outbound frame
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum OutboundFrame<'a> {
    Message(QueryPayload<'a>),
}

#[derive(Debug, Serialize)]
struct QueryPayload<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

/// Encode a user query frame
///
/// # Errors
///
/// Returns error if serialization fails
pub fn encode_query(message: &str, session_id: Option<&str>) -> Result<String> {
    let frame = OutboundFrame::Message(QueryPayload {
        message,
        session_id,
    });
    Ok(serde_json::to_string(&frame)?)
}

/// A decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Assistant reply
    Response(AssistantReply),
    /// Server-reported error, payload kept verbatim
    Error(Option<serde_json::Value>),
    /// Echoed query
    Query(Option<serde_json::Value>),
    /// Any other `type` value
    Unknown(String),
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Decode an inbound text frame
///
/// # Errors
///
/// Returns error if the text is not a tagged JSON object, or if a `response`
/// frame carries a payload that does not match [`AssistantReply`]
pub fn decode_inbound(text: &str) -> Result<InboundFrame> {
    let raw: RawFrame = serde_json::from_str(text)?;

    let frame = match raw.kind.as_str() {
        "response" => {
            let data = raw.data.unwrap_or(serde_json::Value::Null);
            InboundFrame::Response(serde_json::from_value(data)?)
        }
        "error" => InboundFrame::Error(raw.data),
        "query" => InboundFrame::Query(raw.data),
        _ => InboundFrame::Unknown(raw.kind),
    };

    Ok(frame)
}
