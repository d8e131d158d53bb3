//! Gemini-native dialect: near-identity passthrough.
//!
//! Inbound Gemini requests already are the canonical shape; this module
//! exists so the router has one uniform call per dialect rather than a
//! special case.

use relaykit_schema::gemini::GeminiGenerateContentRequest;

use crate::error::ProxyError;

pub fn to_canonical(request: GeminiGenerateContentRequest) -> Result<GeminiGenerateContentRequest, ProxyError> {
    Ok(request)
}
