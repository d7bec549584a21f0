//! Client for the external vision-language reasoning service.
//!
//! The service speaks a chat-completions shaped API. Each request pins the
//! reply to a strict JSON object; the response is parsed strictly, with
//! one stricter re-prompt on a malformed reply and exponential backoff on
//! transport errors.

mod client;

pub use client::{ShotReasoningRequest, VlClient, VlConfig, VlError, VlResult};
