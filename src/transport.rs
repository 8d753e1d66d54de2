//! # Replica Transport
//!
//! Items cross from the pool into a replica thread as self-contained frames:
//! an [`Envelope`] serialized to JSON bytes. The shutdown sentinel is its own
//! envelope variant, so no item value can be mistaken for it.

use crate::error::TransportError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Serialized envelope as it travels over a replica channel.
pub type Frame = Bytes;

/// Message delivered to a replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "item", rename_all = "snake_case")]
pub enum Envelope<T> {
  /// An item to dispatch.
  Item(T),
  /// Stop after everything queued before this envelope.
  Shutdown,
}

impl<T> Envelope<T> {
  /// Returns `true` for the shutdown sentinel.
  pub fn is_shutdown(&self) -> bool {
    matches!(self, Envelope::Shutdown)
  }
}

/// Serializes an envelope into a frame.
///
/// # Errors
///
/// [`TransportError::Encode`] if the item cannot be serialized.
pub fn encode<T: Serialize>(envelope: &Envelope<T>) -> Result<Frame, TransportError> {
  serde_json::to_vec(envelope)
    .map(Bytes::from)
    .map_err(TransportError::Encode)
}

/// Deserializes a frame into an envelope.
///
/// # Errors
///
/// [`TransportError::Decode`] if the frame is not a valid envelope for `T`.
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<Envelope<T>, TransportError> {
  serde_json::from_slice(frame).map_err(TransportError::Decode)
}
