// src/domain/message.rs

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;

/// A broker-ready wire message.
///
/// The output of the [`BrokerMessageBuilder`](crate::BrokerMessageBuilder).
/// Identifiers are already in their wire string form and routing properties
/// are fully resolved; a [`ClientContext`](crate::ClientContext) hands the
/// message to the broker without interpreting it further.
///
/// A `BrokerMessage` is built fresh for every delivery attempt and is never
/// reused across a retry or a schedule fallback.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BrokerMessage {
    // ---
    /// Opaque payload bytes.
    pub body: Bytes,

    /// Payload format (e.g. "application/json").
    pub content_type: Option<String>,

    /// Application properties (headers).
    pub application_properties: HashMap<String, serde_json::Value>,

    /// Broker-side expiry.
    pub time_to_live: Option<Duration>,

    /// Message id, lowercase hex without dashes.
    pub message_id: Option<String>,

    /// Correlation id, lowercase hex without dashes.
    pub correlation_id: Option<String>,

    /// Resolved session id (never blank).
    pub session_id: Option<String>,

    /// Resolved reply-to session id.
    pub reply_to_session_id: Option<String>,

    /// Partition key, explicit or inherited.
    pub partition_key: Option<String>,

    /// Entity path the message is addressed to.
    pub to: Option<String>,
}
