//! Broker message construction.
//!
//! [`BrokerMessageBuilder`] turns a [`SendEnvelope`] plus an encoded body
//! into a [`BrokerMessage`]. Building is pure: the envelope is never
//! modified, and the same envelope always yields the same message, which is
//! what lets the transport rebuild a fresh message for each delivery attempt.
//!
//! # Rules, applied in order
//!
//! 1. Body and content type are copied verbatim.
//! 2. Headers become application properties. String values are copied as-is;
//!    other values go through the header converter (identity by default).
//! 3. Time-to-live is copied if present.
//! 4. Message id and correlation id are written as lowercase hex without
//!    dashes.
//! 5. Affinity: when the envelope has no explicit session id (or partition
//!    key) and a live received message is attached, the received
//!    reply-to-session id, else its session id (and its partition key) are
//!    inherited.
//! 6. Session id: explicit, else inherited, else the conversation id; only
//!    set when non-blank.
//! 7. Reply-to session id: explicit, else the resolved session id.
//! 8. Partition key: explicit or inherited only. Unlike the session id there
//!    is no implicit default.

use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    // ---
    BrokerMessage,
    Result,
    SendContext,
    SendEnvelope,
};

/// Conversion applied to non-string header values.
pub type HeaderConverter =
    Arc<dyn Fn(&str, &serde_json::Value) -> serde_json::Value + Send + Sync>;

/// Builds wire messages from send envelopes.
#[derive(Clone, Default)]
pub struct BrokerMessageBuilder {
    convert_header: Option<HeaderConverter>,
}

impl BrokerMessageBuilder {
    /// Builder with the identity header conversion.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the conversion applied to non-string header values.
    ///
    /// The converter receives the header key and value and returns the value
    /// to put on the wire. String values never reach the converter.
    pub fn with_header_converter<F>(mut self, convert: F) -> Self
    where
        F: Fn(&str, &serde_json::Value) -> serde_json::Value + Send + Sync + 'static,
    {
        self.convert_header = Some(Arc::new(convert));
        self
    }

    /// Encode a payload as the message body (JSON).
    pub fn encode_body<T: Serialize>(&self, payload: &T) -> Result<Bytes> {
        // ---
        let bytes = serde_json::to_vec(payload)?;
        Ok(Bytes::from(bytes))
    }

    /// Encode the payload of `context` and build its message.
    pub fn build_context<T: Serialize>(&self, context: &SendContext<T>) -> Result<BrokerMessage> {
        // ---
        let body = self.encode_body(context.payload())?;
        Ok(self.build(context.envelope(), body))
    }

    /// Build a wire message for `envelope` carrying `body`.
    pub fn build(&self, envelope: &SendEnvelope, body: Bytes) -> BrokerMessage {
        // ---
        let application_properties = envelope
            .headers
            .iter()
            .map(|(key, value)| {
                let value = match (value, &self.convert_header) {
                    (serde_json::Value::String(_), _) | (_, None) => value.clone(),
                    (_, Some(convert)) => convert(key.as_str(), value),
                };
                (key.clone(), value)
            })
            .collect();

        let inbound = envelope.consume_context();

        let inherited_session = match (&envelope.session_id, &inbound) {
            (None, Some(inbound)) => non_blank(inbound.reply_to_session_id())
                .or_else(|| non_blank(inbound.session_id()))
                .map(str::to_owned),
            _ => None,
        };

        let inherited_partition = match (&envelope.partition_key, &inbound) {
            (None, Some(inbound)) => non_blank(inbound.partition_key()).map(str::to_owned),
            _ => None,
        };

        let session_id = envelope
            .session_id
            .clone()
            .or(inherited_session)
            .or_else(|| envelope.conversation_id.as_ref().map(canonical_id))
            .filter(|id| !id.trim().is_empty());

        let reply_to_session_id = envelope
            .reply_to_session_id
            .clone()
            .or_else(|| session_id.clone());

        let partition_key = envelope.partition_key.clone().or(inherited_partition);

        BrokerMessage {
            body,
            content_type: envelope.content_type.clone(),
            application_properties,
            time_to_live: envelope.time_to_live,
            message_id: envelope.message_id.as_ref().map(canonical_id),
            correlation_id: envelope.correlation_id.as_ref().map(canonical_id),
            session_id,
            reply_to_session_id,
            partition_key,
            to: Some(envelope.destination().to_owned()),
        }
    }
}

/// Wire form of an identifier: lowercase hex, no dashes.
pub fn canonical_id(id: &Uuid) -> String {
    id.simple().to_string()
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
