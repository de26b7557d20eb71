//! Envelopes bundling a transaction with its attachments.
//!
//! On the wire an envelope is newline-delimited JSON: an envelope header,
//! then an item header and payload line per item.

use chrono::{SecondsFormat, Utc};
use profiling::CombinedProfile;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::TracingResult;
use crate::transaction::TransactionEvent;

/// One payload in an envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum EnvelopeItem {
    Transaction(TransactionEvent),
    Profile(CombinedProfile),
}

impl EnvelopeItem {
    /// Item type as written in the item header.
    pub fn item_type(&self) -> &'static str {
        match self {
            EnvelopeItem::Transaction(_) => "transaction",
            EnvelopeItem::Profile(_) => "profile",
        }
    }

    fn payload(&self) -> TracingResult<Vec<u8>> {
        let payload = match self {
            EnvelopeItem::Transaction(event) => serde_json::to_vec(event)?,
            EnvelopeItem::Profile(profile) => serde_json::to_vec(profile)?,
        };
        Ok(payload)
    }
}

/// A batch of items sent together.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub items: Vec<EnvelopeItem>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelope carrying a single transaction.
    pub fn from_transaction(event: TransactionEvent) -> Self {
        Self {
            event_id: Some(event.event_id.clone()),
            items: vec![EnvelopeItem::Transaction(event)],
        }
    }

    pub fn push(&mut self, item: EnvelopeItem) {
        self.items.push(item);
    }

    pub fn items(&self) -> &[EnvelopeItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Transactions in the envelope.
    pub fn transactions(&self) -> impl Iterator<Item = &TransactionEvent> {
        self.items.iter().filter_map(|item| match item {
            EnvelopeItem::Transaction(event) => Some(event),
            EnvelopeItem::Profile(_) => None,
        })
    }

    /// Mutable access to the transactions in the envelope.
    pub fn transactions_mut(&mut self) -> impl Iterator<Item = &mut TransactionEvent> {
        self.items.iter_mut().filter_map(|item| match item {
            EnvelopeItem::Transaction(event) => Some(event),
            EnvelopeItem::Profile(_) => None,
        })
    }

    /// Profiles in the envelope.
    pub fn profiles(&self) -> impl Iterator<Item = &CombinedProfile> {
        self.items.iter().filter_map(|item| match item {
            EnvelopeItem::Profile(profile) => Some(profile),
            EnvelopeItem::Transaction(_) => None,
        })
    }

    /// Serialize in the newline-delimited wire format.
    pub fn to_bytes(&self) -> TracingResult<Vec<u8>> {
        let mut out = Vec::new();
        let sent_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let header = match &self.event_id {
            Some(event_id) => json!({ "event_id": event_id, "sent_at": sent_at }),
            None => json!({ "sent_at": sent_at }),
        };
        serde_json::to_writer(&mut out, &header)?;
        out.push(b'\n');

        for item in &self.items {
            let payload = item.payload()?;
            let item_header = json!({ "type": item.item_type(), "length": payload.len() });
            serde_json::to_writer(&mut out, &item_header)?;
            out.push(b'\n');
            out.extend_from_slice(&payload);
            out.push(b'\n');
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::Transaction;
    use profiling::{Profile, ProfileEvent};
    use serde_json::Value;

    fn event() -> TransactionEvent {
        let mut transaction = Transaction::new("Home", "navigation").with_sampled(true);
        transaction.finish(transaction.start_timestamp() + 1.0);
        transaction.to_event()
    }

    #[test]
    fn test_envelope_accessors() {
        let event = event();
        let event_id = event.event_id.clone();
        let mut envelope = Envelope::from_transaction(event);
        envelope.push(EnvelopeItem::Profile(CombinedProfile::Js(ProfileEvent::new("p1", Profile::default()))));

        assert_eq!(envelope.event_id.as_deref(), Some(event_id.as_str()));
        assert_eq!(envelope.len(), 2);
        assert_eq!(envelope.transactions().count(), 1);
        assert_eq!(envelope.profiles().count(), 1);
        assert!(!Envelope::new().items().iter().any(|_| true));
    }

    #[test]
    fn test_wire_format() {
        let envelope = Envelope::from_transaction(event());
        let bytes = envelope.to_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);

        let header: Value = serde_json::from_str(lines[0]).unwrap();
        assert!(header["sent_at"].is_string());
        assert_eq!(header["event_id"], envelope.event_id.clone().unwrap());

        let item_header: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(item_header["type"], "transaction");
        assert_eq!(item_header["length"], lines[2].len());

        let payload: Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(payload["transaction"], "Home");
    }
}
