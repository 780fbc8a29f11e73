use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use campus_core::EnrollmentId;

use crate::Event;

/// Envelope for a published event, carrying stream metadata.
///
/// - `aggregate_id` is the enrollment the event is about.
/// - `record_version` is the enrollment version the event was produced against
///   (0 for events that do not correspond to a persisted write).
/// - `payload` is the serialized domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    aggregate_id: EnrollmentId,
    aggregate_type: String,
    event_type: String,
    record_version: u64,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        aggregate_id: EnrollmentId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        record_version: u64,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            record_version,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn aggregate_id(&self) -> EnrollmentId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn record_version(&self) -> u64 {
        self.record_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl EventEnvelope<JsonValue> {
    /// Wrap a typed event as a JSON envelope ready for publication.
    pub fn from_typed<T>(
        aggregate_id: EnrollmentId,
        aggregate_type: &str,
        record_version: u64,
        event: &T,
    ) -> Result<Self, serde_json::Error>
    where
        T: Event + Serialize,
    {
        Ok(Self::new(
            Uuid::now_v7(),
            aggregate_id,
            aggregate_type,
            event.event_type(),
            record_version,
            event.occurred_at(),
            serde_json::to_value(event)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Serialize)]
    struct Ping {
        at: DateTime<Utc>,
    }

    impl Event for Ping {
        fn event_type(&self) -> &'static str {
            "test.ping"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn from_typed_copies_event_metadata() {
        let at = Utc::now();
        let env =
            EventEnvelope::from_typed(EnrollmentId::new(3), "enrollment", 2, &Ping { at }).unwrap();
        assert_eq!(env.event_type(), "test.ping");
        assert_eq!(env.aggregate_id(), EnrollmentId::new(3));
        assert_eq!(env.record_version(), 2);
        assert_eq!(env.occurred_at(), at);
        assert!(env.payload().get("at").is_some());
    }
}
