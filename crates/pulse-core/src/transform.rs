//! # Record Classification
//!
//! Turns a raw search result into a meeting record and then into a
//! [`SyncEvent`]. Participant lookup is I/O and lives in pulse-sync; this
//! module only needs the resolved ids.
//!
//! ```text
//!   created_at > checkpoint  ──► Created, occurred_at = created_at
//!   otherwise                ──► Updated, occurred_at = updated_at
//!   no checkpoint            ──► Created
//! ```

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::remote::RawRecord;
use crate::types::{EventName, SyncEvent};

/// Property name on the CRM side, field name in the event payload.
const FIELD_MAPPING: [(&str, &str); 3] = [
    ("hs_meeting_title", "meeting_title"),
    ("hs_meeting_start_time", "meeting_start"),
    ("hs_meeting_end_time", "meeting_end"),
];

/// Decides whether a record is new since the checkpoint.
pub fn classify(created_at: DateTime<Utc>, checkpoint: Option<DateTime<Utc>>) -> EventName {
    match checkpoint {
        Some(checkpoint) if created_at <= checkpoint => EventName::Updated,
        _ => EventName::Created,
    }
}

/// Drops null values and empty strings.
pub fn compact_fields(fields: Map<String, Value>) -> Map<String, Value> {
    fields
        .into_iter()
        .filter(|(_, value)| match value {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        })
        .collect()
}

/// A search result with every field the engine relies on.
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub fields: Map<String, Value>,
}

impl TryFrom<&RawRecord> for MeetingRecord {
    type Error = CoreError;

    fn try_from(raw: &RawRecord) -> CoreResult<Self> {
        let properties = raw
            .properties
            .as_ref()
            .ok_or_else(|| CoreError::malformed(&raw.id, "missing properties"))?;
        let created_at = raw
            .created_at
            .ok_or_else(|| CoreError::malformed(&raw.id, "missing createdAt"))?;
        let updated_at = raw
            .updated_at
            .ok_or_else(|| CoreError::malformed(&raw.id, "missing updatedAt"))?;

        let mut fields = Map::new();
        fields.insert("meeting_id".to_string(), Value::String(raw.id.clone()));
        for (property, field) in FIELD_MAPPING {
            let value = properties.get(property).cloned().unwrap_or(Value::Null);
            fields.insert(field.to_string(), value);
        }

        Ok(MeetingRecord {
            id: raw.id.clone(),
            created_at,
            updated_at,
            fields: compact_fields(fields),
        })
    }
}

impl MeetingRecord {
    /// Builds the queue event for this record.
    pub fn into_event(
        self,
        checkpoint: Option<DateTime<Utc>>,
        related_ids: Vec<String>,
    ) -> SyncEvent {
        let name = classify(self.created_at, checkpoint);
        let occurred_at = match name {
            EventName::Created => self.created_at,
            EventName::Updated => self.updated_at,
        };
        SyncEvent::new(name, occurred_at, self.id, self.fields, related_ids)
    }
}
