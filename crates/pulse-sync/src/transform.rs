//! # Record Transformer
//!
//! Turns search results into [`SyncEvent`]s, resolving each meeting's
//! participants through the association and contact endpoints.
//!
//! ```text
//!   RawRecord ──► MeetingRecord ──┬──► classify vs checkpoint
//!                                 │
//!                                 └──► meeting → contact ids ──► emails
//!                                        (skipped when no contacts)
//! ```
//!
//! Lookups go through the same [`Retrier`] as the search, so an exhausted
//! lookup aborts the pass like an exhausted page fetch.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::error::SyncResult;
use crate::retry::Retrier;
use pulse_core::remote::{AssociationResult, BatchReadRequest, CrmObject, RawRecord};
use pulse_core::{MeetingRecord, SyncEvent};

/// Contact property holding the participant address.
const EMAIL_PROPERTY: &str = "email";

/// Upper bound on ids per batch read.
const MAX_BATCH_INPUTS: usize = 100;

/// Events of one page plus the records that could not be used.
#[derive(Debug, Default)]
pub struct TransformedPage {
    pub events: Vec<SyncEvent>,
    pub malformed: usize,
}

/// Per-pass record transformer.
pub struct RecordTransformer<'a> {
    retrier: &'a Retrier,
    batch: bool,
}

impl<'a> RecordTransformer<'a> {
    pub fn new(retrier: &'a Retrier) -> Self {
        RecordTransformer {
            retrier,
            batch: false,
        }
    }

    /// Resolves participants for a whole page with one lookup per endpoint.
    pub fn batched(mut self, batch: bool) -> Self {
        self.batch = batch;
        self
    }

    /// Transforms a page in order. Records missing required fields are
    /// logged and skipped.
    pub async fn transform_page(
        &self,
        records: &[RawRecord],
        checkpoint: Option<DateTime<Utc>>,
    ) -> SyncResult<TransformedPage> {
        let mut page = TransformedPage::default();

        let mut meetings = Vec::with_capacity(records.len());
        for raw in records {
            match MeetingRecord::try_from(raw) {
                Ok(meeting) => meetings.push(meeting),
                Err(e) => {
                    warn!(record_id = %raw.id, error = %e, "Skipping malformed meeting");
                    page.malformed += 1;
                }
            }
        }

        if self.batch {
            let ids: Vec<&str> = meetings.iter().map(|m| m.id.as_str()).collect();
            let mut participants = self.participants_for_page(&ids).await?;
            for meeting in meetings {
                let related = participants.remove(&meeting.id).unwrap_or_default();
                page.events.push(meeting.into_event(checkpoint, related));
            }
        } else {
            for meeting in meetings {
                let related = self.participants(&meeting.id).await?;
                page.events.push(meeting.into_event(checkpoint, related));
            }
        }

        Ok(page)
    }

    /// Participant emails of one meeting, in association order.
    pub async fn participants(&self, meeting_id: &str) -> SyncResult<Vec<String>> {
        let associations = self.associations(&[meeting_id]).await?;
        let contact_ids: Vec<String> = associations
            .into_iter()
            .filter(|a| a.from.id == meeting_id)
            .flat_map(|a| a.to.into_iter().map(|c| c.id))
            .collect();

        if contact_ids.is_empty() {
            debug!(meeting_id, "Meeting has no participants");
            return Ok(Vec::new());
        }

        let emails = self.contact_emails(&contact_ids).await?;
        Ok(contact_ids
            .iter()
            .filter_map(|id| emails.get(id).cloned())
            .collect())
    }

    /// Participant emails for every meeting id. Meetings without contacts
    /// are absent from the map.
    pub async fn participants_for_page(
        &self,
        meeting_ids: &[&str],
    ) -> SyncResult<HashMap<String, Vec<String>>> {
        if meeting_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut linked: HashMap<String, Vec<String>> = HashMap::new();
        for chunk in meeting_ids.chunks(MAX_BATCH_INPUTS) {
            for association in self.associations(chunk).await? {
                linked
                    .entry(association.from.id)
                    .or_default()
                    .extend(association.to.into_iter().map(|c| c.id));
            }
        }

        let mut contact_ids: Vec<String> = linked.values().flatten().cloned().collect();
        contact_ids.sort();
        contact_ids.dedup();
        if contact_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let emails = self.contact_emails(&contact_ids).await?;

        Ok(linked
            .into_iter()
            .map(|(meeting_id, contacts)| {
                let resolved = contacts
                    .iter()
                    .filter_map(|id| emails.get(id).cloned())
                    .collect();
                (meeting_id, resolved)
            })
            .collect())
    }

    async fn associations(&self, meeting_ids: &[&str]) -> SyncResult<Vec<AssociationResult>> {
        let request = BatchReadRequest::new(meeting_ids.iter().copied());
        let response = self
            .retrier
            .execute("meeting associations", |token| {
                let client = self.retrier.client();
                let request = request.clone();
                async move { client.meeting_contacts(&token, &request).await }
            })
            .await?;
        Ok(response.results)
    }

    /// Email per contact id; contacts without one are left out.
    async fn contact_emails(&self, contact_ids: &[String]) -> SyncResult<HashMap<String, String>> {
        let mut emails = HashMap::with_capacity(contact_ids.len());
        for chunk in contact_ids.chunks(MAX_BATCH_INPUTS) {
            let request = BatchReadRequest::new(chunk.iter().cloned())
                .with_properties(&[EMAIL_PROPERTY]);
            let response = self
                .retrier
                .execute("contact read", |token| {
                    let client = self.retrier.client();
                    let request = request.clone();
                    async move { client.read_contacts(&token, &request).await }
                })
                .await?;

            emails.extend(response.results.iter().filter_map(email_of));
        }
        Ok(emails)
    }
}

fn email_of(contact: &CrmObject) -> Option<(String, String)> {
    contact
        .property_str(EMAIL_PROPERTY)
        .map(|email| (contact.id.clone(), email.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use tokio_util::sync::CancellationToken;

    use crate::auth::{AccountCredentials, Credential};
    use crate::error::SyncError;
    use crate::memory::{Failure, InMemoryCrm};
    use crate::retry::RetryPolicy;
    use pulse_core::{from_millis, EventName};

    fn ts(ms: i64) -> DateTime<Utc> {
        from_millis(ms).unwrap()
    }

    fn retrier(crm: Arc<InMemoryCrm>) -> Retrier {
        let credentials = Arc::new(AccountCredentials::new(
            "42",
            Credential {
                access_token: "token-0".into(),
                refresh_token: "refresh".into(),
                expires_at: Utc::now() + ChronoDuration::hours(1),
            },
        ));
        Retrier::new(
            RetryPolicy::new(2, Duration::from_millis(10)),
            crm,
            credentials,
            CancellationToken::new(),
        )
    }

    fn fixture() -> Arc<InMemoryCrm> {
        let crm = Arc::new(InMemoryCrm::new());
        crm.link_contact("m1", "c1", Some("ada@example.com"));
        crm.link_contact("m1", "c2", None);
        crm.link_contact("m1", "c3", Some("grace@example.com"));
        crm.link_contact("m2", "c3", Some("grace@example.com"));
        crm
    }

    #[tokio::test]
    async fn test_participants_in_association_order() {
        let crm = fixture();
        let retrier = retrier(Arc::clone(&crm));
        let transformer = RecordTransformer::new(&retrier);

        let emails = transformer.participants("m1").await.unwrap();
        assert_eq!(emails, vec!["ada@example.com", "grace@example.com"]);
    }

    #[tokio::test]
    async fn test_no_associations_skips_contact_read() {
        let crm = fixture();
        let retrier = retrier(Arc::clone(&crm));
        let transformer = RecordTransformer::new(&retrier);

        assert!(transformer.participants("lonely").await.unwrap().is_empty());
        assert_eq!(crm.association_calls(), 1);
        assert_eq!(crm.contact_calls(), 0);
    }

    #[tokio::test]
    async fn test_transform_page_classifies_and_skips_malformed() {
        let crm = fixture();
        let retrier = retrier(Arc::clone(&crm));
        let transformer = RecordTransformer::new(&retrier);

        let mut broken = InMemoryCrm::meeting("broken", ts(1), ts(2));
        broken.properties = None;
        let records = vec![
            InMemoryCrm::meeting("m1", ts(500), ts(600)),
            broken,
            InMemoryCrm::meeting("m2", ts(50), ts(700)),
        ];

        let page = transformer
            .transform_page(&records, Some(ts(100)))
            .await
            .unwrap();

        assert_eq!(page.malformed, 1);
        assert_eq!(page.events.len(), 2);
        assert_eq!(page.events[0].name(), EventName::Created);
        assert_eq!(page.events[0].occurred_at(), ts(500));
        assert_eq!(page.events[0].related_ids().len(), 2);
        assert_eq!(page.events[1].name(), EventName::Updated);
        assert_eq!(page.events[1].occurred_at(), ts(700));
        assert_eq!(page.events[1].related_ids().to_vec(), vec!["grace@example.com".to_string()]);
    }

    #[tokio::test]
    async fn test_batched_matches_per_record() {
        let records = vec![
            InMemoryCrm::meeting("m1", ts(500), ts(600)),
            InMemoryCrm::meeting("m2", ts(50), ts(700)),
            InMemoryCrm::meeting("m3", ts(50), ts(800)),
        ];

        let crm = fixture();
        let retrier_a = retrier(Arc::clone(&crm));
        let single = RecordTransformer::new(&retrier_a)
            .transform_page(&records, Some(ts(100)))
            .await
            .unwrap();

        let batched_crm = fixture();
        let retrier_b = retrier(Arc::clone(&batched_crm));
        let batched = RecordTransformer::new(&retrier_b)
            .batched(true)
            .transform_page(&records, Some(ts(100)))
            .await
            .unwrap();

        assert_eq!(single.events, batched.events);
        assert_eq!(crm.association_calls(), 3);
        assert_eq!(batched_crm.association_calls(), 1);
        assert_eq!(batched_crm.contact_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_lookup_fails_page() {
        let crm = fixture();
        crm.fail_lookups(2, Failure::Unavailable);
        let retrier = retrier(Arc::clone(&crm));
        let transformer = RecordTransformer::new(&retrier);

        let result = transformer
            .transform_page(&[InMemoryCrm::meeting("m1", ts(1), ts(2))], None)
            .await;
        assert!(matches!(result, Err(SyncError::Exhausted { .. })));
    }
}
