//! # Cursor Pager
//!
//! Walks the meeting search for one window, page by page.
//!
//! ## Offset Ceiling
//! ```text
//!   window.start ─────────────────────────────────────────────► window.end
//!        │ after=0 │ 100 │ ... │ 9800 │
//!                                   └─ next.after >= max_offset
//!                                        │
//!                                        ▼
//!                  rewind: start = updatedAt of last record, after = none
//!                                   │ after=0 │ 100 │ ... │
//! ```
//!
//! The search endpoint refuses offsets past 10 000. Instead of paging deeper
//! the pager narrows the window to start at the last record it saw and
//! starts again from offset zero. Bounds are inclusive, so records sharing
//! the rewind millisecond come back twice; the engine drops them by id.
//! A ceiling page whose records carry no `updatedAt` fails the pass rather
//! than ending it early.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{SyncError, SyncResult};
use crate::retry::Retrier;
use pulse_core::filter::{build_filter, Sort};
use pulse_core::remote::{RawRecord, SearchRequest};
use pulse_core::{
    PageCursor, SearchWindow, DEFAULT_PAGE_SIZE, LAST_MODIFIED_PROPERTY, MAX_OFFSET,
    MEETING_PROPERTIES,
};

/// Lazy page sequence over one search window. Not restartable.
pub struct CursorPager<'a> {
    retrier: &'a Retrier,
    window: SearchWindow,
    cursor: PageCursor,
    page_size: u32,
    max_offset: u64,
    done: bool,
    pages: usize,
    rewinds: usize,
}

impl<'a> CursorPager<'a> {
    pub fn new(retrier: &'a Retrier, window: SearchWindow) -> Self {
        CursorPager {
            retrier,
            window,
            cursor: PageCursor::default(),
            page_size: DEFAULT_PAGE_SIZE,
            max_offset: MAX_OFFSET,
            done: false,
            pages: 0,
            rewinds: 0,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_offset(mut self, max_offset: u64) -> Self {
        self.max_offset = max_offset;
        self
    }

    pub fn window(&self) -> &SearchWindow {
        &self.window
    }

    pub fn cursor(&self) -> &PageCursor {
        &self.cursor
    }

    /// Pages fetched so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Times the window was narrowed because of the offset ceiling.
    pub fn rewinds(&self) -> usize {
        self.rewinds
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Request for the current cursor position.
    pub fn request(&self) -> SearchRequest {
        let group = build_filter(
            self.cursor.effective_start(&self.window),
            self.window.end(),
            LAST_MODIFIED_PROPERTY,
        );

        SearchRequest {
            filter_groups: if group.is_empty() { Vec::new() } else { vec![group] },
            sorts: vec![Sort::ascending(LAST_MODIFIED_PROPERTY)],
            properties: MEETING_PROPERTIES.iter().map(|p| p.to_string()).collect(),
            limit: self.page_size,
            after: self.cursor.after.map(|after| after.to_string()),
        }
    }

    /// Fetches the next page, or `None` once the results are exhausted.
    ///
    /// Exhausted retries, cancellation and non-retryable remote errors are
    /// returned as-is; the pager is unusable afterwards.
    pub async fn next_page(&mut self) -> SyncResult<Option<Vec<RawRecord>>> {
        if self.done {
            return Ok(None);
        }

        let request = self.request();
        let result = self
            .retrier
            .execute("meeting search", |token| {
                let client = self.retrier.client();
                let request = request.clone();
                async move { client.search_meetings(&token, &request).await }
            })
            .await;

        let page = match result {
            Ok(page) => page,
            Err(e) => {
                self.done = true;
                return Err(e);
            }
        };
        self.pages += 1;

        let next_after = match page.next_after() {
            Ok(next) => next,
            Err(e) => {
                self.done = true;
                return Err(e.into());
            }
        };

        debug!(
            page = self.pages,
            records = page.results.len(),
            after = ?request.after,
            next_after = ?next_after,
            "Fetched meeting page"
        );

        match next_after {
            None => self.done = true,
            Some(after) if after >= self.max_offset => {
                if let Err(e) = self.rewind(&page.results) {
                    self.done = true;
                    return Err(e);
                }
            }
            Some(after) => self.cursor.advance(after),
        }

        if page.results.is_empty() && self.done {
            return Ok(None);
        }
        Ok(Some(page.results))
    }

    /// Restarts paging from the last record's modification time.
    ///
    /// An empty page ends the results. A page with records but no
    /// modification time fails, since more results remain past the ceiling.
    fn rewind(&mut self, records: &[RawRecord]) -> SyncResult<()> {
        if records.is_empty() {
            self.done = true;
            return Ok(());
        }
        let Some(last_modified) = records.iter().rev().find_map(RawRecord::modified_at) else {
            return Err(SyncError::RewindUnanchored {
                records: records.len(),
            });
        };

        let current_start = self.cursor.effective_start(&self.window);
        if !moves_forward(current_start, last_modified) {
            return Err(SyncError::WindowStalled { at: last_modified });
        }

        self.cursor.rewind(last_modified);
        self.rewinds += 1;
        info!(
            rewind_to = %last_modified,
            rewinds = self.rewinds,
            "Offset ceiling reached, narrowing search window"
        );
        Ok(())
    }
}

fn moves_forward(current: Option<DateTime<Utc>>, candidate: DateTime<Utc>) -> bool {
    match current {
        Some(current) => candidate > current,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use tokio_util::sync::CancellationToken;

    use crate::auth::{AccountCredentials, Credential};
    use crate::memory::{Failure, InMemoryCrm};
    use crate::retry::RetryPolicy;
    use pulse_core::from_millis;

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
            RetryPolicy::new(3, Duration::from_millis(10)),
            crm,
            credentials,
            CancellationToken::new(),
        )
    }

    async fn drain(pager: &mut CursorPager<'_>) -> Vec<String> {
        let mut ids = Vec::new();
        while let Some(page) = pager.next_page().await.unwrap() {
            ids.extend(page.into_iter().map(|r| r.id));
        }
        ids
    }

    #[tokio::test]
    async fn test_pages_until_no_next_cursor() {
        let crm = Arc::new(InMemoryCrm::new());
        crm.insert_meetings((0..25).map(|i| InMemoryCrm::meeting(&i.to_string(), ts(1), ts(100 + i))));
        let retrier = retrier(Arc::clone(&crm));

        let window = SearchWindow::new(Some(ts(50)), ts(1_000)).unwrap();
        let mut pager = CursorPager::new(&retrier, window).with_page_size(10);
        let ids = drain(&mut pager).await;

        assert_eq!(ids.len(), 25);
        assert_eq!(pager.pages(), 3);
        assert_eq!(pager.rewinds(), 0);
        assert!(pager.is_done());
        assert!(pager.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_first_request_shape() {
        let crm = Arc::new(InMemoryCrm::new());
        let retrier = retrier(Arc::clone(&crm));

        let window = SearchWindow::new(Some(ts(5)), ts(9)).unwrap();
        let pager = CursorPager::new(&retrier, window);
        let request = pager.request();

        assert_eq!(request.filter_groups.len(), 1);
        assert_eq!(request.filter_groups[0].filters[0].value, "5");
        assert_eq!(request.filter_groups[0].filters[1].value, "9");
        assert_eq!(request.sorts[0].property_name, LAST_MODIFIED_PROPERTY);
        assert_eq!(request.limit, DEFAULT_PAGE_SIZE);
        assert!(request.after.is_none());
    }

    #[tokio::test]
    async fn test_unbounded_window_sends_no_filter() {
        let crm = Arc::new(InMemoryCrm::new());
        crm.insert_meeting(InMemoryCrm::meeting("1", ts(1), ts(2)));
        let retrier = retrier(Arc::clone(&crm));

        let window = SearchWindow::new(None, ts(10)).unwrap();
        let mut pager = CursorPager::new(&retrier, window);
        assert_eq!(drain(&mut pager).await, vec!["1"]);
        assert!(crm.search_requests()[0].filter_groups.is_empty());
    }

    #[tokio::test]
    async fn test_rewinds_at_offset_ceiling() {
        let crm = Arc::new(InMemoryCrm::new());
        crm.insert_meetings((0..50).map(|i| InMemoryCrm::meeting(&i.to_string(), ts(1), ts(100 + i))));
        let retrier = retrier(Arc::clone(&crm));

        let window = SearchWindow::new(Some(ts(0)), ts(1_000)).unwrap();
        let mut pager = CursorPager::new(&retrier, window)
            .with_page_size(10)
            .with_max_offset(20);
        let ids = drain(&mut pager).await;

        let mut unique = ids.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 50);
        assert!(pager.rewinds() >= 2);

        let rewound = crm
            .search_requests()
            .into_iter()
            .filter(|r| r.after.is_none())
            .count();
        assert_eq!(rewound, pager.rewinds() + 1);
    }

    #[tokio::test]
    async fn test_rewind_that_cannot_advance_stalls() {
        let crm = Arc::new(InMemoryCrm::new());
        crm.insert_meetings((0..30).map(|i| InMemoryCrm::meeting(&i.to_string(), ts(1), ts(500))));
        let retrier = retrier(Arc::clone(&crm));

        let window = SearchWindow::new(Some(ts(0)), ts(1_000)).unwrap();
        let mut pager = CursorPager::new(&retrier, window)
            .with_page_size(10)
            .with_max_offset(10);

        // first rewind moves 0 -> 500, the second one cannot move
        assert!(pager.next_page().await.unwrap().is_some());
        let err = pager.next_page().await.unwrap_err();
        assert!(matches!(err, SyncError::WindowStalled { .. }));
        assert!(pager.is_done());
    }

    #[tokio::test]
    async fn test_ceiling_page_without_timestamps_fails() {
        let crm = Arc::new(InMemoryCrm::new());
        crm.insert_meetings((0..15).map(|i| RawRecord {
            updated_at: None,
            ..InMemoryCrm::meeting(&i.to_string(), ts(1), ts(2))
        }));
        let retrier = retrier(Arc::clone(&crm));

        let window = SearchWindow::new(None, ts(1_000)).unwrap();
        let mut pager = CursorPager::new(&retrier, window)
            .with_page_size(10)
            .with_max_offset(10);

        let err = pager.next_page().await.unwrap_err();
        assert!(matches!(err, SyncError::RewindUnanchored { records: 10 }));
        assert!(pager.is_done());
        assert_eq!(pager.rewinds(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_search_failure_is_retried() {
        let crm = Arc::new(InMemoryCrm::new());
        crm.insert_meeting(InMemoryCrm::meeting("1", ts(1), ts(2)));
        crm.fail_searches(2, Failure::Unavailable);
        let retrier = retrier(Arc::clone(&crm));

        let window = SearchWindow::new(Some(ts(0)), ts(10)).unwrap();
        let mut pager = CursorPager::new(&retrier, window);
        assert_eq!(drain(&mut pager).await, vec!["1"]);
        assert_eq!(crm.search_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_ends_the_pager() {
        let crm = Arc::new(InMemoryCrm::new());
        crm.fail_all_searches(Some(Failure::Timeout));
        let retrier = retrier(Arc::clone(&crm));

        let window = SearchWindow::new(Some(ts(0)), ts(10)).unwrap();
        let mut pager = CursorPager::new(&retrier, window);

        let err = pager.next_page().await.unwrap_err();
        assert!(matches!(err, SyncError::Exhausted { attempts: 3, .. }));
        assert_eq!(crm.search_calls(), 3);
        assert!(pager.next_page().await.unwrap().is_none());
    }
}
