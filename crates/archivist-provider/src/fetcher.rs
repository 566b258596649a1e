//! Fetcher: walks the provider's call-log API with paging, deduplicates
//! against the Progress Store, and yields newest-first recordings with a
//! non-empty audio handle.

use std::sync::Arc;
use std::time::Duration;

use archivist_core::model::{Recording, StageState};
use archivist_core::ErrorKind;
use archivist_progress::ProgressStore;
use archivist_ratelimit::{EndpointGroup, RateLimiter};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::client::{ProviderError, TelephonyClient};

const PAGE_CAP: u32 = 1000;
const MAX_ATTEMPTS_PER_PAGE: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_MAX: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error after retries: {0}")]
    Transient(String),
    #[error("authentication failed even after refresh: {0}")]
    Auth(String),
    #[error("request rejected by provider: {0}")]
    Validation(String),
    #[error("fetch was cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::Transient(_) => ErrorKind::TransientUpstream,
            FetchError::Auth(_) => ErrorKind::AuthFailure,
            FetchError::Validation(_) => ErrorKind::Validation,
            FetchError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl From<ProviderError> for FetchError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Transient(m) => FetchError::Transient(m),
            ProviderError::Auth(m) => FetchError::Auth(m),
            ProviderError::Validation(m) => FetchError::Validation(m),
        }
    }
}

/// Outcome of one `Fetcher::fetch` run.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct FetchSummary {
    pub pages_read: u32,
    pub recordings_discovered: u32,
    pub recordings_deduplicated: u32,
    pub hit_page_cap: bool,
}

pub struct Fetcher<C: TelephonyClient> {
    client: Arc<C>,
    rate_limiter: Arc<RateLimiter>,
    progress: Arc<dyn ProgressStore>,
}

impl<C: TelephonyClient> Fetcher<C> {
    pub fn new(client: Arc<C>, rate_limiter: Arc<RateLimiter>, progress: Arc<dyn ProgressStore>) -> Self {
        Self {
            client,
            rate_limiter,
            progress,
        }
    }

    /// Enumerates recordings within `[date_from, date_to]` and pushes each
    /// one not already tracked by the Progress Store into `sink`. The cap
    /// of 1000 pages is a safety bound against a misbehaving upstream, not
    /// a semantic guarantee.
    #[instrument(skip(self, sink, cancel))]
    pub async fn fetch(
        &self,
        date_from: DateTime<Utc>,
        date_to: DateTime<Utc>,
        sink: &mpsc::Sender<Recording>,
        cancel: &CancellationToken,
    ) -> Result<FetchSummary, FetchError> {
        let mut summary = FetchSummary::default();
        let mut refreshed_once = false;

        for page in 0..PAGE_CAP {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let call_log_page = self.fetch_page_with_retry(date_from, date_to, page, &mut refreshed_once, cancel).await?;
            summary.pages_read += 1;

            for recording in call_log_page.records {
                if recording.content_uri.is_empty() {
                    continue;
                }

                let already_tracked = self
                    .progress
                    .get(&recording.recording_id)
                    .map(|row| row.stage_state != StageState::Failed)
                    .unwrap_or(false);

                if already_tracked {
                    summary.recordings_deduplicated += 1;
                    continue;
                }

                self.progress.upsert(&recording);
                summary.recordings_discovered += 1;

                if sink.send(recording).await.is_err() {
                    info!("downstream channel closed, stopping fetch early");
                    return Ok(summary);
                }
            }

            if !call_log_page.has_more {
                return Ok(summary);
            }
        }

        warn!(cap = PAGE_CAP, "hit the hard page cap; stopping enumeration");
        summary.hit_page_cap = true;
        Ok(summary)
    }

    async fn fetch_page_with_retry(
        &self,
        date_from: DateTime<Utc>,
        date_to: DateTime<Utc>,
        page: u32,
        refreshed_once: &mut bool,
        cancel: &CancellationToken,
    ) -> Result<crate::client::CallLogPage, FetchError> {
        let mut attempt = 0u32;
        loop {
            self.rate_limiter
                .wait("call-log-listing", EndpointGroup::Medium, cancel)
                .await
                .map_err(|_| FetchError::Cancelled)?;

            match self.client.list_call_log_page(date_from, date_to, page).await {
                Ok(result) => return Ok(result),
                Err(ProviderError::Auth(message)) => {
                    if *refreshed_once {
                        return Err(FetchError::Auth(message));
                    }
                    warn!("provider auth failure, refreshing token once");
                    self.client.refresh_token().await?;
                    *refreshed_once = true;
                    continue;
                }
                Err(ProviderError::Validation(message)) => {
                    return Err(FetchError::Validation(message));
                }
                Err(ProviderError::Transient(message)) => {
                    attempt += 1;
                    if attempt >= MAX_ATTEMPTS_PER_PAGE {
                        return Err(FetchError::Transient(message));
                    }
                    let backoff = (BACKOFF_BASE * 2u32.pow(attempt - 1)).min(BACKOFF_MAX);
                    warn!(page, attempt, ?backoff, "transient fetch error, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::StubTelephonyClient;
    use archivist_core::model::Direction;
    use archivist_progress::InMemoryProgressStore;

    fn recording(id: &str) -> Recording {
        Recording {
            recording_id: id.to_string(),
            call_id: "call".to_string(),
            session_id: "session".to_string(),
            start_time: Utc::now(),
            duration_seconds: 10,
            from_number: "1".to_string(),
            to_number: "2".to_string(),
            from_name: String::new(),
            to_name: String::new(),
            direction: Direction::Inbound,
            content_uri: format!("handle://{id}"),
        }
    }

    #[tokio::test]
    async fn yields_new_recordings_and_registers_progress() {
        let client = Arc::new(StubTelephonyClient::new(vec![crate::client::CallLogPage {
            records: vec![recording("r1"), recording("r2")],
            has_more: false,
        }]));
        let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::new());
        let fetcher = Fetcher::new(client, Arc::new(RateLimiter::new()), progress.clone());

        let (tx, mut rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let summary = fetcher
            .fetch(Utc::now(), Utc::now(), &tx, &cancel)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(summary.recordings_discovered, 2);
        assert!(progress.get("r1").is_some());

        let mut seen = vec![];
        while let Some(r) = rx.recv().await {
            seen.push(r.recording_id);
        }
        assert_eq!(seen, vec!["r1", "r2"]);
    }

    #[tokio::test]
    async fn skips_recordings_without_a_content_handle() {
        let mut no_handle = recording("r1");
        no_handle.content_uri.clear();
        let client = Arc::new(StubTelephonyClient::new(vec![crate::client::CallLogPage {
            records: vec![no_handle],
            has_more: false,
        }]));
        let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::new());
        let fetcher = Fetcher::new(client, Arc::new(RateLimiter::new()), progress);

        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let summary = fetcher.fetch(Utc::now(), Utc::now(), &tx, &cancel).await.unwrap();
        assert_eq!(summary.recordings_discovered, 0);
    }

    #[tokio::test]
    async fn dedups_against_non_failed_progress_rows() {
        let client = Arc::new(StubTelephonyClient::new(vec![crate::client::CallLogPage {
            records: vec![recording("r1")],
            has_more: false,
        }]));
        let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::new());
        progress.upsert(&recording("r1"));
        progress.claim("r1", StageState::Discovered, StageState::Downloaded);
        progress.claim("r1", StageState::Downloaded, StageState::Transcribing);
        progress.claim("r1", StageState::Transcribing, StageState::Transcribed);
        progress.claim("r1", StageState::Transcribed, StageState::Persisted);

        let fetcher = Fetcher::new(client, Arc::new(RateLimiter::new()), progress);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let summary = fetcher.fetch(Utc::now(), Utc::now(), &tx, &cancel).await.unwrap();

        assert_eq!(summary.recordings_discovered, 0);
        assert_eq!(summary.recordings_deduplicated, 1);
    }

    #[tokio::test]
    async fn failed_recordings_are_not_automatically_requeued() {
        let client = Arc::new(StubTelephonyClient::new(vec![crate::client::CallLogPage {
            records: vec![recording("r1")],
            has_more: false,
        }]));
        let progress: Arc<dyn ProgressStore> = Arc::new(InMemoryProgressStore::new());
        progress.upsert(&recording("r1"));
        progress.mark_failed("r1", "boom");

        let fetcher = Fetcher::new(client, Arc::new(RateLimiter::new()), progress);
        let (tx, _rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let summary = fetcher.fetch(Utc::now(), Utc::now(), &tx, &cancel).await.unwrap();

        assert_eq!(summary.recordings_discovered, 1, "failed rows are reprocessed, not skipped");
    }
}
