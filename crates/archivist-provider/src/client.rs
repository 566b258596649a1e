//! The telephony-provider client is an external collaborator: a concrete
//! authentication, paginated log enumeration, and audio byte download
//! implementation is deliberately out of scope here. This trait is the
//! seam the Fetcher consumes; `StubTelephonyClient` is the in-memory
//! implementation used by tests and as a development fallback.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use archivist_core::model::Recording;
use archivist_core::ErrorKind;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("network or transport error: {0}")]
    Transient(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("request rejected: {0}")]
    Validation(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProviderError::Transient(_) => ErrorKind::TransientUpstream,
            ProviderError::Auth(_) => ErrorKind::AuthFailure,
            ProviderError::Validation(_) => ErrorKind::Validation,
        }
    }
}

/// One page of the provider's call-log listing.
#[derive(Debug, Clone, Default)]
pub struct CallLogPage {
    pub records: Vec<Recording>,
    pub has_more: bool,
}

/// Seam for the telephony provider. Production implementations live
/// outside this repository's core; only the interface the Fetcher
/// consumes is specified here.
#[async_trait]
pub trait TelephonyClient: Send + Sync {
    /// Fetches one page of the call log within `[date_from, date_to]`,
    /// newest first, as the provider itself orders them.
    async fn list_call_log_page(
        &self,
        date_from: chrono::DateTime<chrono::Utc>,
        date_to: chrono::DateTime<chrono::Utc>,
        page: u32,
    ) -> Result<CallLogPage, ProviderError>;

    /// Invalidates cached tokens and re-authenticates.
    async fn refresh_token(&self) -> Result<(), ProviderError>;

    /// Downloads the raw audio bytes behind a recording's `content_uri`.
    async fn download_audio(&self, content_uri: &str) -> Result<Vec<u8>, ProviderError>;
}

/// In-memory stand-in used by tests and local development. Serves fixed
/// pages of `Recording`s and never actually authenticates.
pub struct StubTelephonyClient {
    pages: Vec<CallLogPage>,
    refresh_calls: AtomicU32,
    audio: Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl StubTelephonyClient {
    pub fn new(pages: Vec<CallLogPage>) -> Self {
        Self {
            pages,
            refresh_calls: AtomicU32::new(0),
            audio: Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn with_audio(self, content_uri: impl Into<String>, bytes: Vec<u8>) -> Self {
        self.audio.lock().unwrap().insert(content_uri.into(), bytes);
        self
    }

    pub fn refresh_call_count(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelephonyClient for StubTelephonyClient {
    async fn list_call_log_page(
        &self,
        _date_from: chrono::DateTime<chrono::Utc>,
        _date_to: chrono::DateTime<chrono::Utc>,
        page: u32,
    ) -> Result<CallLogPage, ProviderError> {
        Ok(self
            .pages
            .get(page as usize)
            .cloned()
            .unwrap_or_default())
    }

    async fn refresh_token(&self) -> Result<(), ProviderError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn download_audio(&self, content_uri: &str) -> Result<Vec<u8>, ProviderError> {
        self.audio
            .lock()
            .unwrap()
            .get(content_uri)
            .cloned()
            .ok_or_else(|| ProviderError::Validation(format!("no audio for {content_uri}")))
    }
}
