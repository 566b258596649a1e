//! Telephony provider client trait and the recording Fetcher.

mod client;
mod fetcher;

pub use client::{CallLogPage, ProviderError, StubTelephonyClient, TelephonyClient};
pub use fetcher::{FetchError, FetchSummary, Fetcher};
