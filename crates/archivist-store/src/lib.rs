//! File-store and record-store client traits, and the Persist Worker that
//! drives a composed artifact through upsert, upload, and audio deletion.

mod client;
mod worker;

pub use client::{FileStoreClient, InMemoryFileStoreClient, InMemoryRecordStore, RecordStore, StoreError};
pub use worker::{PersistError, PersistWorker};
