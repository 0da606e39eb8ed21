//! Data models for the import pipeline

pub mod import_record;
pub mod run_summary;

pub use import_record::{
    FileIdentity, IdentityParseError, ImportRecord, ImportStatus, TrackMetadata, Transition,
    TransitionError,
};
pub use run_summary::RunSummary;
