//! Import pipeline components

pub mod bulk_import;
pub mod dedup_gate;
pub mod duplicate_matcher;
pub mod file_scanner;
pub mod fingerprint_store;
pub mod import_driver;
pub mod library_writer;
pub mod metadata_resolver;
pub mod tag_reader;

pub use bulk_import::bulk_import;
pub use dedup_gate::{Decision, DedupGate};
pub use duplicate_matcher::DuplicateMatcher;
pub use file_scanner::{FileScanner, ScanError, ScannedFile};
pub use fingerprint_store::{FingerprintStore, MemoryStore, StoreError};
pub use import_driver::{dry_run, DriverOptions, ImportDriver};
pub use library_writer::{LibraryWriter, Placement, PlacementMode, TagError, TaggingSink};
pub use metadata_resolver::{
    MetadataResolver, OllamaResolver, OpenAiResolver, ResolveError, ResolveRequest, ResolverChain,
};
pub use tag_reader::TagHints;
