pub mod fetcher;
pub mod integrity;
pub mod models;
pub mod resolver;
pub mod service;
pub mod version;

pub use fetcher::{ArtifactFetcher, FirmwareDownloader};
pub use integrity::{IntegrityFailure, IntegrityOutcome};
pub use models::*;
pub use resolver::ReleaseResolver;
pub use service::UpdateService;
pub use version::versions_equal;
