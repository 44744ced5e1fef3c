//! Clients for the external services: the rate-limited catalog, the open
//! metadata registry, and the shared rate budget they draw on.

mod client;
mod http;
mod musicbrainz;
mod rate_budget;

pub use client::{
    parse_release_year, CatalogClient, MetadataRegistry, RegistryRecording, UpstreamError,
    UpstreamResult,
};
pub use http::HttpCatalogClient;
pub use musicbrainz::{MusicBrainzClient, MUSICBRAINZ_API_BASE};
pub use rate_budget::{
    NoOpRateBudget, RateBudget, RateBudgetStatus, TokenBucket, TokenBucketConfig,
};
