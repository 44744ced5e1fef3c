mod models;
mod schema;
mod store;
mod trait_def;

pub use models::*;
pub use schema::DISCOVERY_VERSIONED_SCHEMAS;
pub use store::SqliteDiscoveryStore;
pub use trait_def::DiscoveryStore;
