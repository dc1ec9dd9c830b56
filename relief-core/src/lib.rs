//! RELIEF Core - domain types for the disaster-response data API
//!
//! Feed areas, feeds and needs as served by the read endpoints, the
//! queries that select them, and the error enums shared by the storage,
//! ingestion and API crates.

pub mod entities;
pub mod error;

pub use entities::{
    CreateNeedRequest, Feed, FeedArea, FeedAreaQuery, FeedId, FeedLocationUpdate, Location, Need,
    NeedFilter, NeedId, UpdateFeedLocationsRequest,
};
pub use error::{ConfigError, RepositoryError, ValidationError};
