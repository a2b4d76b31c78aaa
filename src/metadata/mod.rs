//! Group and contact metadata.
//!
//! - [`cache`] - concurrent last-write-wins roster shared by every component
//! - [`refresh`] - background task refreshing the group roster

mod cache;
mod refresh;

pub use crate::metadata::{cache::MetadataCache, refresh::MetadataRefresher};
