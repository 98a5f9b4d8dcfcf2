//! Bulk retrieval from the SODA crime endpoint.

pub mod api_types;
pub mod cache;
pub mod cached_client;
pub mod client;
pub mod types;
