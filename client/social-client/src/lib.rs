//! Video-sharing social client
//!
//! Domain records, the remote backend interface and a typed client whose
//! reads and writes go through the optimistic query cache.

pub mod backend;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod mutations;
pub mod queries;
pub mod validation;

pub use backend::{InMemoryBackend, SocialBackend};
pub use client::SocialClient;
pub use config::Config;
pub use error::{ClientError, ClientResult};
pub use queries::{Query, QueryData};
