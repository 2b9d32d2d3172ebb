pub mod cache;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod gallery;
pub mod matcher;
mod metrics;
mod server;
pub mod session;
#[cfg(feature = "opencv")]
pub mod thumbnail;
pub mod utils;

pub use cache::{CacheError, EmbeddingCache};
pub use config::Opts;
pub use embedding::{Embedding, EmbeddingProvider};
pub use error::{MatchError, Result};
pub use gallery::{CacheOutcome, GalleryFingerprint, GalleryIndex};
pub use matcher::{QueryResult, find_closest};
pub use session::{CachePolicy, MatchSession};
