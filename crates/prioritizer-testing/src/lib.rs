//! Test doubles for the prioritization orchestration engine.
//!
//! Every collaborator trait in `prioritizer_core` (`Clock`, `LlmClient`,
//! `PersistentStore`, `EmbeddingStore`, `KeyProvider`) has an in-memory or
//! fixed-response double here, so `prioritizer-core`'s own unit tests (and
//! any downstream crate's) never need a running Postgres instance or LLM
//! provider.
//!
//! ```rust,ignore
//! use prioritizer_testing::{FixedClock, InMemoryStore, MockLlmClient};
//!
//! let store = Arc::new(InMemoryStore::new());
//! let llm = Arc::new(MockLlmClient::new().with_impact_estimate(estimate));
//! let clock = Arc::new(FixedClock::new(Utc::now()));
//! ```

mod clock;
mod embedding_client;
mod key_provider;
mod llm;
mod store;

pub use clock::FixedClock;
pub use embedding_client::MockEmbeddingClient;
pub use key_provider::FixedKeyProvider;
pub use llm::MockLlmClient;
pub use store::{InMemoryEmbeddingStore, InMemoryStore};

/// Convenience re-exports for `use prioritizer_testing::prelude::*;`.
pub mod prelude {
    pub use crate::{
        FixedClock, FixedKeyProvider, InMemoryEmbeddingStore, InMemoryStore, MockEmbeddingClient,
        MockLlmClient,
    };
}
