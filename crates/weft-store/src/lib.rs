pub mod definitions;
pub mod embeddings;
pub mod knowledge;
pub mod runs;

pub use definitions::{FileDefinitionStore, InMemoryDefinitionStore};
pub use embeddings::{cosine_similarity, EmbeddingProvider, HttpEmbeddingProvider};
pub use knowledge::SqliteKnowledgeBase;
pub use runs::{InMemoryRunStore, SqliteRunStore};
