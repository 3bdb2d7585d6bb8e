use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::KnowledgeSearch;
use weft_core::types::KnowledgeHit;

use crate::embeddings::{cosine_similarity, decode_vector, encode_vector, EmbeddingProvider};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        knowledge_base_id TEXT NOT NULL,
        content TEXT NOT NULL,
        metadata TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_documents_kb
        ON documents(knowledge_base_id);

    CREATE TABLE IF NOT EXISTS embeddings (
        id INTEGER PRIMARY KEY,
        document_id INTEGER NOT NULL REFERENCES documents(id),
        embedding BLOB NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_embeddings_doc ON embeddings(document_id);
";

/// Knowledge bases as documents plus embedding vectors in SQLite.
///
/// Search embeds the query with the same provider used at ingestion and ranks
/// every document of the knowledge base by cosine similarity.
pub struct SqliteKnowledgeBase {
    conn: Mutex<Connection>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl SqliteKnowledgeBase {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                WeftError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(|e| WeftError::Database(e.to_string()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| WeftError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| WeftError::Database(e.to_string()))?;

        debug!(path = %path.display(), "Knowledge base opened");
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory(embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| WeftError::Database(e.to_string()))?;
        conn.execute_batch(SCHEMA)
            .map_err(|e| WeftError::Database(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
        })
    }

    /// Embed and store one document. Returns its row id.
    pub async fn add_document(
        &self,
        knowledge_base_id: &str,
        content: &str,
        metadata: Value,
    ) -> Result<i64> {
        let vector = self
            .embedder
            .embed(&[content.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| WeftError::Knowledge("embedding provider returned nothing".into()))?;
        let expected = self.embedder.dimensions();
        if vector.len() != expected {
            return Err(WeftError::Knowledge(format!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                expected
            )));
        }

        let metadata = serde_json::to_string(&metadata)?;
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| WeftError::Database(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| WeftError::Database(e.to_string()))?;
        tx.execute(
            "INSERT INTO documents (knowledge_base_id, content, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![knowledge_base_id, content, metadata, Utc::now().to_rfc3339()],
        )
        .map_err(|e| WeftError::Database(e.to_string()))?;
        let document_id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO embeddings (document_id, embedding) VALUES (?1, ?2)",
            params![document_id, encode_vector(&vector)],
        )
        .map_err(|e| WeftError::Database(e.to_string()))?;
        tx.commit()
            .map_err(|e| WeftError::Database(e.to_string()))?;

        Ok(document_id)
    }

    pub fn document_count(&self, knowledge_base_id: &str) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| WeftError::Database(e.to_string()))?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM documents WHERE knowledge_base_id = ?1",
                params![knowledge_base_id],
                |row| row.get(0),
            )
            .map_err(|e| WeftError::Database(e.to_string()))?;
        Ok(count as usize)
    }

    /// Rank documents of one knowledge base against a query vector.
    fn search_similar(
        &self,
        knowledge_base_id: &str,
        query_vec: &[f32],
        top_k: usize,
        threshold: f32,
    ) -> Result<Vec<KnowledgeHit>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| WeftError::Database(e.to_string()))?;

        let mut stmt = conn
            .prepare(
                "SELECT e.embedding, d.content, d.metadata
                 FROM embeddings e
                 JOIN documents d ON d.id = e.document_id
                 WHERE d.knowledge_base_id = ?1",
            )
            .map_err(|e| WeftError::Database(e.to_string()))?;

        let rows = stmt
            .query_map(params![knowledge_base_id], |row| {
                let blob: Vec<u8> = row.get(0)?;
                let content: String = row.get(1)?;
                let metadata: String = row.get(2)?;
                Ok((blob, content, metadata))
            })
            .map_err(|e| WeftError::Database(e.to_string()))?;

        let mut scored = Vec::new();
        for row in rows {
            let (blob, content, metadata) = row.map_err(|e| WeftError::Database(e.to_string()))?;
            let score = cosine_similarity(query_vec, &decode_vector(&blob));
            if score < threshold {
                continue;
            }
            scored.push(KnowledgeHit {
                content,
                score,
                metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
            });
        }

        // Sort by similarity descending
        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        Ok(scored)
    }
}

impl KnowledgeSearch for SqliteKnowledgeBase {
    fn search<'a>(
        &'a self,
        knowledge_base_id: &'a str,
        query: &'a str,
        top_k: usize,
        threshold: f32,
    ) -> BoxFuture<'a, Result<Vec<KnowledgeHit>>> {
        Box::pin(async move {
            let query_vec = self
                .embedder
                .embed(&[query.to_string()])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| WeftError::Knowledge("embedding provider returned nothing".into()))?;

            let hits = self.search_similar(knowledge_base_id, &query_vec, top_k, threshold)?;
            debug!(
                knowledge_base = knowledge_base_id,
                hits = hits.len(),
                "Knowledge search"
            );
            Ok(hits)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Counts of a few keywords, enough to make similarity meaningful.
    struct KeywordEmbedder;

    const KEYWORDS: &[&str] = &["rust", "tokio", "garden", "tomato"];

    impl EmbeddingProvider for KeywordEmbedder {
        fn embed(&self, texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
            let vectors = texts
                .iter()
                .map(|t| {
                    let lower = t.to_lowercase();
                    KEYWORDS
                        .iter()
                        .map(|k| lower.matches(k).count() as f32)
                        .collect()
                })
                .collect();
            Box::pin(async move { Ok(vectors) })
        }

        fn dimensions(&self) -> usize {
            KEYWORDS.len()
        }
    }

    async fn seeded() -> SqliteKnowledgeBase {
        let kb = SqliteKnowledgeBase::in_memory(Arc::new(KeywordEmbedder)).unwrap();
        kb.add_document("docs", "Rust async with tokio", json!({"source": "a.md"}))
            .await
            .unwrap();
        kb.add_document("docs", "Rust ownership rules", json!({"source": "b.md"}))
            .await
            .unwrap();
        kb.add_document("docs", "Growing tomato plants in the garden", json!({}))
            .await
            .unwrap();
        kb.add_document("other", "Rust tokio internals", json!({}))
            .await
            .unwrap();
        kb
    }

    #[tokio::test]
    async fn test_search_ranks_and_scopes() {
        let kb = seeded().await;
        assert_eq!(kb.document_count("docs").unwrap(), 3);

        let hits = kb.search("docs", "rust tokio", 5, 0.5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].content, "Rust async with tokio");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[0].metadata["source"], json!("a.md"));
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_rejects_wrong_dimensions() {
        struct Short;
        impl EmbeddingProvider for Short {
            fn embed(&self, _texts: &[String]) -> BoxFuture<'_, Result<Vec<Vec<f32>>>> {
                Box::pin(async { Ok(vec![vec![1.0]]) })
            }
            fn dimensions(&self) -> usize {
                3
            }
        }
        let kb = SqliteKnowledgeBase::in_memory(Arc::new(Short)).unwrap();
        let err = kb.add_document("docs", "x", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("expected 3"));
        assert_eq!(kb.document_count("docs").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_embedding_insert_leaves_no_document() {
        let kb = SqliteKnowledgeBase::in_memory(Arc::new(KeywordEmbedder)).unwrap();
        kb.conn
            .lock()
            .unwrap()
            .execute_batch("DROP TABLE embeddings;")
            .unwrap();

        let err = kb
            .add_document("docs", "Rust ownership rules", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, WeftError::Database(_)));
        assert_eq!(kb.document_count("docs").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_search_threshold_and_top_k() {
        let kb = seeded().await;
        let hits = kb.search("docs", "rust tokio", 1, 0.0).await.unwrap();
        assert_eq!(hits.len(), 1);

        let hits = kb.search("docs", "tomato", 5, 0.99).await.unwrap();
        assert_eq!(hits.len(), 0);

        let hits = kb.search("missing", "rust", 5, 0.0).await.unwrap();
        assert!(hits.is_empty());
    }
}
