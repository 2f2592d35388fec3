use anyhow::Result;
use async_trait::async_trait;
use pgvector::Vector;
use std::sync::Arc;
use tracing::{debug, warn};

use super::embedding::EmbeddingClient;
use crate::database::{Repository, RetrievedFragment};

/// Nearest-fragments collaborator: query text in, scored fragments out,
/// descending similarity. The index is populated out of band.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FragmentSearch: Send + Sync {
    async fn search(&self, query: String, k: usize) -> Result<Vec<RetrievedFragment>>;
}

/// Embedding + pgvector implementation of `FragmentSearch`.
pub struct PgVectorSearch {
    embedding: EmbeddingClient,
    repository: Arc<Repository>,
}

impl PgVectorSearch {
    pub fn new(embedding: EmbeddingClient, repository: Arc<Repository>) -> Self {
        Self {
            embedding,
            repository,
        }
    }
}

#[async_trait]
impl FragmentSearch for PgVectorSearch {
    async fn search(&self, query: String, k: usize) -> Result<Vec<RetrievedFragment>> {
        let embedding = self.embedding.embed(&query).await?;
        self.repository
            .search_chunks(Vector::from(embedding), k as i32)
            .await
    }
}

/// Retrieval stage of the turn pipeline. Collaborator faults degrade to an
/// empty result so generation can proceed ungrounded; they are never surfaced
/// as a turn failure.
pub struct Retriever {
    search: Arc<dyn FragmentSearch>,
    top_k: usize,
}

impl Retriever {
    pub fn new(search: Arc<dyn FragmentSearch>, top_k: usize) -> Self {
        Self { search, top_k }
    }

    pub async fn retrieve(&self, query: &str) -> Vec<RetrievedFragment> {
        match self.search.search(query.to_string(), self.top_k).await {
            Ok(fragments) => {
                debug!("Retrieved {} fragments", fragments.len());
                fragments
            }
            Err(e) => {
                warn!("Retrieval unavailable, continuing ungrounded: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    fn fragment(content: &str, similarity: f32) -> RetrievedFragment {
        RetrievedFragment {
            content: content.to_string(),
            document_id: 1,
            chunk_index: 0,
            similarity,
        }
    }

    #[tokio::test]
    async fn passes_query_and_top_k_through() {
        let mut search = MockFragmentSearch::new();
        search
            .expect_search()
            .with(eq("refund policy".to_string()), eq(2usize))
            .times(1)
            .returning(|_, _| Ok(vec![fragment("a", 0.9), fragment("b", 0.8)]));

        let retriever = Retriever::new(Arc::new(search), 2);
        let fragments = retriever.retrieve("refund policy").await;
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].content, "a");
    }

    #[tokio::test]
    async fn empty_index_yields_empty_result() {
        let mut search = MockFragmentSearch::new();
        search.expect_search().returning(|_, _| Ok(Vec::new()));

        let retriever = Retriever::new(Arc::new(search), 4);
        assert!(retriever.retrieve("anything").await.is_empty());
    }

    #[tokio::test]
    async fn collaborator_fault_is_absorbed_as_empty() {
        let mut search = MockFragmentSearch::new();
        search
            .expect_search()
            .returning(|_, _| Err(anyhow::anyhow!("index unavailable")));

        let retriever = Retriever::new(Arc::new(search), 4);
        assert!(retriever.retrieve("anything").await.is_empty());
    }
}
