//! Topic Content Repository Contract
//!
//! Concept chunks come from a content source the core does not own. The
//! lookup is two-level: a primary subtopic query by topic title, and a flatter
//! full-topic query used when the primary returns nothing. An empty result is
//! a valid "no content" case, not an error.

use crate::session::ConceptChunk;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Ordered concept content for a topic.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    /// Primary lookup: the ordered subtopic chunks for a topic title.
    async fn concept_chunks(&self, topic_title: &str) -> Result<Vec<ConceptChunk>>;

    /// Fallback lookup against the flatter content source, keyed by the full
    /// topic string.
    async fn flat_content(&self, topic: &str) -> Result<Vec<ConceptChunk>>;
}

/// A fixed in-memory repository for tests and local development.
#[derive(Default)]
pub struct StaticContentRepository {
    by_title: HashMap<String, Vec<ConceptChunk>>,
    by_topic: HashMap<String, Vec<ConceptChunk>>,
}

impl StaticContentRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers chunks under a topic title for the primary lookup.
    pub fn with_topic(mut self, title: impl Into<String>, chunks: Vec<ConceptChunk>) -> Self {
        self.by_title.insert(title.into(), chunks);
        self
    }

    /// Registers chunks under a full topic string for the fallback lookup.
    pub fn with_flat_topic(mut self, topic: impl Into<String>, chunks: Vec<ConceptChunk>) -> Self {
        self.by_topic.insert(topic.into(), chunks);
        self
    }
}

#[async_trait]
impl ContentRepository for StaticContentRepository {
    async fn concept_chunks(&self, topic_title: &str) -> Result<Vec<ConceptChunk>> {
        Ok(self.by_title.get(topic_title).cloned().unwrap_or_default())
    }

    async fn flat_content(&self, topic: &str) -> Result<Vec<ConceptChunk>> {
        Ok(self.by_topic.get(topic).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_primary_and_fallback_lookups_are_separate() {
        let repo = StaticContentRepository::new()
            .with_topic("Solutions", vec![ConceptChunk::new(1, "Solutes", "...")])
            .with_flat_topic(
                "Chemistry: Solutions",
                vec![ConceptChunk::new(1, "Flat", "...")],
            );

        let primary = repo.concept_chunks("Solutions").await.unwrap();
        assert_eq!(primary[0].title, "Solutes");

        let fallback = repo.flat_content("Chemistry: Solutions").await.unwrap();
        assert_eq!(fallback[0].title, "Flat");
    }

    #[tokio::test]
    async fn test_unknown_topic_is_empty_not_error() {
        let repo = StaticContentRepository::new();
        assert!(repo.concept_chunks("Nope").await.unwrap().is_empty());
        assert!(repo.flat_content("Nope").await.unwrap().is_empty());
    }
}
