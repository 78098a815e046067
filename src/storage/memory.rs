use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::models::{ArticleRecord, Stats};
use super::{ArticleStore, Statistics};

/// 进程内的文章集合，不落盘
#[derive(Clone, Default)]
pub struct MemoryArticleStore {
    records: Arc<RwLock<Vec<ArticleRecord>>>,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    async fn append_article(&self, record: ArticleRecord) -> Result<()> {
        self.records.write().await.insert(0, record);
        Ok(())
    }

    async fn list_articles(&self) -> Result<Vec<ArticleRecord>> {
        Ok(self.records.read().await.clone())
    }

    async fn remove_article(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() != before)
    }

    async fn replace_all(&self, records: Vec<ArticleRecord>) -> Result<()> {
        *self.records.write().await = records;
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct MemoryStatistics {
    stats: Arc<RwLock<Stats>>,
}

impl MemoryStatistics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Statistics for MemoryStatistics {
    async fn increment_posts_generated(&self) -> Result<u64> {
        let mut stats = self.stats.write().await;
        stats.posts_generated += 1;
        Ok(stats.posts_generated)
    }

    async fn snapshot(&self) -> Result<Stats> {
        Ok(self.stats.read().await.clone())
    }
}
