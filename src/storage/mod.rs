pub mod database;
#[cfg(test)]
pub mod memory;
pub mod models;
pub mod schema;

pub use database::{Database, SqliteArticleStore, SqliteStatistics};
#[cfg(test)]
pub use memory::{MemoryArticleStore, MemoryStatistics};
pub use models::{ArticleRecord, Author, Category, Stats};

use anyhow::Result;
use async_trait::async_trait;

/// 文章集合，最新的在前。每次操作读写整个集合。
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// 插入到集合最前面
    async fn append_article(&self, record: ArticleRecord) -> Result<()>;

    async fn list_articles(&self) -> Result<Vec<ArticleRecord>>;

    /// 返回是否删除了记录
    async fn remove_article(&self, id: &str) -> Result<bool>;

    async fn replace_all(&self, records: Vec<ArticleRecord>) -> Result<()>;
}

/// 站点统计
#[async_trait]
pub trait Statistics: Send + Sync {
    async fn increment_posts_generated(&self) -> Result<u64>;

    async fn snapshot(&self) -> Result<Stats>;
}
