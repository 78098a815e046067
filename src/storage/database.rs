use anyhow::{bail, Result};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::models::{seed_article, ArticleRecord, Stats};
use super::schema::{migrate_legacy, validate_collection, CollectionSchema};
use super::{ArticleStore, Statistics};
use crate::config::AuthorDirectory;

const ARTICLES_KEY: &str = "articles_v1";
const CORRUPT_ARTICLES_KEY: &str = "articles_v1.corrupt";
const STATS_KEY: &str = "stats_v1";
/// 最近一次加载的快照内容指纹
const SNAPSHOT_FINGERPRINT_KEY: &str = "articles_v1.snapshot";

/// SQLite 上的简单键值存储
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(
                database_url
                    .parse::<sqlx::sqlite::SqliteConnectOptions>()?
                    .create_if_missing(true),
            )
            .await?;

        info!("数据库连接成功: {}", database_url);
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("数据库表结构初始化完成");
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn put(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// 启动时文章集合的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Snapshot,
    Local,
    Migrated,
    Seed,
}

/// 以 JSON 数组形式整体保存在 kv_store 中的文章集合
pub struct SqliteArticleStore {
    db: Database,
    authors: AuthorDirectory,
    date_format: String,
    write_lock: Mutex<()>,
}

impl SqliteArticleStore {
    pub fn new(db: Database, authors: AuthorDirectory, date_format: &str) -> Self {
        Self {
            db,
            authors,
            date_format: date_format.to_string(),
            write_lock: Mutex::new(()),
        }
    }

    /// 新快照优先；已加载过的快照只在本地数据不可用时用于恢复，最后写入种子文章
    pub async fn bootstrap(&self, snapshot_path: &Path) -> Result<LoadSource> {
        let _guard = self.write_lock.lock().await;

        let snapshot = self.read_snapshot(snapshot_path).await;
        if let Some((records, fingerprint)) = &snapshot {
            let applied = self.db.get(SNAPSHOT_FINGERPRINT_KEY).await?;
            if applied.as_deref() != Some(fingerprint.as_str()) {
                info!("从快照加载 {} 篇文章: {}", records.len(), snapshot_path.display());
                self.write(records).await?;
                self.db.put(SNAPSHOT_FINGERPRINT_KEY, fingerprint).await?;
                return Ok(LoadSource::Snapshot);
            }
            debug!("快照已加载过，跳过: {}", snapshot_path.display());
        }

        if let Some(raw) = self.db.get(ARTICLES_KEY).await? {
            match validate_collection(&raw) {
                CollectionSchema::Valid(records) if !records.is_empty() => {
                    info!("从本地数据加载 {} 篇文章", records.len());
                    return Ok(LoadSource::Local);
                }
                CollectionSchema::Valid(_) => {
                    info!("本地文章集合为空");
                }
                CollectionSchema::Legacy(items) if !items.is_empty() => {
                    warn!("检测到旧版数据，迁移 {} 篇文章", items.len());
                    let records = migrate_legacy(items, &self.authors);
                    self.write(&records).await?;
                    return Ok(LoadSource::Migrated);
                }
                CollectionSchema::Legacy(_) => {}
                CollectionSchema::Corrupt(reason) => {
                    warn!("本地数据已损坏 ({})，原始内容备份到 {}", reason, CORRUPT_ARTICLES_KEY);
                    self.db.put(CORRUPT_ARTICLES_KEY, &raw).await?;
                }
            }
        }

        if let Some((records, _)) = snapshot {
            info!("本地数据不可用，从快照恢复 {} 篇文章", records.len());
            self.write(&records).await?;
            return Ok(LoadSource::Snapshot);
        }

        let date_label = chrono::Local::now().format(&self.date_format).to_string();
        let seed = seed_article(self.authors.resolve(crate::storage::Category::Tech), &date_label);
        self.write(&[seed]).await?;
        info!("写入种子文章");
        Ok(LoadSource::Seed)
    }

    /// 返回快照中的文章及其内容指纹
    async fn read_snapshot(&self, path: &Path) -> Option<(Vec<ArticleRecord>, String)> {
        let raw = tokio::fs::read_to_string(path).await.ok()?;
        let records = match validate_collection(&raw) {
            CollectionSchema::Valid(records) if !records.is_empty() => records,
            CollectionSchema::Legacy(items) if !items.is_empty() => migrate_legacy(items, &self.authors),
            CollectionSchema::Corrupt(reason) => {
                warn!("快照无效，忽略 {}: {}", path.display(), reason);
                return None;
            }
            _ => return None,
        };
        let fingerprint = format!("{:x}", Sha256::digest(raw.as_bytes()));
        Some((records, fingerprint))
    }

    async fn read(&self) -> Result<Vec<ArticleRecord>> {
        let Some(raw) = self.db.get(ARTICLES_KEY).await? else {
            return Ok(Vec::new());
        };
        match validate_collection(&raw) {
            CollectionSchema::Valid(records) => Ok(records),
            CollectionSchema::Legacy(legacy) => Ok(migrate_legacy(legacy, &self.authors)),
            CollectionSchema::Corrupt(reason) => bail!("文章集合已损坏: {}", reason),
        }
    }

    async fn write(&self, records: &[ArticleRecord]) -> Result<()> {
        let raw = serde_json::to_string(records)?;
        self.db.put(ARTICLES_KEY, &raw).await
    }
}

#[async_trait]
impl ArticleStore for SqliteArticleStore {
    async fn append_article(&self, record: ArticleRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read().await?;
        records.insert(0, record);
        self.write(&records).await
    }

    async fn list_articles(&self) -> Result<Vec<ArticleRecord>> {
        self.read().await
    }

    async fn remove_article(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.read().await?;
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Ok(false);
        }
        self.write(&records).await?;
        Ok(true)
    }

    async fn replace_all(&self, records: Vec<ArticleRecord>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.write(&records).await
    }
}

pub struct SqliteStatistics {
    db: Database,
    write_lock: Mutex<()>,
}

impl SqliteStatistics {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            write_lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<Stats> {
        match self.db.get(STATS_KEY).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(stats) => Ok(stats),
                Err(e) => {
                    warn!("统计数据无法解析，重新计数: {}", e);
                    Ok(Stats::default())
                }
            },
            None => Ok(Stats::default()),
        }
    }
}

#[async_trait]
impl Statistics for SqliteStatistics {
    async fn increment_posts_generated(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let mut stats = self.read().await?;
        stats.posts_generated += 1;
        self.db.put(STATS_KEY, &serde_json::to_string(&stats)?).await?;
        Ok(stats.posts_generated)
    }

    async fn snapshot(&self) -> Result<Stats> {
        self.read().await
    }
}
