use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;

use super::models::{ArticleRecord, Author, Category};
use crate::config::AuthorDirectory;

/// 持久化集合的校验结果
#[derive(Debug)]
pub enum CollectionSchema {
    Valid(Vec<ArticleRecord>),
    /// 至少一项是旧版记录，可与新版记录混合
    Legacy(Vec<StoredArticle>),
    Corrupt(String),
}

/// 集合中的单条记录
#[derive(Debug, Clone)]
pub enum StoredArticle {
    Current(ArticleRecord),
    /// author 字段是纯字符串
    Legacy(LegacyArticle),
}

/// 旧版文章记录
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyArticle {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub excerpt: String,
    #[serde(default)]
    pub content: String,
    pub category: Category,
    #[serde(default)]
    pub image_url: String,
    pub author: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub read_time: String,
    #[serde(default)]
    pub views: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub citations: BTreeSet<String>,
}

pub fn validate_collection(raw: &str) -> CollectionSchema {
    let value: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => return CollectionSchema::Corrupt(format!("不是合法的JSON: {}", e)),
    };

    let Value::Array(items) = value else {
        return CollectionSchema::Corrupt("顶层不是数组".to_string());
    };

    let mut stored = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        let legacy = item.get("author").map(Value::is_string).unwrap_or(false);
        let parsed = if legacy {
            serde_json::from_value(item).map(StoredArticle::Legacy)
        } else {
            serde_json::from_value(item).map(StoredArticle::Current)
        };
        match parsed {
            Ok(article) => stored.push(article),
            Err(e) => return CollectionSchema::Corrupt(format!("第 {} 项字段不匹配: {}", index, e)),
        }
    }

    if stored.iter().any(|a| matches!(a, StoredArticle::Legacy(_))) {
        return CollectionSchema::Legacy(stored);
    }
    CollectionSchema::Valid(
        stored
            .into_iter()
            .filter_map(|a| match a {
                StoredArticle::Current(record) => Some(record),
                StoredArticle::Legacy(_) => None,
            })
            .collect(),
    )
}

/// 逐条迁移：旧版记录的作者字符串作为姓名，其余作者信息取分类的默认作者；新版记录原样保留
pub fn migrate_legacy(items: Vec<StoredArticle>, authors: &AuthorDirectory) -> Vec<ArticleRecord> {
    items
        .into_iter()
        .map(|item| match item {
            StoredArticle::Current(record) => record,
            StoredArticle::Legacy(legacy) => migrate_one(legacy, authors),
        })
        .collect()
}

fn migrate_one(legacy: LegacyArticle, authors: &AuthorDirectory) -> ArticleRecord {
    let default_author = authors.resolve(legacy.category);
    let author = Author {
        name: legacy.author,
        ..default_author.clone()
    };
    ArticleRecord {
        id: legacy.id,
        title: legacy.title,
        excerpt: legacy.excerpt,
        content_html: legacy.content,
        category: legacy.category,
        image_url: legacy.image_url,
        author,
        published_date_label: legacy.date,
        read_time_label: legacy.read_time,
        view_count: legacy.views,
        tags: legacy.tags,
        citations: legacy.citations,
    }
}
