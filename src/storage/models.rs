use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// 内容分类。序列化为英文标识，读取时兼容站点使用的波斯语标签。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    #[serde(alias = "تکنولوژی")]
    Tech,
    #[serde(alias = "سینما و هنر")]
    Cinema,
    #[serde(alias = "بازی\u{200c}های ویدیویی")]
    Games,
    #[serde(alias = "آشپزی")]
    Cooking,
    #[serde(alias = "گردشگری")]
    Tourism,
    #[serde(alias = "علمی")]
    Science,
}

impl Category {
    /// 固定顺序，加权选择按此顺序累加
    pub const ALL: [Category; 6] = [
        Category::Tech,
        Category::Cinema,
        Category::Games,
        Category::Cooking,
        Category::Tourism,
        Category::Science,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Category::Tech => "tech",
            Category::Cinema => "cinema",
            Category::Games => "games",
            Category::Cooking => "cooking",
            Category::Tourism => "tourism",
            Category::Science => "science",
        }
    }

    /// 站点上显示的标签
    pub fn label(self) -> &'static str {
        match self {
            Category::Tech => "تکنولوژی",
            Category::Cinema => "سینما و هنر",
            Category::Games => "بازی\u{200c}های ویدیویی",
            Category::Cooking => "آشپزی",
            Category::Tourism => "گردشگری",
            Category::Science => "علمی",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Category::ALL
            .into_iter()
            .find(|c| c.id().eq_ignore_ascii_case(s) || c.label() == s)
            .ok_or_else(|| anyhow::anyhow!("未知分类: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: String,
    pub name: String,
    pub role: String,
    #[serde(rename = "avatar")]
    pub avatar_url: String,
}

/// 持久化的文章记录，字段名与站点的 posts.json 保持一致
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleRecord {
    pub id: String,
    pub title: String,
    pub excerpt: String,
    #[serde(rename = "content")]
    pub content_html: String,
    pub category: Category,
    pub image_url: String,
    /// 生成时作者信息的快照
    pub author: Author,
    #[serde(rename = "date")]
    pub published_date_label: String,
    #[serde(rename = "readTime")]
    pub read_time_label: String,
    #[serde(rename = "views", default)]
    pub view_count: u64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub citations: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Stats {
    pub total_views: u64,
    pub total_revenue: f64,
    pub posts_generated: u64,
}

/// 没有任何数据来源时写入的欢迎文章
pub fn seed_article(author: &Author, date_label: &str) -> ArticleRecord {
    ArticleRecord {
        id: "seed-1".to_string(),
        title: "خوش آمدید به فارسی هاب".to_string(),
        excerpt: "این اولین پست آزمایشی سیستم تولید محتوای خودکار است.".to_string(),
        content_html: "<p>این سیستم به صورت خودکار اخبار و مقالات جذاب تولید می\u{200c}کند.</p>"
            .to_string(),
        category: Category::Tech,
        image_url: "https://picsum.photos/seed/tech/800/400".to_string(),
        author: author.clone(),
        published_date_label: date_label.to_string(),
        read_time_label: "۱ دقیقه".to_string(),
        view_count: 0,
        tags: vec!["هوش مصنوعی".to_string(), "آغاز".to_string()],
        citations: BTreeSet::new(),
    }
}
