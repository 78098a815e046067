use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::selector::CategorySelector;
use crate::config::AuthorDirectory;
use crate::generator::{GenerationBackend, GenerationClient};
use crate::storage::models::{ArticleRecord, Category};
use crate::storage::{ArticleStore, Statistics};
use crate::utils::activity::ActivityLog;
use crate::utils::CycleError;

/// 调度器每次触发执行的一个周期
#[async_trait]
pub trait CycleRunner: Send + Sync {
    async fn run_cycle(&self) -> Result<ArticleRecord, CycleError>;
}

/// 选分类 → 热点 → 草稿 → 封面 → 组装并保存
pub struct CycleOrchestrator<B> {
    selector: CategorySelector,
    client: GenerationClient<B>,
    authors: AuthorDirectory,
    store: Arc<dyn ArticleStore>,
    stats: Arc<dyn Statistics>,
    activity: ActivityLog,
    rng: Mutex<StdRng>,
    date_format: String,
}

impl<B: GenerationBackend> CycleOrchestrator<B> {
    pub fn new(
        selector: CategorySelector,
        client: GenerationClient<B>,
        authors: AuthorDirectory,
        store: Arc<dyn ArticleStore>,
        stats: Arc<dyn Statistics>,
        activity: ActivityLog,
    ) -> Self {
        Self {
            selector,
            client,
            authors,
            store,
            stats,
            activity,
            rng: Mutex::new(StdRng::from_entropy()),
            date_format: "%Y/%m/%d".to_string(),
        }
    }

    pub fn with_date_format(mut self, date_format: &str) -> Self {
        self.date_format = date_format.to_string();
        self
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    fn pick_category(&self) -> Category {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        self.selector.pick(&mut *rng)
    }

    /// 记录失败并原样返回
    fn fail(&self, err: CycleError) -> CycleError {
        self.activity.error(format!("❌ Cycle failed: {}", err));
        err
    }

    pub async fn run(&self) -> Result<ArticleRecord, CycleError> {
        if !self.client.is_configured() {
            return Err(self.fail(CycleError::Configuration(
                "API Key missing! Cannot generate.".to_string(),
            )));
        }

        let category = self.pick_category();
        self.activity
            .info(format!("Starting cycle. Category: {}", category.label()));

        // 1. 热点
        self.activity
            .info(format!("🔍 Searching trends for {}...", category.label()));
        let trend = self.client.find_trending_topic(category).await;
        self.activity
            .success(format!("Topic found: \"{}\"", trend.topic));

        // 2. 草稿
        self.activity.info("✍️ Drafting content...");
        let draft = match self
            .client
            .draft_article(&trend.topic, &trend.context, category)
            .await
        {
            Ok(draft) => draft,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.activity
            .success(format!("Content generated: {}", draft.title));

        // 3. 封面
        self.activity.info("🎨 Generating visuals...");
        let visual_prompt = if draft.image_prompt.trim().is_empty() {
            format!("Photorealistic image about {}", trend.topic)
        } else {
            draft.image_prompt.clone()
        };
        let image_url = self
            .client
            .synthesize_cover_image(&visual_prompt, &trend.topic)
            .await;

        // 4. 组装
        let record = ArticleRecord {
            id: uuid::Uuid::new_v4().simple().to_string(),
            title: draft.title,
            excerpt: draft.excerpt,
            content_html: draft.content_html,
            category,
            image_url,
            author: self.authors.resolve(category).clone(),
            published_date_label: chrono::Local::now().format(&self.date_format).to_string(),
            read_time_label: draft.read_time_label,
            view_count: 0,
            tags: draft.tags,
            citations: draft.citations,
        };

        // 5. 保存
        if let Err(e) = self.store.append_article(record.clone()).await {
            return Err(self.fail(CycleError::Storage(e)));
        }
        if let Err(e) = self.stats.increment_posts_generated().await {
            warn!("更新生成计数失败: {}", e);
        }
        self.activity.success("✅ Post published successfully!");

        Ok(record)
    }
}

#[async_trait]
impl<B: GenerationBackend> CycleRunner for CycleOrchestrator<B> {
    async fn run_cycle(&self) -> Result<ArticleRecord, CycleError> {
        self.run().await
    }
}
