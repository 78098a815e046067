pub mod gemini;
pub mod retry;

pub use gemini::GeminiBackend;
pub use retry::RetryPolicy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

use crate::config::RetrySettings;
use crate::storage::models::Category;
use crate::utils::GenerationError;

/// 第一阶段：热点话题
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub topic: String,
    pub context: String,
}

/// 第二阶段：文章草稿
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DraftResult {
    pub title: String,
    pub excerpt: String,
    pub content_html: String,
    pub tags: Vec<String>,
    pub read_time_label: String,
    pub citations: BTreeSet<String>,
    pub image_prompt: String,
}

/// 模型返回的草稿及其检索引用，合并前的原始形态
#[derive(Debug, Clone, Default)]
pub struct DraftResponse {
    pub title: String,
    pub excerpt: String,
    pub content_html: String,
    pub tags: Vec<String>,
    pub read_time_label: String,
    pub image_prompt: String,
    /// 模型在 JSON 中显式给出的引用
    pub citations: Vec<String>,
    /// 检索元数据里的引用链接
    pub grounding_urls: Vec<String>,
}

/// 远程生成服务的三个调用，每次调用只做一次请求
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// 凭据是否可用；不可用时不应发起任何请求
    fn is_configured(&self) -> bool;

    async fn trending_topic(&self, category: Category) -> Result<TrendResult, GenerationError>;

    async fn draft(
        &self,
        topic: &str,
        context: &str,
        category: Category,
    ) -> Result<DraftResponse, GenerationError>;

    /// 返回 data URL 或图片引用
    async fn cover_image(&self, prompt: &str) -> Result<String, GenerationError>;
}

/// 合并显式引用与检索引用，去重且与顺序无关
pub fn merge_citations<I, J>(explicit: I, grounding: J) -> BTreeSet<String>
where
    I: IntoIterator<Item = String>,
    J: IntoIterator<Item = String>,
{
    explicit
        .into_iter()
        .chain(grounding)
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// 封面生成失败时的占位图
pub fn placeholder_image_url(fallback_topic: &str) -> String {
    let topic = fallback_topic.trim();
    let seed = if topic.is_empty() {
        rand::random::<u32>().to_string()
    } else {
        urlencoding::encode(topic).into_owned()
    };
    format!("https://picsum.photos/seed/{}/800/450", seed)
}

/// 在后端之上加重试与各调用自己的降级策略
pub struct GenerationClient<B> {
    backend: B,
    trend_retry: RetryPolicy,
    draft_retry: RetryPolicy,
    image_retry: RetryPolicy,
}

impl<B: GenerationBackend> GenerationClient<B> {
    pub fn new(backend: B, retry: &RetrySettings) -> Self {
        Self {
            backend,
            trend_retry: retry.trend.into(),
            draft_retry: retry.draft.into(),
            image_retry: retry.image.into(),
        }
    }

    /// 三个调用使用同一个重试策略
    pub fn with_policy(backend: B, policy: RetryPolicy) -> Self {
        Self {
            backend,
            trend_retry: policy,
            draft_retry: policy,
            image_retry: policy,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.backend.is_configured()
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }

    fn ensure_configured(&self) -> Result<(), GenerationError> {
        if self.backend.is_configured() {
            Ok(())
        } else {
            Err(GenerationError::Configuration("API key 未配置".to_string()))
        }
    }

    /// 永不失败：出错时返回 "<分类> News"
    pub async fn find_trending_topic(&self, category: Category) -> TrendResult {
        let result = match self.ensure_configured() {
            Ok(()) => {
                self.trend_retry
                    .run("trend", || self.backend.trending_topic(category))
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(trend) if !trend.topic.trim().is_empty() => trend,
            Ok(_) => {
                info!("热点话题为空，使用默认话题");
                fallback_trend(category)
            }
            Err(e) => {
                info!("获取热点话题失败，使用默认话题: {}", e);
                fallback_trend(category)
            }
        }
    }

    /// 失败会向上传递，本周期无法继续
    pub async fn draft_article(
        &self,
        topic: &str,
        context: &str,
        category: Category,
    ) -> Result<DraftResult, GenerationError> {
        self.ensure_configured()?;

        let response = self
            .draft_retry
            .run("draft", || self.backend.draft(topic, context, category))
            .await?;

        let citations = merge_citations(response.citations, response.grounding_urls);
        info!("草稿完成，引用 {} 条", citations.len());

        Ok(DraftResult {
            title: response.title,
            excerpt: response.excerpt,
            content_html: response.content_html,
            tags: response.tags,
            read_time_label: response.read_time_label,
            citations,
            image_prompt: response.image_prompt,
        })
    }

    /// 永不失败：出错时返回由话题派生的占位图
    pub async fn synthesize_cover_image(&self, prompt: &str, fallback_topic: &str) -> String {
        let result = match self.ensure_configured() {
            Ok(()) => {
                self.image_retry
                    .run("image", || self.backend.cover_image(prompt))
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(url) if !url.trim().is_empty() => url,
            Ok(_) => placeholder_image_url(fallback_topic),
            Err(e) => {
                info!("封面生成失败，使用占位图: {}", e);
                placeholder_image_url(fallback_topic)
            }
        }
    }
}

fn fallback_trend(category: Category) -> TrendResult {
    TrendResult {
        topic: format!("{} News", category.label()),
        context: "General update".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    /// 每个调用按预设顺序返回结果
    struct ScriptedBackend {
        configured: bool,
        /// 依次返回的失败状态码
        trend_failures: Vec<u16>,
        draft_failures: Vec<u16>,
        image_fails: bool,
        calls: AtomicU32,
    }

    impl ScriptedBackend {
        fn ok() -> Self {
            Self {
                configured: true,
                trend_failures: Vec::new(),
                draft_failures: Vec::new(),
                image_fails: false,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        fn is_configured(&self) -> bool {
            self.configured
        }

        async fn trending_topic(&self, _category: Category) -> Result<TrendResult, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.trend_failures.get(n) {
                Some(&status) => Err(scripted_error(status)),
                None => Ok(TrendResult {
                    topic: "X".into(),
                    context: "Y".into(),
                }),
            }
        }

        async fn draft(
            &self,
            topic: &str,
            _context: &str,
            _category: Category,
        ) -> Result<DraftResponse, GenerationError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            match self.draft_failures.get(n) {
                Some(&status) => Err(scripted_error(status)),
                None => Ok(DraftResponse {
                    title: format!("About {}", topic),
                    citations: vec!["https://a.example".into(), "https://b.example".into()],
                    grounding_urls: vec!["https://b.example".into(), "https://c.example".into()],
                    ..Default::default()
                }),
            }
        }

        async fn cover_image(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.image_fails {
                Err(GenerationError::Other("blocked".into()))
            } else {
                Ok("data:image/png;base64,AAAA".into())
            }
        }
    }

    fn client(backend: ScriptedBackend) -> GenerationClient<ScriptedBackend> {
        GenerationClient::with_policy(backend, RetryPolicy::new(3, Duration::from_millis(10)))
    }

    fn scripted_error(status: u16) -> GenerationError {
        match status {
            429 => GenerationError::RateLimited("429".into()),
            503 => GenerationError::Unavailable("503".into()),
            _ => GenerationError::Other(format!("{} Bad Request", status)),
        }
    }

    #[test]
    fn citation_merge_is_deduplicated_and_order_independent() {
        let explicit = vec!["https://a".to_string(), "https://b".to_string()];
        let grounding = vec!["https://b".to_string(), " https://c ".to_string(), "".to_string()];

        let merged = merge_citations(explicit.clone(), grounding.clone());
        assert_eq!(merged.len(), 3);

        let reversed = merge_citations(grounding, explicit);
        assert_eq!(merged, reversed);

        let again = merge_citations(merged.clone(), Vec::new());
        assert_eq!(again, merged);
    }

    #[test]
    fn placeholder_is_derived_from_topic() {
        assert_eq!(
            placeholder_image_url("AI chips"),
            "https://picsum.photos/seed/AI%20chips/800/450"
        );
        assert_eq!(placeholder_image_url("AI chips"), placeholder_image_url("AI chips"));

        let random = placeholder_image_url("  ");
        assert!(random.starts_with("https://picsum.photos/seed/"));
        assert!(random.ends_with("/800/450"));
    }

    #[tokio::test(start_paused = true)]
    async fn trend_falls_back_after_exhausted_retries() {
        let mut backend = ScriptedBackend::ok();
        backend.trend_failures = vec![429, 503, 429];
        let client = client(backend);

        let trend = client.find_trending_topic(Category::Cinema).await;
        assert_eq!(trend.topic, format!("{} News", Category::Cinema.label()));
        assert_eq!(trend.context, "General update");
        assert_eq!(client.backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn trend_recovers_after_one_rate_limit() {
        let mut backend = ScriptedBackend::ok();
        backend.trend_failures = vec![429];
        let client = client(backend);

        let trend = client.find_trending_topic(Category::Tech).await;
        assert_eq!(trend.topic, "X");
    }

    #[tokio::test]
    async fn draft_error_propagates_with_upstream_message() {
        let mut backend = ScriptedBackend::ok();
        backend.draft_failures = vec![400];
        let client = client(backend);

        let err = client.draft_article("X", "Y", Category::Tech).await.unwrap_err();
        assert_eq!(err.to_string(), "400 Bad Request");
        assert_eq!(client.backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn draft_merges_citations() {
        let client = client(ScriptedBackend::ok());
        let draft = client.draft_article("X", "Y", Category::Tech).await.unwrap();
        assert_eq!(draft.title, "About X");
        let citations: Vec<&str> = draft.citations.iter().map(String::as_str).collect();
        assert_eq!(citations, ["https://a.example", "https://b.example", "https://c.example"]);
    }

    #[tokio::test]
    async fn image_failure_returns_placeholder() {
        let mut backend = ScriptedBackend::ok();
        backend.image_fails = true;
        let client = client(backend);

        let url = client.synthesize_cover_image("P", "X").await;
        assert_eq!(url, "https://picsum.photos/seed/X/800/450");
    }

    /// 统计 WARN 及以上级别的事件
    struct WarnCounter(Arc<AtomicU32>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for WarnCounter {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
            if *event.metadata().level() <= tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test]
    async fn degraded_results_are_logged_as_info_only() {
        let warnings = Arc::new(AtomicU32::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(warnings.clone()));
        let _guard = tracing::subscriber::set_default(subscriber);

        let mut backend = ScriptedBackend::ok();
        backend.trend_failures = vec![400];
        backend.image_fails = true;
        let client = client(backend);

        let trend = client.find_trending_topic(Category::Tech).await;
        assert!(trend.topic.ends_with("News"));
        let url = client.synthesize_cover_image("P", "X").await;
        assert!(url.starts_with("https://picsum.photos/"));

        assert_eq!(warnings.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_credentials_never_reach_backend() {
        let mut backend = ScriptedBackend::ok();
        backend.configured = false;
        let client = client(backend);

        let err = client.draft_article("X", "Y", Category::Tech).await.unwrap_err();
        assert!(matches!(err, GenerationError::Configuration(_)));

        let trend = client.find_trending_topic(Category::Tech).await;
        assert!(trend.topic.ends_with("News"));
        let url = client.synthesize_cover_image("P", "X").await;
        assert!(url.starts_with("https://picsum.photos/"));

        assert_eq!(client.backend.calls.load(Ordering::SeqCst), 0);
    }
}
