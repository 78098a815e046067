use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::OnceLock;
use tracing::{debug, info, warn};

use super::{DraftResponse, GenerationBackend, TrendResult};
use crate::config::GeneratorConfig;
use crate::storage::models::Category;
use crate::utils::GenerationError;

/// generateContent 请求体
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<Value>,
}

#[derive(Serialize, Deserialize, Default)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    file_uri: String,
}

/// generateContent 响应体
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    grounding_metadata: Option<GroundingMetadata>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GroundingMetadata {
    #[serde(default)]
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Deserialize)]
struct GroundingChunk {
    #[serde(default)]
    web: Option<WebSource>,
}

#[derive(Deserialize)]
struct WebSource {
    #[serde(default)]
    uri: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

/// 模型按 schema 返回的草稿 JSON
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DraftPayload {
    title: String,
    excerpt: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
    read_time: String,
    #[serde(default)]
    citations: Vec<String>,
    #[serde(default)]
    image_prompt: String,
}

/// Gemini REST 后端
pub struct GeminiBackend {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl GeminiBackend {
    pub fn new(config: GeneratorConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout());

        if !config.proxy.is_empty() {
            match reqwest::Proxy::all(&config.proxy) {
                Ok(proxy) => {
                    info!("使用代理: {}", config.proxy);
                    builder = builder.proxy(proxy);
                }
                Err(e) => {
                    warn!("代理配置无效 '{}': {}", config.proxy, e);
                }
            }
        }

        let client = builder.build()?;
        Ok(Self { client, config })
    }

    async fn generate(
        &self,
        model: &str,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, GenerationError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            model
        );
        debug!("请求 {}", url);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_failure(status.as_u16(), &body));
        }

        let text = response.text().await?;
        Ok(serde_json::from_str(&text)?)
    }

    fn trend_prompt(&self, category: Category) -> String {
        format!(
            "Find a currently trending, specific topic or news story in {region} regarding \"{category}\".\n\
             Return only the topic headline and a brief 1-sentence context.\n\
             Do not hallucinate. Use Google Search to find real, recent trends.",
            region = self.config.region,
            category = category.label(),
        )
    }

    fn draft_prompt(&self, topic: &str, context: &str, category: Category) -> String {
        format!(
            "Write a high-quality, engaging blog post in {language} about: \"{topic}\".\n\
             Context: {context}.\n\
             Category: {category}.\n\n\
             Requirements:\n\
             - Language: {language}.\n\
             - Tone: Professional, engaging, magazine-style.\n\
             - Structure: Use HTML tags (<h2>, <h3>, <p>, <ul>, <li>).\n\
             - SEO: Optimize for search engines.\n\
             - Length: Detailed (approx 400-600 words).\n\
             - Citations: If you use the search tool, include source URLs in the separate 'citations' array field.\n\
             - Image Prompt: Create a detailed, highly visual, ENGLISH prompt for an AI image generator \
             to create a photorealistic cover image for this article. Describe lighting, subject, and style \
             (e.g. \"Cinematic shot of...\"). No text in the image.",
            language = self.config.language,
            topic = topic,
            context = context,
            category = category.label(),
        )
    }
}

#[async_trait]
impl GenerationBackend for GeminiBackend {
    fn is_configured(&self) -> bool {
        self.config.is_configured()
    }

    async fn trending_topic(&self, category: Category) -> Result<TrendResult, GenerationError> {
        let request = GenerateRequest {
            contents: vec![user_text(self.trend_prompt(category))],
            tools: vec![json!({ "googleSearch": {} })],
            generation_config: Some(json!({
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "topic": { "type": "STRING" },
                        "context": { "type": "STRING" }
                    },
                    "required": ["topic", "context"]
                }
            })),
        };

        let response = self.generate(&self.config.text_model, &request).await?;
        parse_trend(&candidate_text(&response)?)
    }

    async fn draft(
        &self,
        topic: &str,
        context: &str,
        category: Category,
    ) -> Result<DraftResponse, GenerationError> {
        let request = GenerateRequest {
            contents: vec![user_text(self.draft_prompt(topic, context, category))],
            tools: vec![json!({ "googleSearch": {} })],
            generation_config: Some(json!({
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "title": { "type": "STRING", "description": "Catchy title" },
                        "excerpt": { "type": "STRING", "description": "2 sentence summary for meta description" },
                        "content": { "type": "STRING", "description": "Full HTML content" },
                        "tags": { "type": "ARRAY", "items": { "type": "STRING" } },
                        "readTime": { "type": "STRING", "description": "Estimated reading time" },
                        "citations": { "type": "ARRAY", "items": { "type": "STRING" } },
                        "imagePrompt": { "type": "STRING", "description": "Detailed image generation prompt in English" }
                    },
                    "required": ["title", "excerpt", "content", "tags", "readTime", "imagePrompt"]
                }
            })),
        };

        let response = self.generate(&self.config.text_model, &request).await?;
        let text = candidate_text(&response)?;
        parse_draft(&text, grounding_urls(&response))
    }

    async fn cover_image(&self, prompt: &str) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            contents: vec![user_text(prompt.to_string())],
            tools: Vec::new(),
            generation_config: Some(json!({
                "responseModalities": ["IMAGE"],
                "imageConfig": { "aspectRatio": "16:9" }
            })),
        };

        let response = self.generate(&self.config.image_model, &request).await?;
        image_from_response(&response)
    }
}

fn user_text(text: String) -> Content {
    Content {
        role: Some("user".to_string()),
        parts: vec![Part {
            text: Some(text),
            ..Default::default()
        }],
    }
}

/// 按 HTTP 状态和错误体中的 status 字段分类
fn classify_failure(status: u16, body: &str) -> GenerationError {
    let (message, upstream_status) = match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => (envelope.error.message, envelope.error.status),
        Err(_) => (body.chars().take(300).collect(), String::new()),
    };
    let message = format!("API 返回错误 {}: {}", status, message);

    match (status, upstream_status.as_str()) {
        (429, _) | (_, "RESOURCE_EXHAUSTED") => GenerationError::RateLimited(message),
        (500 | 502 | 503 | 504, _) | (_, "UNAVAILABLE") => GenerationError::Unavailable(message),
        _ => GenerationError::Other(message),
    }
}

fn first_candidate(response: &GenerateResponse) -> Result<&Candidate, GenerationError> {
    response.candidates.first().ok_or_else(|| {
        let reason = response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.clone())
            .unwrap_or_else(|| "no candidates".to_string());
        GenerationError::Other(format!("模型没有返回结果: {}", reason))
    })
}

/// 拼接第一个候选的全部文本
fn candidate_text(response: &GenerateResponse) -> Result<String, GenerationError> {
    let candidate = first_candidate(response)?;
    let text: String = candidate
        .content
        .iter()
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect();

    if text.trim().is_empty() {
        let reason = candidate.finish_reason.as_deref().unwrap_or("UNKNOWN");
        return Err(GenerationError::Other(format!("模型返回空文本 (finishReason={})", reason)));
    }
    Ok(text)
}

fn grounding_urls(response: &GenerateResponse) -> Vec<String> {
    response
        .candidates
        .first()
        .and_then(|c| c.grounding_metadata.as_ref())
        .map(|m| {
            m.grounding_chunks
                .iter()
                .filter_map(|chunk| chunk.web.as_ref().and_then(|w| w.uri.clone()))
                .collect()
        })
        .unwrap_or_default()
}

fn image_from_response(response: &GenerateResponse) -> Result<String, GenerationError> {
    let candidate = first_candidate(response)?;
    for part in candidate.content.iter().flat_map(|c| c.parts.iter()) {
        if let Some(inline) = &part.inline_data {
            if !inline.data.is_empty() {
                return Ok(format!("data:{};base64,{}", inline.mime_type, inline.data));
            }
        }
        if let Some(file) = &part.file_data {
            if !file.file_uri.is_empty() {
                return Ok(file.file_uri.clone());
            }
        }
    }
    Err(GenerationError::Other("响应中没有图片数据".to_string()))
}

/// 启用检索工具时模型有时会把 JSON 包在代码块里
fn strip_code_fence(text: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*(.*?)\s*```\s*$").expect("代码块正则无效")
    });
    match fence.captures(text).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => text.trim(),
    }
}

fn parse_trend(text: &str) -> Result<TrendResult, GenerationError> {
    Ok(serde_json::from_str(strip_code_fence(text))?)
}

fn parse_draft(text: &str, grounding_urls: Vec<String>) -> Result<DraftResponse, GenerationError> {
    let payload: DraftPayload = serde_json::from_str(strip_code_fence(text))?;
    Ok(DraftResponse {
        title: payload.title,
        excerpt: payload.excerpt,
        content_html: payload.content,
        tags: payload.tags,
        read_time_label: payload.read_time,
        image_prompt: payload.image_prompt,
        citations: payload.citations,
        grounding_urls,
    })
}
