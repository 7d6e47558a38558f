//! 图片合成客户端 - 基础设施层
//!
//! 只暴露"把物体合成到背景上"的能力，不认识批次和任务
//!
//! ## 技术栈
//! - 使用 `reqwest` 调用 Gemini `generateContent` 接口
//! - 图片以 base64 内联数据传输

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ExternalError;
use crate::models::Quality;

/// 外部合成能力
///
/// 任何远程失败、响应格式错误或响应中没有图片都返回 `ExternalError`
#[async_trait]
pub trait Compositor: Send + Sync {
    async fn composite(
        &self,
        object: &[u8],
        background: &[u8],
        prompt: &str,
        quality: Quality,
    ) -> Result<Vec<u8>, ExternalError>;
}

/// 基于 Gemini 图片模型的合成客户端
pub struct GeminiCompositor {
    client: reqwest::Client,
    api_key: String,
    api_base_url: String,
    model_name: String,
}

impl GeminiCompositor {
    /// 创建新的合成客户端
    ///
    /// 请求超时来自配置，保证单个任务最终一定会结束
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("无法创建 HTTP 客户端")?;

        Ok(Self {
            client,
            api_key: config.image_api_key.clone(),
            api_base_url: config.image_api_base_url.trim_end_matches('/').to_string(),
            model_name: config.image_model_name.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.api_base_url, self.model_name
        )
    }

    /// 构建请求体：提示词 + 物体图 + 背景图
    fn build_body(object: &[u8], background: &[u8], prompt: &str, quality: Quality) -> serde_json::Value {
        json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inlineData": { "mimeType": mime_type(object), "data": STANDARD.encode(object) } },
                    { "inlineData": { "mimeType": mime_type(background), "data": STANDARD.encode(background) } }
                ]
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": { "imageSize": quality.hint() }
            }
        })
    }
}

#[async_trait]
impl Compositor for GeminiCompositor {
    async fn composite(
        &self,
        object: &[u8],
        background: &[u8],
        prompt: &str,
        quality: Quality,
    ) -> Result<Vec<u8>, ExternalError> {
        debug!("调用图片合成 API，模型: {}，画质: {}", self.model_name, quality);

        let body = Self::build_body(object, background, prompt, quality);

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!("图片合成请求失败: {}", e);
                ExternalError::new(format!("请求失败: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ExternalError::new(format!(
                "API 返回错误 ({}): {}",
                status.as_u16(),
                crate::utils::logging::truncate_text(&text, 200)
            )));
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ExternalError::new(format!("响应解析失败: {}", e)))?;

        extract_image(parsed)
    }
}

// ========== 响应结构 ==========

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
struct InlineData {
    data: String,
}

/// 取第一个候选结果中的第一张图片
fn extract_image(response: GenerateResponse) -> Result<Vec<u8>, ExternalError> {
    let data = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|content| content.parts.into_iter().find_map(|p| p.inline_data))
        .ok_or_else(|| ExternalError::new("响应中没有图片"))?;

    STANDARD
        .decode(data.data.as_bytes())
        .map_err(|e| ExternalError::new(format!("图片数据解码失败: {}", e)))
}

fn mime_type(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("image/png")
}
