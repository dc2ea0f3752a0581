//! Pain point summaries via a hosted LLM.
//!
//! The core only sees the [`LanguageModel`] trait. [`GeminiClient`] is the
//! production implementation; failures from it propagate to the caller
//! untouched, with no retry or backoff here.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tera::Tera;
use tracing::{debug, info};

use super::model::{ClusterAssignment, ClusterLabel, PainPointSummaries, PainPointSummary, Posts};

pub const EMPTY_CLUSTER_SUMMARY: &str = "No posts in this cluster.";

const GEMINI_ENDPOINT: &str = "https://generativelanguage.googleapis.com/v1beta";
const SUMMARY_TEMPLATE_NAME: &str = "summary_prompt.txt";
const SUMMARY_TEMPLATE: &str = r#"You are an expert Product Manager AI assistant. Summarise the following Reddit posts into a concise pain point summary.

Posts:
{% for post in posts -%}
{{ post }}
{% endfor %}
Instructions:
- Identify the core pain point(s) expressed in these posts.
- Summarise clearly in 2-3 sentences.
- Do NOT mention Reddit or posts. Only output the pain point summary.

Summary:
"#;

/// Single-prompt text completion.
pub trait LanguageModel {
    fn model_name(&self) -> &str;

    fn complete(&self, prompt: &str) -> Result<String>;
}

/// Google Gemini `generateContent` over blocking HTTP.
pub struct GeminiClient {
    model: String,
    api_key: String,
    endpoint: String,
    client: reqwest::blocking::Client,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()?;
        Ok(Self {
            model: model.into(),
            api_key: api_key.into(),
            endpoint: GEMINI_ENDPOINT.to_string(),
            client,
        })
    }

    /// Build a client with the key from `GOOGLE_API_KEY`.
    pub fn from_env(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| anyhow!("GOOGLE_API_KEY environment variable not set"))?;
        Self::new(model, api_key)
    }

    /// Point the client at a different base URL.
    pub fn with_endpoint(self, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..self
        }
    }
}

impl LanguageModel for GeminiClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/models/{}:generateContent", self.endpoint, self.model);
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![RequestPart { text: prompt }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .query(&[("key", &self.api_key)])
            .json(&body)
            .send()
            .with_context(|| format!("POST {}", url))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            bail!("Gemini API error {}: {}", status, text);
        }

        let parsed: GenerateResponse = response.json().context("decoding Gemini response")?;
        let text = parsed
            .candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| anyhow!("Gemini returned no candidates"))?;
        Ok(text.trim().to_string())
    }
}

/// Turns each cluster's posts into a pain point summary, one LLM call per
/// populated cluster, sequentially.
pub struct Summarizer<'a, L: LanguageModel + ?Sized> {
    llm: &'a L,
    templates: Tera,
}

impl<'a, L: LanguageModel + ?Sized> Summarizer<'a, L> {
    pub fn new(llm: &'a L) -> Result<Self> {
        let mut templates = Tera::default();
        templates
            .add_raw_template(SUMMARY_TEMPLATE_NAME, SUMMARY_TEMPLATE)
            .context("compiling summary prompt")?;
        Ok(Self { llm, templates })
    }

    pub fn prompt(&self, texts: &[String]) -> Result<String> {
        let mut ctx = tera::Context::new();
        ctx.insert("posts", texts);
        self.templates
            .render(SUMMARY_TEMPLATE_NAME, &ctx)
            .context("rendering summary prompt")
    }

    /// Summarise one cluster's texts. Empty input never reaches the LLM.
    pub fn summarize_cluster(&self, label: ClusterLabel, texts: &[String]) -> Result<String> {
        if texts.is_empty() {
            return Ok(EMPTY_CLUSTER_SUMMARY.to_string());
        }
        info!(
            cluster = label.display_id(),
            posts = texts.len(),
            model = self.llm.model_name(),
            "summarising cluster"
        );
        let summary = self
            .llm
            .complete(&self.prompt(texts)?)
            .with_context(|| format!("summarising cluster {}", label.display_id()))?;
        debug!(cluster = label.display_id(), %summary, "cluster summary");
        Ok(summary)
    }

    /// Summaries for every label in `0..k`, including reserved empty ones.
    pub fn summarize_all(
        &self,
        posts: &Posts,
        assignment: &ClusterAssignment,
    ) -> Result<PainPointSummaries> {
        assignment
            .all_labels()
            .map(|label| {
                let texts: Vec<String> = assignment
                    .members(label)
                    .into_iter()
                    .map(|i| posts[i].cleaned_text.clone())
                    .collect();
                Ok(PainPointSummary {
                    cluster_label: label,
                    num_posts: texts.len(),
                    summary_text: self.summarize_cluster(label, &texts)?,
                })
            })
            .collect()
    }
}
