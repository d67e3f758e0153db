//! AI critique of a single file.
//!
//! The model is asked for a JSON verdict. Anything short of that degrades to a
//! fixed `WARN` critique; a critique never fails the job.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::analysis::{ExecOutcome, LintOutcome};
use super::language::Language;
use super::models::{Critique, Verdict};
use crate::config::ModelConfig;
use crate::util::{extract_json_object, truncate_chars};

/// Text-in, text-out access to a language model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Client for the Gemini `generateContent` REST endpoint.
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    temperature: f32,
    max_output_tokens: u32,
}

impl GeminiClient {
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                config.base_url.trim_end_matches('/'),
                config.model
            ),
            api_key: api_key.into(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(&self, prompt: &str) -> Value {
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            "generationConfig": {
                "temperature": self.temperature,
                "maxOutputTokens": self.max_output_tokens,
            }
        })
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

impl GenerateResponse {
    fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        (!text.trim().is_empty()).then_some(text)
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let resp = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await
            .context("Failed to send generateContent request")?
            .error_for_status()
            .context("Model endpoint returned error status")?;

        let body: GenerateResponse = resp
            .json()
            .await
            .context("Failed to parse generateContent response")?;
        body.text().context("Model returned no text")
    }
}

/// What the model gets to see about one file.
#[derive(Debug, Clone, Copy)]
pub struct CritiqueInput<'a> {
    pub path: &'a str,
    pub language: Language,
    pub code: &'a str,
    pub execution: &'a ExecOutcome,
    pub lint: &'a LintOutcome,
}

pub fn build_prompt(input: &CritiqueInput<'_>, excerpt_chars: usize) -> String {
    let excerpt: String = input.code.chars().take(excerpt_chars).collect();
    let mut execution = input.execution.summary();
    if let Some(output) = input.execution.output().filter(|_| input.execution.is_failure()) {
        execution.push_str(&format!("\nError output: {}", truncate_chars(output.trim(), 500)));
    }

    format!(
        r#"Analyze this {language} code file and provide a professional review.

File: {path}
Language: {language}

```{language}
{excerpt}
```

Execution result: {execution}
Linter: {lint}

Provide:
1. Quality score (0-10)
2. Issues (3-5 specific issues, or an empty list)
3. Security concerns (or "None")
4. Best practices (violations or improvements)
5. Verdict (PASS, WARN or FAIL) with a brief reason

Respond with only a JSON object:
{{
    "score": 8,
    "issues": ["issue1", "issue2"],
    "security": "concern or None",
    "best_practices": "recommendation",
    "verdict": "PASS",
    "reason": "brief explanation"
}}"#,
        language = input.language,
        path = input.path,
        excerpt = excerpt,
        execution = execution,
        lint = input.lint.summary(),
    )
}

fn text_field(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn list_field(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() && !s.trim().eq_ignore_ascii_case("none") => {
            vec![s.trim().to_string()]
        }
        _ => Vec::new(),
    }
}

/// Parse the model's reply. `None` when no JSON object can be recovered.
pub fn parse_critique(text: &str) -> Option<Critique> {
    let object = extract_json_object(text)?;
    let value: Value = serde_json::from_str(object).ok()?;
    let map = value.as_object()?;

    let score = match map.get("score") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(5.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(5.0),
        _ => 5.0,
    };
    let verdict = map
        .get("verdict")
        .and_then(Value::as_str)
        .and_then(|v| v.parse().ok())
        .unwrap_or(Verdict::Warn);

    Some(Critique {
        score: score.round().clamp(0.0, 10.0) as u8,
        issues: list_field(map.get("issues")),
        security: text_field(map.get("security")),
        best_practices: text_field(map.get("best_practices")),
        verdict,
        reason: text_field(map.get("reason")),
    })
}

pub fn parse_failure_critique() -> Critique {
    Critique {
        score: 7,
        issues: vec!["AI analysis parsing failed".to_string()],
        security: "Unknown".to_string(),
        best_practices: "Manual review recommended".to_string(),
        verdict: Verdict::Warn,
        reason: "Unable to parse AI response".to_string(),
    }
}

pub fn unavailable_critique(error: &anyhow::Error) -> Critique {
    Critique {
        score: 5,
        issues: vec![format!("AI analysis failed: {}", truncate_chars(&format!("{:#}", error), 200))],
        security: "Unknown".to_string(),
        best_practices: "Manual review required".to_string(),
        verdict: Verdict::Warn,
        reason: "AI unavailable".to_string(),
    }
}

/// Ask the model about one file, falling back instead of failing.
pub async fn critique_file(client: &dyn ModelClient, input: &CritiqueInput<'_>, excerpt_chars: usize) -> Critique {
    let prompt = build_prompt(input, excerpt_chars);
    match client.complete(&prompt).await {
        Ok(text) => parse_critique(&text).unwrap_or_else(|| {
            tracing::warn!(path = input.path, "unparseable critique response");
            parse_failure_critique()
        }),
        Err(e) => {
            tracing::warn!(path = input.path, "critique failed: {:#}", e);
            unavailable_critique(&e)
        }
    }
}
