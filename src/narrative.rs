//! Narrative-generation collaborator.
//!
//! The core hands clinical context to an OpenAI-compatible chat endpoint and
//! stores whatever text comes back; it performs no interpretation of the
//! content and no automatic retry.

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};

/// Default timeout for narrative generation (long-form output)
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Cap an error body for logging without splitting a multi-byte character
fn truncate_body(body: &str) -> String {
    body.chars().take(200).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NarrativeKind {
    Summary,
    Insights,
    Evolution,
}

/// Condensed view of one session handed to the collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub date: NaiveDate,
    pub summary: Option<String>,
    pub notes: Option<String>,
    pub insights: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeContext {
    pub patient_name: String,
    pub sessions: Vec<SessionSnapshot>,
    #[serde(default)]
    pub extra_instructions: Option<String>,
}

/// Opaque collaborator output. `content` carries summaries and evolution
/// reports, `insights` the clinical-insight variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NarrativeOutput {
    pub content: Option<String>,
    pub insights: Option<String>,
}

#[async_trait]
pub trait NarrativeGenerator: Send + Sync {
    async fn generate(
        &self,
        kind: NarrativeKind,
        context: &NarrativeContext,
    ) -> CoreResult<NarrativeOutput>;
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// OpenAI-compatible chat message
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

pub struct HttpNarrativeClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl HttpNarrativeClient {
    pub fn new(base_url: &str, model: &str, timeout: Option<Duration>) -> CoreResult<Self> {
        let cleaned_url = base_url.trim_end_matches('/');

        let parsed = reqwest::Url::parse(cleaned_url).map_err(|e| {
            CoreError::external("narrative", format!("invalid URL '{}': {}", cleaned_url, e))
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CoreError::external(
                "narrative",
                format!("URL must use http or https, got {}", parsed.scheme()),
            ));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| {
                CoreError::external("narrative", format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: cleaned_url.to_string(),
            model: model.to_string(),
        })
    }

    /// Build the user prompt for a generation kind
    pub fn build_prompt(kind: NarrativeKind, context: &NarrativeContext) -> String {
        let mut prompt = String::new();

        match kind {
            NarrativeKind::Summary => {
                prompt.push_str(
                    "Escreva um resumo clínico objetivo da sessão abaixo, em português.\n\n",
                );
            }
            NarrativeKind::Insights => {
                prompt.push_str(
                    "Liste insights clínicos relevantes a partir do material da sessão abaixo.\n\n",
                );
            }
            NarrativeKind::Evolution => {
                prompt.push_str(
                    "Escreva um relatório de evolução do paciente a partir das sessões abaixo, \
                     em ordem cronológica, destacando progresso e pontos de atenção.\n\n",
                );
            }
        }

        prompt.push_str(&format!("Paciente: {}\n\n", context.patient_name));

        for session in &context.sessions {
            prompt.push_str(&format!("Sessão de {}:\n", session.date));
            if let Some(ref summary) = session.summary {
                prompt.push_str(&format!("Resumo: {}\n", summary));
            }
            if let Some(ref notes) = session.notes {
                prompt.push_str(&format!("Anotações: {}\n", notes));
            }
            if let Some(ref insights) = session.insights {
                prompt.push_str(&format!("Insights: {}\n", insights));
            }
            prompt.push('\n');
        }

        if let Some(ref extra) = context.extra_instructions {
            prompt.push_str(&format!("Instruções adicionais: {}\n", extra));
        }

        prompt
    }

    fn system_message(kind: NarrativeKind) -> &'static str {
        match kind {
            NarrativeKind::Summary | NarrativeKind::Evolution => {
                "Você é um assistente de documentação clínica. Responda apenas com o texto solicitado."
            }
            NarrativeKind::Insights => {
                "Você é um assistente de documentação clínica. Responda com uma lista de insights, um por linha."
            }
        }
    }
}

#[async_trait]
impl NarrativeGenerator for HttpNarrativeClient {
    async fn generate(
        &self,
        kind: NarrativeKind,
        context: &NarrativeContext,
    ) -> CoreResult<NarrativeOutput> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let prompt = Self::build_prompt(kind, context);

        info!(
            kind = ?kind,
            sessions = context.sessions.len(),
            prompt_chars = prompt.len(),
            "requesting narrative generation"
        );

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: Self::system_message(kind).to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
            stream: false,
        };

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(&request)
            .send()
            .await
            .map_err(|e| CoreError::external("narrative", format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::external(
                "narrative",
                format!("HTTP {}: {}", status, truncate_body(&body)),
            ));
        }

        let completion: ChatCompletionResponse = response.json().await.map_err(|e| {
            CoreError::external("narrative", format!("failed to parse response: {}", e))
        })?;

        let text = completion
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        debug!(kind = ?kind, chars = text.len(), "narrative generation complete");

        let output = match kind {
            NarrativeKind::Insights => NarrativeOutput {
                content: None,
                insights: Some(text),
            },
            _ => NarrativeOutput {
                content: Some(text),
                insights: None,
            },
        };
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn context() -> NarrativeContext {
        NarrativeContext {
            patient_name: "Maria Silva".to_string(),
            sessions: vec![SessionSnapshot {
                date: NaiveDate::from_ymd_opt(2026, 5, 12).unwrap(),
                summary: Some("Sessão produtiva".to_string()),
                notes: Some("Paciente relatou melhora no sono".to_string()),
                insights: None,
            }],
            extra_instructions: None,
        }
    }

    #[test]
    fn test_new_rejects_invalid_url() {
        assert!(HttpNarrativeClient::new("not a url", "gpt", None).is_err());
        assert!(HttpNarrativeClient::new("ftp://server", "gpt", None).is_err());
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let client = HttpNarrativeClient::new("http://localhost:8080/", "gpt", None).unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn test_prompt_includes_patient_and_sessions() {
        let prompt = HttpNarrativeClient::build_prompt(NarrativeKind::Evolution, &context());
        assert!(prompt.contains("Maria Silva"));
        assert!(prompt.contains("2026-05-12"));
        assert!(prompt.contains("melhora no sono"));
    }

    #[test]
    fn test_prompt_varies_by_kind() {
        let summary = HttpNarrativeClient::build_prompt(NarrativeKind::Summary, &context());
        let evolution = HttpNarrativeClient::build_prompt(NarrativeKind::Evolution, &context());
        assert_ne!(summary, evolution);
        assert!(evolution.contains("evolução"));
    }

    #[test]
    fn test_truncate_body_survives_multibyte_boundary() {
        // Byte 200 lands inside a two-byte character
        let body = format!("a{}", "ã".repeat(200));
        let truncated = truncate_body(&body);
        assert_eq!(truncated.chars().count(), 200);
        assert!(body.starts_with(&truncated));
    }

    #[test]
    fn test_response_parsing() {
        let json = serde_json::json!({
            "choices": [{
                "message": { "role": "assistant", "content": "Relatório de evolução..." },
                "finish_reason": "stop"
            }]
        });
        let parsed: ChatCompletionResponse = serde_json::from_value(json).unwrap();
        assert_eq!(
            parsed.choices[0].message.content,
            "Relatório de evolução..."
        );
    }

    #[test]
    fn test_response_parsing_empty_choices() {
        let json = serde_json::json!({ "choices": [] });
        let parsed: ChatCompletionResponse = serde_json::from_value(json).unwrap();
        assert!(parsed.choices.is_empty());
    }
}
