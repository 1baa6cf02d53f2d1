use super::{GenerativeOracle, SamplingParams};
use crate::config::AnalysisConfig;
use crate::gcp::{self, GcpAuth};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Gemini via the Vertex AI `generateContent` REST endpoint, authenticated
/// with Application Default Credentials.
pub struct VertexOracle {
    client: reqwest::Client,
    auth: GcpAuth,
    project_id: String,
    region: String,
    model: String,
}

#[derive(Serialize)]
struct VertexRequest {
    contents: Vec<RequestContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct RequestContent {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "topP")]
    top_p: f32,
    #[serde(rename = "topK")]
    top_k: u32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize)]
struct VertexResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<VertexError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct VertexError {
    message: String,
}

impl VertexOracle {
    /// Resolve project/region from config, auto-detecting the project via
    /// gcloud when GCP_PROJECT_ID is not exported.
    pub async fn from_config(
        config: &AnalysisConfig,
        client: reqwest::Client,
        auth: GcpAuth,
    ) -> anyhow::Result<Self> {
        let project_id = match &config.gcp_project_id {
            Some(project) => project.clone(),
            None => gcp::detect_project().await?,
        };
        info!(
            "Initialized Vertex AI: project={}, location={}",
            project_id, config.gcp_region
        );
        Ok(Self {
            client,
            auth,
            project_id,
            region: config.gcp_region.clone(),
            model: config.gemini_model.clone(),
        })
    }
}

#[async_trait]
impl GenerativeOracle for VertexOracle {
    async fn generate(&self, prompt: &str, params: &SamplingParams) -> anyhow::Result<String> {
        let url = format!(
            "https://{region}-aiplatform.googleapis.com/v1/projects/{project}/locations/{region}/publishers/google/models/{model}:generateContent",
            region = self.region,
            project = self.project_id,
            model = self.model,
        );

        let request = VertexRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                top_p: params.top_p,
                top_k: params.top_k,
                max_output_tokens: params.max_output_tokens,
            },
        };

        let token = self.auth.token().await?;
        debug!("Sending prompt to {} ({} chars)", self.model, prompt.len());

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            anyhow::bail!("Vertex AI request failed ({status}): {body}");
        }

        let parsed: VertexResponse = serde_json::from_str(&body)?;
        if let Some(err) = parsed.error {
            anyhow::bail!("Vertex AI error: {}", err.message);
        }

        let text = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            anyhow::bail!("Vertex AI returned no candidates");
        }
        Ok(text)
    }
}
