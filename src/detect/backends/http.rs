//! Remote classifier over HTTP.
//!
//! POSTs the JPEG as `image/jpeg` and expects a JSON body carrying a label list:
//! `{"labels":[{"name":"person","confidence":91.2}]}`. Rekognition-style
//! `{"Labels":[{"Name":..,"Confidence":..}]}` bodies and a bare array are accepted too.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

use crate::detect::backend::Classifier;
use crate::detect::result::LabelScore;

const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct HttpClassifierConfig {
    pub endpoint: String,
    pub timeout: Duration,
    /// Sent as `Authorization: Bearer ...` when present.
    pub token: Option<String>,
}

pub struct HttpClassifier {
    config: HttpClassifierConfig,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ClassifierResponse {
    Wrapped {
        #[serde(alias = "Labels")]
        labels: Vec<LabelScore>,
    },
    Bare(Vec<LabelScore>),
}

impl HttpClassifier {
    pub fn new(config: HttpClassifierConfig) -> Result<Self> {
        let url = url::Url::parse(&config.endpoint)
            .with_context(|| format!("parse detector endpoint {}", config.endpoint))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "detector endpoint must be http(s), got {}",
                config.endpoint
            ));
        }
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { config, agent })
    }
}

impl Classifier for HttpClassifier {
    fn name(&self) -> &'static str {
        "http"
    }

    fn score(&self, jpeg: &[u8]) -> Result<Vec<LabelScore>> {
        let mut request = self
            .agent
            .post(&self.config.endpoint)
            .set("Content-Type", "image/jpeg");
        if let Some(token) = &self.config.token {
            request = request.set("Authorization", &format!("Bearer {}", token));
        }
        let response = request
            .send_bytes(jpeg)
            .with_context(|| format!("post frame to detector {}", self.config.endpoint))?;
        let mut body = String::new();
        response
            .into_reader()
            .take(MAX_RESPONSE_BYTES)
            .read_to_string(&mut body)
            .context("read detector response")?;
        parse_labels(&body)
    }
}

fn parse_labels(body: &str) -> Result<Vec<LabelScore>> {
    let parsed: ClassifierResponse =
        serde_json::from_str(body).context("parse detector response")?;
    Ok(match parsed {
        ClassifierResponse::Wrapped { labels } => labels,
        ClassifierResponse::Bare(labels) => labels,
    })
}
