//! HTTP inference sidecar scorer.
//!
//! Ships the ROI crop of a frame (JPEG, in-memory) to a sidecar inference
//! service and reads back softmax probabilities. The label vocabulary rides
//! in the query string so the sidecar can tokenize it per request.
//!
//! Expected response body: `{"probs": [0.12, 0.03, ...]}`, one entry per
//! label, in request order.

use std::io::Cursor;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::classify::scorer::FrameScorer;
use crate::frame::{Frame, Roi};

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    probs: Vec<f64>,
}

/// Scorer backed by a remote inference endpoint.
///
/// The agent and endpoint are the injected model capability: constructed
/// once, reused for every call.
pub struct HttpScorer {
    agent: ureq::Agent,
    endpoint: Url,
}

impl HttpScorer {
    pub fn new(endpoint: &str) -> Result<Self> {
        let endpoint = Url::parse(endpoint).context("parse scorer endpoint")?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(anyhow!(
                "scorer endpoint must be http(s), got '{}'",
                endpoint.scheme()
            ));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Ok(Self { agent, endpoint })
    }
}

impl FrameScorer for HttpScorer {
    fn name(&self) -> &'static str {
        "http"
    }

    fn score(&mut self, frame: &Frame, roi: &Roi, labels: &[String]) -> Result<Vec<f64>> {
        if labels.is_empty() {
            return Err(anyhow!("empty label vocabulary"));
        }

        let crop = frame.roi_rgb(roi);
        let mut jpeg = Vec::new();
        crop.write_to(&mut Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .context("encode roi crop as jpeg")?;

        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("labels", &labels.join(","));

        let response = self
            .agent
            .post(url.as_str())
            .set("Content-Type", "image/jpeg")
            .send_bytes(&jpeg)
            .context("send frame to scorer endpoint")?;
        let body: ScoreResponse = response
            .into_json()
            .context("parse scorer response json")?;

        if body.probs.len() != labels.len() {
            return Err(anyhow!(
                "scorer returned {} probabilities for {} labels",
                body.probs.len(),
                labels.len()
            ));
        }
        if body.probs.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(anyhow!("scorer returned malformed probabilities"));
        }
        Ok(body.probs)
    }

    fn warm_up(&mut self) -> Result<()> {
        // A HEAD request surfaces a dead sidecar at startup instead of on
        // the first clip.
        self.agent
            .head(self.endpoint.as_str())
            .call()
            .map(|_| ())
            .with_context(|| format!("scorer endpoint {} unreachable", self.endpoint))
    }
}
