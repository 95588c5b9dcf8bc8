//! Collaborative-signal backends.
//!
//! The collaborative strategy's signal source is an external collaborator:
//! the engine's contract is only that it returns a score in [0,1] per
//! candidate. This module provides the HTTP-backed production client and a
//! static in-memory implementation for deterministic testing.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};
use uuid::Uuid;

use liber_core::{CollaborativeSignal, Error, Result};

/// Default request timeout for the signal backend.
const SIGNAL_TIMEOUT_SECS: u64 = 10;

/// HTTP client for the collaborative-signal service.
///
/// Expects `GET {base_url}/signals/{user_id}` returning
/// `{"scores": {"<book_id>": 0.42, ...}}`.
pub struct HttpCollaborativeSignal {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SignalResponse {
    scores: HashMap<Uuid, f32>,
}

impl HttpCollaborativeSignal {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(SIGNAL_TIMEOUT_SECS))
            .build()
            .map_err(|e| Error::Config(format!("signal client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl CollaborativeSignal for HttpCollaborativeSignal {
    async fn scores_for(&self, user_id: Uuid) -> Result<HashMap<Uuid, f32>> {
        let url = format!("{}/signals/{}", self.base_url, user_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Signal(format!("request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            // No signal for this user (cold start) is not an error.
            debug!(user_id = %user_id, "No collaborative signal for user");
            return Ok(HashMap::new());
        }
        if !response.status().is_success() {
            warn!(user_id = %user_id, status = %response.status(), "Signal backend error");
            return Err(Error::Signal(format!(
                "backend returned {}",
                response.status()
            )));
        }

        let body: SignalResponse = response
            .json()
            .await
            .map_err(|e| Error::Signal(format!("malformed response: {e}")))?;
        Ok(body.scores)
    }
}

/// Static in-memory signal backend for tests and offline runs.
#[derive(Debug, Clone, Default)]
pub struct StaticCollaborativeSignal {
    scores: HashMap<Uuid, HashMap<Uuid, f32>>,
}

impl StaticCollaborativeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the score map returned for one user.
    pub fn with_user_scores(mut self, user_id: Uuid, scores: HashMap<Uuid, f32>) -> Self {
        self.scores.insert(user_id, scores);
        self
    }
}

#[async_trait]
impl CollaborativeSignal for StaticCollaborativeSignal {
    async fn scores_for(&self, user_id: Uuid) -> Result<HashMap<Uuid, f32>> {
        Ok(self.scores.get(&user_id).cloned().unwrap_or_default())
    }
}
