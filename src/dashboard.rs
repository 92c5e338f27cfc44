//! Thin client for the external dashboard: per-tenant config fetch,
//! fire-and-forget optimization event emission, and per-user API key
//! validation. None of this influences pipeline semantics — swapping the
//! implementation must not change optimizer behavior.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::config::ConfigOverlay;
use crate::error::DashboardError;

pub const CONFIG_FETCH_TIMEOUT: Duration = Duration::from_secs(3);
pub const KEY_VALIDATION_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize)]
pub struct OptimizationEvent {
    pub tenant_id: Option<String>,
    pub project_id: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub tokens_before: u32,
    pub tokens_after: u32,
    pub cache_hit: bool,
    pub route: String,
}

#[async_trait]
pub trait DashboardClient: Send + Sync {
    async fn fetch_tenant_config(&self, tenant_id: &str) -> Result<ConfigOverlay, DashboardError>;

    async fn emit_event(&self, event: OptimizationEvent) -> Result<(), DashboardError>;

    async fn validate_user_key(&self, key: &str) -> Result<bool, DashboardError>;
}

pub struct HttpDashboardClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpDashboardClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into(), api_key: api_key.into() }
    }
}

#[async_trait]
impl DashboardClient for HttpDashboardClient {
    async fn fetch_tenant_config(&self, tenant_id: &str) -> Result<ConfigOverlay, DashboardError> {
        let url = format!("{}/api/tenants/{}/config", self.base_url, tenant_id);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(CONFIG_FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DashboardError::Timeout
                } else {
                    DashboardError::Unreachable(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DashboardError::ApiError { status: status.as_u16(), body });
        }

        let dashboard_config: serde_json::Map<String, Value> =
            resp.json().await.map_err(|e| DashboardError::Unreachable(e.to_string()))?;
        Ok(crate::config::map_dashboard_fields(&dashboard_config))
    }

    async fn emit_event(&self, event: OptimizationEvent) -> Result<(), DashboardError> {
        let url = format!("{}/api/events/optimization", self.base_url);
        self.client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&event)
            .timeout(CONFIG_FETCH_TIMEOUT)
            .send()
            .await
            .map_err(|e| DashboardError::Unreachable(e.to_string()))?;
        Ok(())
    }

    async fn validate_user_key(&self, key: &str) -> Result<bool, DashboardError> {
        let url = format!("{}/api/keys/validate", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "key": key }))
            .timeout(KEY_VALIDATION_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DashboardError::Timeout
                } else {
                    DashboardError::Unreachable(e.to_string())
                }
            })?;
        Ok(resp.status().is_success())
    }
}

/// Emit an event fire-and-forget: failures are logged, never surfaced.
pub async fn emit_best_effort(client: &dyn DashboardClient, event: OptimizationEvent) {
    if let Err(err) = client.emit_event(event).await {
        warn!("dashboard event emission failed: {err}");
    }
}

/// Fetch tenant config, treating any failure as "no overlay" rather than
/// failing the request.
pub async fn fetch_best_effort(client: &dyn DashboardClient, tenant_id: &str) -> Option<ConfigOverlay> {
    match client.fetch_tenant_config(tenant_id).await {
        Ok(overlay) => Some(overlay),
        Err(err) => {
            warn!("dashboard config fetch failed, using defaults: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingClient {
        emitted: Mutex<Vec<OptimizationEvent>>,
    }

    #[async_trait]
    impl DashboardClient for RecordingClient {
        async fn fetch_tenant_config(&self, _tenant_id: &str) -> Result<ConfigOverlay, DashboardError> {
            Err(DashboardError::Unreachable("not configured in test".into()))
        }

        async fn emit_event(&self, event: OptimizationEvent) -> Result<(), DashboardError> {
            self.emitted.lock().unwrap().push(event);
            Ok(())
        }

        async fn validate_user_key(&self, _key: &str) -> Result<bool, DashboardError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn fetch_failure_degrades_to_none() {
        let client = RecordingClient::default();
        let result = fetch_best_effort(&client, "tenant-a").await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn emit_best_effort_records_event_on_success() {
        let client = RecordingClient::default();
        emit_best_effort(
            &client,
            OptimizationEvent {
                tenant_id: Some("t1".into()),
                project_id: None,
                endpoint: "optimize".into(),
                model: "gpt-4o".into(),
                tokens_before: 100,
                tokens_after: 50,
                cache_hit: false,
                route: "heuristic".into(),
            },
        )
        .await;
        assert_eq!(client.emitted.lock().unwrap().len(), 1);
    }
}
