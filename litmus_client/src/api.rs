//! REST transport for the platform API

use crate::backoff::{Backoff, ReconnectPolicy};
use crate::config::ClientConfig;
use crate::error::RequestError;
use litmus_common::{
    CondensedPerformance, DecisionAudit, DecisionOverride, ExecutiveSummary, Experiment,
    ExperimentCreate, ExperimentPatch, ExperimentReport, ExperimentResults, GuardrailCreate,
    ExportFormat, GuardrailMetric, LifecycleAction, ReportSnapshot, ResultsInterval,
    TerminateRequest,
};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// The subset of the platform API the report controller depends on
///
/// `ApiClient` is the real implementation; tests substitute in-memory fakes.
pub trait ExperimentApi: Send + Sync + 'static {
    fn get_experiment(
        &self,
        experiment_id: &str,
    ) -> impl Future<Output = Result<Experiment, RequestError>> + Send;

    fn get_report(
        &self,
        experiment_id: &str,
    ) -> impl Future<Output = Result<ExperimentReport, RequestError>> + Send;

    fn list_snapshots(
        &self,
        experiment_id: &str,
    ) -> impl Future<Output = Result<Vec<ReportSnapshot>, RequestError>> + Send;

    fn list_guardrails(
        &self,
        experiment_id: &str,
    ) -> impl Future<Output = Result<Vec<GuardrailMetric>, RequestError>> + Send;

    fn terminate(
        &self,
        experiment_id: &str,
        request: &TerminateRequest,
    ) -> impl Future<Output = Result<Experiment, RequestError>> + Send;

    fn create_guardrail(
        &self,
        payload: &GuardrailCreate,
    ) -> impl Future<Output = Result<GuardrailMetric, RequestError>> + Send;
}

/// Typed client for the platform REST API
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    ws_url: String,
    client: Client,
    get_retry: ReconnectPolicy,
}

impl ApiClient {
    /// Create a client from the resolved configuration
    pub fn new(config: &ClientConfig) -> Result<Self, RequestError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("litmus/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(RequestError::Client)?;

        Ok(Self {
            base_url: config.rest_base(),
            ws_url: config.ws_url.clone(),
            client,
            get_retry: ReconnectPolicy {
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(2),
                max_attempts: config.get_retries,
            },
        })
    }

    /// Live report channel URL for an experiment
    pub fn live_url(&self, experiment_id: &str) -> String {
        format!(
            "{}{}{}",
            self.ws_url,
            litmus_common::constants::API_PREFIX,
            litmus_common::constants::live_path(experiment_id)
        )
    }

    /// GET a path, retrying network failures and 5xx responses
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RequestError> {
        let bytes = self.get_bytes(path).await?;
        decode(Method::GET, path, &bytes)
    }

    /// GET a path whose body is plain text
    pub async fn get_text(&self, path: &str) -> Result<String, RequestError> {
        let bytes = self.get_bytes(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, RequestError> {
        let mut backoff = Backoff::new(self.get_retry.clone());
        loop {
            match self.send_raw::<()>(Method::GET, path, None).await {
                Err(e) if e.is_retryable() => match backoff.next_delay() {
                    Some(delay) => {
                        tracing::debug!("GET {} failed ({}), retrying in {:?}", path, e, delay);
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(e),
                },
                other => return other,
            }
        }
    }

    /// POST a JSON body (never retried)
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::POST, path, Some(body)).await
    }

    /// PATCH a JSON body (never retried)
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send(Method::PATCH, path, Some(body)).await
    }

    async fn send<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let bytes = self.send_raw(method.clone(), path, body).await?;
        decode(method, path, &bytes)
    }

    async fn send_raw<B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<Vec<u8>, RequestError>
    where
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("{} {}", method, url);

        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let network = |source| RequestError::Network {
            method: method.clone(),
            path: path.to_string(),
            source,
        };

        let response = request.send().await.map_err(network)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(network)?;

        if !status.is_success() {
            let detail = error_detail(&bytes)
                .unwrap_or_else(|| format!("{} {} failed", method, path));
            return Err(RequestError::Status {
                method,
                path: path.to_string(),
                status: status.as_u16(),
                detail,
            });
        }

        Ok(bytes.to_vec())
    }

    pub async fn list_experiments(&self) -> Result<Vec<Experiment>, RequestError> {
        self.get("/experiments").await
    }

    pub async fn running_experiments(&self) -> Result<Vec<CondensedPerformance>, RequestError> {
        self.get("/experiments/running").await
    }

    pub async fn executive_summary(&self) -> Result<ExecutiveSummary, RequestError> {
        self.get("/experiments/executive-summary").await
    }

    pub async fn create_experiment(&self, payload: &ExperimentCreate) -> Result<Experiment, RequestError> {
        self.post("/experiments", payload).await
    }

    pub async fn patch_experiment(
        &self,
        experiment_id: &str,
        patch: &ExperimentPatch,
    ) -> Result<Experiment, RequestError> {
        self.patch(&format!("/experiments/{}", experiment_id), patch).await
    }

    pub async fn launch(&self, experiment_id: &str, ramp_pct: Option<u8>) -> Result<Experiment, RequestError> {
        let action = LifecycleAction {
            ramp_pct,
            ..LifecycleAction::default()
        };
        self.post(&format!("/experiments/{}/launch", experiment_id), &action)
            .await
    }

    pub async fn pause(&self, experiment_id: &str) -> Result<Experiment, RequestError> {
        self.post(&format!("/experiments/{}/pause", experiment_id), &LifecycleAction::default())
            .await
    }

    pub async fn stop(&self, experiment_id: &str) -> Result<Experiment, RequestError> {
        self.post(&format!("/experiments/{}/stop", experiment_id), &LifecycleAction::default())
            .await
    }

    pub async fn results(
        &self,
        experiment_id: &str,
        interval: ResultsInterval,
    ) -> Result<ExperimentResults, RequestError> {
        self.get(&format!("/results/{}?interval={}", experiment_id, interval.as_str()))
            .await
    }

    pub async fn decision_history(&self, experiment_id: &str) -> Result<Vec<DecisionAudit>, RequestError> {
        self.get(&format!("/experiments/{}/decision-history", experiment_id))
            .await
    }

    /// Report rendered server-side as JSON or CSV text
    pub async fn export_report(&self, experiment_id: &str, format: ExportFormat) -> Result<String, RequestError> {
        self.get_text(&format!("/experiments/{}/export?format={}", experiment_id, format.as_str()))
            .await
    }

    pub async fn override_decision(
        &self,
        experiment_id: &str,
        decision: &DecisionOverride,
    ) -> Result<Experiment, RequestError> {
        self.post(&format!("/experiments/{}/decision", experiment_id), decision)
            .await
    }
}

impl ExperimentApi for ApiClient {
    async fn get_experiment(&self, experiment_id: &str) -> Result<Experiment, RequestError> {
        self.get(&format!("/experiments/{}", experiment_id)).await
    }

    async fn get_report(&self, experiment_id: &str) -> Result<ExperimentReport, RequestError> {
        self.get(&format!("/experiments/{}/report", experiment_id)).await
    }

    async fn list_snapshots(&self, experiment_id: &str) -> Result<Vec<ReportSnapshot>, RequestError> {
        self.get(&format!("/experiments/{}/snapshots", experiment_id)).await
    }

    async fn list_guardrails(&self, experiment_id: &str) -> Result<Vec<GuardrailMetric>, RequestError> {
        self.get(&format!("/metrics/guardrails/{}", experiment_id)).await
    }

    async fn terminate(
        &self,
        experiment_id: &str,
        request: &TerminateRequest,
    ) -> Result<Experiment, RequestError> {
        self.post(&format!("/experiments/{}/terminate", experiment_id), request)
            .await
    }

    async fn create_guardrail(&self, payload: &GuardrailCreate) -> Result<GuardrailMetric, RequestError> {
        self.post("/metrics/guardrails", payload).await
    }
}

fn decode<T: DeserializeOwned>(method: Method, path: &str, bytes: &[u8]) -> Result<T, RequestError> {
    serde_json::from_slice(bytes).map_err(|source| RequestError::Decode {
        method,
        path: path.to_string(),
        source,
    })
}

/// Pull a human-readable message out of an error body
///
/// Tries `detail` (validation errors are lists of `{msg}` objects), then
/// `error.message`, then `message`.
fn error_detail(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;

    let detail = match value.get("detail") {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Array(items)) => {
            let messages: Vec<&str> = items
                .iter()
                .filter_map(|item| item.get("msg").and_then(|m| m.as_str()))
                .collect();
            (!messages.is_empty()).then(|| messages.join("; "))
        }
        Some(serde_json::Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };

    detail
        .or_else(|| {
            value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .or_else(|| value.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .filter(|s| !s.trim().is_empty())
}
