//! End-to-end report sync against an in-process fake platform

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration as ChronoDuration, NaiveDate};
use litmus_client::{
    live_report_sync, ActionError, ApiClient, ChannelStatus, ClientConfig, NewGuardrail,
    ReportView, SyncHandle, SyncPhase,
};
use litmus_common::{ExperimentCreate, ExperimentStatus, GuardrailDirection, GuardrailStatus};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, Default)]
struct LiveReport {
    exposures: u64,
    breached: u32,
    tick: i64,
}

#[derive(Default)]
struct Platform {
    experiments: HashMap<String, Value>,
    reports: HashMap<String, LiveReport>,
    guardrails: Vec<Value>,
    terminate_bodies: Vec<Value>,
}

#[derive(Clone)]
struct Fake {
    platform: Arc<Mutex<Platform>>,
    frames: broadcast::Sender<String>,
}

/// Naive timestamps, as the platform emits them
fn stamp(tick: i64) -> String {
    let base = NaiveDate::from_ymd_opt(2026, 1, 1)
        .unwrap()
        .and_hms_micro_opt(9, 0, 0, 250_000)
        .unwrap();
    (base + ChronoDuration::seconds(tick))
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

fn report_json(id: &str, report: LiveReport) -> Value {
    json!({
        "experiment_id": id,
        "status": "running",
        "mde": 0.05,
        "sample_size_required": 3842,
        "exposures": report.exposures,
        "conversions": report.exposures / 10,
        "sample_progress": report.exposures as f64 / 3842.0,
        "control_conversion_rate": 0.1,
        "treatment_conversion_rate": 0.11,
        "uplift_vs_control": 0.1,
        "uplift_ci_lower": -0.02,
        "uplift_ci_upper": 0.22,
        "p_value": 0.2,
        "confidence": 0.8,
        "recommendation": "continue",
        "guardrails_breached": report.breached,
        "guardrails": [],
        "variant_performance": [],
        "assignment_policy": "fixed",
        "bandit_state": [],
        "last_updated_at": stamp(report.tick),
    })
}

async fn create_experiment(State(fake): State<Fake>, Json(body): Json<Value>) -> impl IntoResponse {
    let mut platform = fake.platform.lock().unwrap();
    let id = format!("exp-{}", platform.experiments.len() + 1);
    let experiment = json!({
        "id": id,
        "name": body["name"],
        "mde": body["mde"],
        "baseline_rate": body["baseline_rate"],
        "alpha": 0.05,
        "power": 0.8,
        "sample_size_required": 3842,
        "status": "DRAFT",
        "variants": body["variants"],
    });
    platform.experiments.insert(id, experiment.clone());
    (StatusCode::CREATED, Json(experiment))
}

async fn get_experiment(State(fake): State<Fake>, Path(id): Path<String>) -> impl IntoResponse {
    let platform = fake.platform.lock().unwrap();
    match platform.experiments.get(&id) {
        Some(experiment) => (StatusCode::OK, Json(experiment.clone())),
        None => (StatusCode::NOT_FOUND, Json(json!({"detail": "Experiment not found"}))),
    }
}

async fn get_report(State(fake): State<Fake>, Path(id): Path<String>) -> impl IntoResponse {
    let platform = fake.platform.lock().unwrap();
    match platform.reports.get(&id) {
        Some(report) => (StatusCode::OK, Json(report_json(&id, *report))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": {"type": "http_error", "message": "Report not available",
                "request_id": "req-1"}})),
        ),
    }
}

async fn launch(State(fake): State<Fake>, Path(id): Path<String>) -> impl IntoResponse {
    let mut platform = fake.platform.lock().unwrap();
    let Some(experiment) = platform.experiments.get_mut(&id) else {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Experiment not found"})));
    };
    experiment["status"] = json!("RUNNING");
    let experiment = experiment.clone();
    platform.reports.insert(
        id,
        LiveReport {
            exposures: 100,
            breached: 0,
            tick: 1,
        },
    );
    (StatusCode::OK, Json(experiment))
}

async fn terminate(
    State(fake): State<Fake>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let mut platform = fake.platform.lock().unwrap();
    platform.terminate_bodies.push(body.clone());
    let Some(experiment) = platform.experiments.get_mut(&id) else {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Experiment not found"})));
    };
    if experiment["status"] != json!("RUNNING") {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"detail": "Only running experiments can be terminated"})),
        );
    }
    experiment["status"] = json!("terminated_without_cause");
    experiment["termination_reason"] = body["reason"].clone();
    (StatusCode::OK, Json(experiment.clone()))
}

async fn list_snapshots(Path(_id): Path<String>) -> Json<Value> {
    Json(json!([]))
}

async fn list_guardrails(State(fake): State<Fake>, Path(id): Path<String>) -> Json<Value> {
    let platform = fake.platform.lock().unwrap();
    let list: Vec<Value> = platform
        .guardrails
        .iter()
        .filter(|g| g["experiment_id"] == json!(id))
        .cloned()
        .collect();
    Json(Value::Array(list))
}

async fn create_guardrail(State(fake): State<Fake>, Json(body): Json<Value>) -> impl IntoResponse {
    let mut platform = fake.platform.lock().unwrap();
    let value = body["value"].as_f64().unwrap_or_default();
    let threshold = body["threshold_value"].as_f64().unwrap_or_default();
    let breached = match body["direction"].as_str() {
        Some("min") => value < threshold,
        _ => value > threshold,
    };

    let id = body["experiment_id"].as_str().unwrap_or_default().to_string();
    let tick = platform.reports.get(&id).map(|r| r.tick).unwrap_or_default();
    let metric = json!({
        "id": format!("gm-{}", platform.guardrails.len() + 1),
        "experiment_id": id,
        "name": body["name"],
        "value": value,
        "threshold_value": threshold,
        "direction": body["direction"],
        "status": if breached { "breached" } else { "healthy" },
        "observed_at": stamp(tick),
    });
    platform.guardrails.insert(0, metric.clone());

    if let Some(report) = platform.reports.get_mut(&id) {
        report.breached += u32::from(breached);
        report.tick += 1;
    }
    (StatusCode::CREATED, Json(metric))
}

async fn live(
    ws: WebSocketUpgrade,
    State(fake): State<Fake>,
    Path(_id): Path<String>,
) -> impl IntoResponse {
    // Subscribe before the handshake completes so no frame is missed
    let frames = fake.frames.subscribe();
    ws.on_upgrade(move |socket| forward(socket, frames))
}

async fn forward(mut socket: WebSocket, mut frames: broadcast::Receiver<String>) {
    while let Ok(frame) = frames.recv().await {
        if socket.send(Message::Text(frame.into())).await.is_err() {
            break;
        }
    }
}

async fn spawn_platform() -> (Fake, ClientConfig) {
    let (frames, _) = broadcast::channel(64);
    let fake = Fake {
        platform: Arc::new(Mutex::new(Platform::default())),
        frames,
    };

    let app = Router::new()
        .route("/api/v1/experiments", post(create_experiment))
        .route("/api/v1/experiments/{id}", get(get_experiment))
        .route("/api/v1/experiments/{id}/report", get(get_report))
        .route("/api/v1/experiments/{id}/snapshots", get(list_snapshots))
        .route("/api/v1/experiments/{id}/launch", post(launch))
        .route("/api/v1/experiments/{id}/terminate", post(terminate))
        .route("/api/v1/metrics/guardrails", post(create_guardrail))
        .route("/api/v1/metrics/guardrails/{id}", get(list_guardrails))
        .route("/api/v1/ws/experiments/{id}/live", get(live))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (fake, ClientConfig::new(format!("http://{}", addr)))
}

async fn settled<F>(handle: &SyncHandle, predicate: F) -> ReportView
where
    F: FnMut(&ReportView) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), handle.wait_for(predicate))
        .await
        .expect("view never reached the expected state")
        .expect("controller stopped")
}

#[tokio::test]
async fn test_detail_view_lifecycle() {
    let (fake, config) = spawn_platform().await;
    let api = ApiClient::new(&config).unwrap();

    let created = api
        .create_experiment(&ExperimentCreate::ab("Checkout Button Experiment", 0.05))
        .await
        .unwrap();
    assert_eq!(created.status, ExperimentStatus::Draft);

    // Draft experiments have no report yet; identity still renders
    let sync = live_report_sync(&config).unwrap();
    let handle = sync.mount(&created.id);
    let view = settled(&handle, |v| v.phase == SyncPhase::Synced).await;
    let experiment = view.experiment.loaded().unwrap();
    assert_eq!(experiment.name, "Checkout Button Experiment");
    assert_eq!(experiment.variants.len(), 2);
    assert_eq!(view.report.failure(), Some("Report not available"));

    let err = handle.terminate(None).await.unwrap_err();
    assert!(matches!(err, ActionError::NotRunning(ExperimentStatus::Draft)));

    api.launch(&created.id, None).await.unwrap();
    handle.refresh().await.unwrap();
    let view = settled(&handle, |v| v.report.is_loaded() && v.channel == ChannelStatus::Live).await;
    assert_eq!(view.report.loaded().unwrap().exposures, 100);
    assert!(view.experiment.loaded().unwrap().status.is_running());

    // Live frames: malformed and stale ones are dropped, newer ones applied
    let newer = LiveReport {
        exposures: 900,
        breached: 0,
        tick: 30,
    };
    let older = LiveReport {
        exposures: 50,
        breached: 0,
        tick: 0,
    };
    fake.frames.send("definitely not json".to_string()).unwrap();
    fake.frames.send(report_json(&created.id, older).to_string()).unwrap();
    fake.frames.send(report_json(&created.id, newer).to_string()).unwrap();
    let view = settled(&handle, |v| v.report.loaded().map(|r| r.exposures) == Some(900)).await;
    assert_eq!(view.channel, ChannelStatus::Live);

    // The frame pushed tick 30 out of reach, so move the server past it
    fake.platform
        .lock()
        .unwrap()
        .reports
        .get_mut(&created.id)
        .unwrap()
        .tick = 40;

    let metric = handle
        .submit_guardrail(NewGuardrail {
            name: "p95_latency_ms".to_string(),
            value: 400.0,
            threshold_value: 350.0,
            direction: GuardrailDirection::Max,
        })
        .await
        .unwrap();
    assert_eq!(metric.status, GuardrailStatus::Breached);

    let view = settled(&handle, |v| {
        v.report.loaded().map(|r| r.guardrails_breached >= 1) == Some(true)
    })
    .await;
    let guardrails = view.guardrails.loaded().unwrap();
    assert_eq!(guardrails.len(), 1);
    assert_eq!(guardrails[0].id, metric.id);

    let terminated = handle.terminate(Some("")).await.unwrap();
    assert_eq!(terminated.status, ExperimentStatus::TerminatedWithoutCause);
    assert_eq!(handle.view().phase, SyncPhase::Terminated);
    assert_eq!(
        fake.platform.lock().unwrap().terminate_bodies,
        vec![json!({"reason": null})]
    );

    handle.close().await;
}

#[tokio::test]
async fn test_unknown_experiment_fails_per_slice() {
    let (_fake, config) = spawn_platform().await;
    let sync = live_report_sync(&config).unwrap();
    let handle = sync.mount("nope");

    let view = settled(&handle, |v| v.phase == SyncPhase::Synced).await;
    assert_eq!(view.experiment.failure(), Some("Experiment not found"));
    assert!(view.report.is_failed());
    assert!(view.snapshots.is_loaded());

    handle.close().await;
}
