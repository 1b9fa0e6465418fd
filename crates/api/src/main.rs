mod error;
mod html;

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse},
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use auditor_core::aggregate::{RiskPolicy, SummaryStats};
use auditor_core::config::Settings;
use auditor_core::llm::client::HttpCompletionClient;
use auditor_core::llm::prompt::PromptTemplates;
use auditor_core::llm::{CompletionClient, CompletionParams};
use auditor_core::pipeline::{self, GeneratedRules};
use auditor_core::render::{render_dashboard, Dashboard};
use auditor_core::session::{SessionError, SessionStore};

use crate::error::ApiError;

const SESSION_IDLE_TIMEOUT_MINS: i64 = 60;
const PURGE_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let llm = match completion_from_settings(&settings) {
        Ok(llm) => Some(llm),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "completion endpoint not configured; rules generation and analysis are disabled");
            None
        }
    };

    let state = AppState {
        store: SessionStore::new(),
        llm,
        templates: PromptTemplates::new(&settings.prompt_dir),
        policy: settings.risk_policy,
        max_upload_bytes: settings.max_upload_bytes,
    };

    tokio::spawn(purge_idle_sessions(state.store.clone()));

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(
        %addr,
        prompt_dir = %settings.prompt_dir.display(),
        max_upload_bytes = settings.max_upload_bytes,
        "api listening"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn completion_from_settings(settings: &Settings) -> anyhow::Result<Completion> {
    Ok(Completion {
        client: Arc::new(HttpCompletionClient::from_settings(settings)?),
        params: CompletionParams::from_settings(settings)?,
    })
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", delete(delete_session))
        .route("/sessions/:id/rules/:name", put(upload_rules))
        .route("/sessions/:id/rules/:name/select", post(select_rules))
        .route("/sessions/:id/rules/:name/deselect", post(deselect_rules))
        .route("/sessions/:id/rules/:name/generate", post(generate_rules))
        .route("/sessions/:id/rules/:name/download", get(download_rules))
        .route("/sessions/:id/transactions/:name", put(upload_transactions))
        .route("/sessions/:id/analyze", post(analyze))
        .route("/sessions/:id/dashboard", get(dashboard_html))
        .route("/sessions/:id/dashboard.json", get(dashboard_json))
        .with_state(state)
        .layer(body_limit)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[derive(Clone)]
struct Completion {
    client: Arc<dyn CompletionClient>,
    params: CompletionParams,
}

#[derive(Clone)]
struct AppState {
    store: SessionStore,
    llm: Option<Completion>,
    templates: PromptTemplates,
    policy: RiskPolicy,
    max_upload_bytes: usize,
}

impl AppState {
    fn completion(&self) -> Result<&Completion, ApiError> {
        self.llm
            .as_ref()
            .ok_or(ApiError::Unavailable("completion endpoint is not configured"))
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Debug, Serialize)]
struct SessionCreated {
    session_id: Uuid,
}

async fn create_session(State(state): State<AppState>) -> (StatusCode, Json<SessionCreated>) {
    let session_id = state.store.create();
    (StatusCode::CREATED, Json(SessionCreated { session_id }))
}

async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.remove(id)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
struct UploadAck {
    name: String,
    added: bool,
}

async fn upload_rules(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadAck>), ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest(format!("{name} is empty")));
    }
    let added = state
        .store
        .with_session(id, |s| s.add_rules_document(&name, body.to_vec()))?;
    let status = if added {
        tracing::info!(session_id = %id, file_name = %name, bytes = body.len(), "rules document uploaded");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(UploadAck { name, added })))
}

#[derive(Debug, Serialize)]
struct Selection {
    selected: Vec<String>,
}

async fn select_rules(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
) -> Result<Json<Selection>, ApiError> {
    set_selected(&state, id, &name, true)
}

async fn deselect_rules(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
) -> Result<Json<Selection>, ApiError> {
    set_selected(&state, id, &name, false)
}

fn set_selected(
    state: &AppState,
    id: Uuid,
    name: &str,
    selected: bool,
) -> Result<Json<Selection>, ApiError> {
    let selected = state.store.with_session(id, |s| {
        s.set_selected(name, selected)
            .map(|()| s.selection().to_vec())
    })??;
    Ok(Json(Selection { selected }))
}

#[derive(Debug, Serialize)]
struct GeneratedRulesResponse {
    #[serde(flatten)]
    result: GeneratedRules,
    download_name: String,
    warnings: Vec<String>,
}

async fn generate_rules(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
) -> Result<Json<GeneratedRulesResponse>, ApiError> {
    let file = state
        .store
        .with_session(id, |s| s.rules_document(&name).map(|d| d.file.clone()))?
        .ok_or_else(|| SessionError::UnknownDocument(name.clone()))?;
    let llm = state.completion()?;

    let outcome =
        pipeline::generate_rules(llm.client.as_ref(), &llm.params, &state.templates, &file).await?;

    state
        .store
        .with_session(id, |s| s.record_generated(&name, outcome.result.clone()))??;

    Ok(Json(GeneratedRulesResponse {
        download_name: outcome.result.download_name(),
        result: outcome.result,
        warnings: outcome.warnings,
    }))
}

async fn download_rules(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let (file_name, content) = state.store.with_session(id, |s| s.generated_download(&name))??;
    Ok((
        [
            (header::CONTENT_TYPE, "text/markdown; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file_name.replace('"', "")),
            ),
        ],
        content,
    ))
}

async fn upload_transactions(
    State(state): State<AppState>,
    Path((id, name)): Path<(Uuid, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadAck>), ApiError> {
    if body.is_empty() {
        return Err(ApiError::BadRequest(format!("{name} is empty")));
    }
    state
        .store
        .with_session(id, |s| s.set_transactions(&name, body.to_vec()))?;
    tracing::info!(session_id = %id, file_name = %name, bytes = body.len(), "transaction data uploaded");
    Ok((StatusCode::CREATED, Json(UploadAck { name, added: true })))
}

#[derive(Debug, Serialize)]
struct SkippedDocument {
    file_name: String,
    cause: String,
}

#[derive(Debug, Serialize)]
struct AnalysisSummary {
    stats: SummaryStats,
    rules_documents: Vec<String>,
    transaction_file: String,
    skipped: Vec<SkippedDocument>,
    stray_flagged_ids: Vec<String>,
    usage: Option<serde_json::Value>,
    completed_at: DateTime<Utc>,
}

async fn analyze(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<AnalysisSummary>, ApiError> {
    let input = state.store.with_session(id, |s| s.analysis_input())?;
    let llm = state.completion()?;

    let outcome = pipeline::analyze(
        llm.client.as_ref(),
        &llm.params,
        &state.templates,
        &state.policy,
        input,
    )
    .await?;

    let outcome = state.store.with_session(id, |s| s.record_analysis(outcome))?;

    Ok(Json(AnalysisSummary {
        stats: outcome.stats,
        rules_documents: outcome.rules_documents.clone(),
        transaction_file: outcome.transaction_file.clone(),
        skipped: outcome
            .skipped
            .iter()
            .map(|e| SkippedDocument {
                file_name: e.file_name.clone(),
                cause: e.cause.clone(),
            })
            .collect(),
        stray_flagged_ids: outcome.document.stray_flagged_ids.clone(),
        usage: outcome.usage.clone(),
        completed_at: outcome.completed_at,
    }))
}

fn dashboard(state: &AppState, id: Uuid) -> Result<Dashboard, ApiError> {
    let outcome = state.store.with_session(id, |s| s.analysis())??;
    Ok(render_dashboard(
        &outcome.document,
        &outcome.stats,
        &state.policy,
        Utc::now(),
    ))
}

async fn dashboard_html(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Html<String>, ApiError> {
    Ok(Html(html::dashboard_page(&dashboard(&state, id)?)))
}

async fn dashboard_json(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Dashboard>, ApiError> {
    Ok(Json(dashboard(&state, id)?))
}

async fn purge_idle_sessions(store: SessionStore) {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(PURGE_INTERVAL_SECS));
    loop {
        interval.tick().await;
        store.purge_idle(chrono::Duration::minutes(SESSION_IDLE_TIMEOUT_MINS));
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use auditor_core::config::DEFAULT_MAX_UPLOAD_BYTES;
    use auditor_core::llm::error::CompletionError;
    use auditor_core::llm::{Choice, ChoiceMessage, CompletionRequest, CompletionResponse};
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct CannedClient {
        replies: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl CompletionClient for CannedClient {
        fn endpoint(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            _request: &CompletionRequest,
        ) -> Result<CompletionResponse, CompletionError> {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(CompletionError::Http {
                    status: 500,
                    body: "no more replies".to_string(),
                });
            }
            Ok(CompletionResponse {
                choices: vec![Choice {
                    message: ChoiceMessage {
                        content: Some(replies.remove(0)),
                    },
                }],
                usage: None,
            })
        }
    }

    fn state(replies: &[&str]) -> AppState {
        let dir = std::env::temp_dir().join(format!("auditor-api-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("system_prompt.txt"), "You audit.").unwrap();
        std::fs::write(dir.join("profiling_prompt.txt"), "Analyse.").unwrap();
        std::fs::write(dir.join("rules_prompt.txt"), "Extract the rules.").unwrap();

        AppState {
            store: SessionStore::new(),
            llm: Some(Completion {
                client: Arc::new(CannedClient {
                    replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
                }),
                params: CompletionParams {
                    model: "m".to_string(),
                    temperature: 0.7,
                    max_tokens: 8000,
                },
            }),
            templates: PromptTemplates::new(dir),
            policy: RiskPolicy::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: &[u8]) -> (StatusCode, Vec<u8>) {
        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body.to_vec()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn send_json(app: &Router, method: &str, uri: &str, body: &[u8]) -> (StatusCode, Value) {
        let (status, bytes) = send(app, method, uri, body).await;
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn new_session(app: &Router) -> String {
        let (status, body) = send_json(app, "POST", "/sessions", b"").await;
        assert_eq!(status, StatusCode::CREATED);
        body["session_id"].as_str().unwrap().to_string()
    }

    const ANALYSIS_REPLY: &str = "```json\n{\"rules_list\": [{\"ruleid\": \"R1\", \"description\": \"positive\", \"origin\": \"rules.txt, p1\", \"severity\": \"High\"}], \"transactions_list\": [{\"transaction_id\": \"T1\", \"voilated_rules_list\": [\"R1\"], \"flag\": true, \"risk_score\": 80}, {\"transaction_id\": \"T2\", \"flag\": false, \"risk_score\": 25}, {\"transaction_id\": \"T3\", \"flag\": false, \"risk_score\": 50}], \"flagged_list\": [\"T1\"]}\n```";

    #[tokio::test]
    async fn healthz_is_ok() {
        let app = router(state(&[]));
        let (status, body) = send(&app, "GET", "/healthz", b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"ok");
    }

    #[tokio::test]
    async fn uploads_beyond_two_mebibytes_are_accepted() {
        let app = router(state(&[]));
        let id = new_session(&app).await;
        let big = vec![b'a'; 3 * 1024 * 1024];

        let (status, _) = send_json(&app, "PUT", &format!("/sessions/{id}/rules/big.txt"), &big).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = send_json(&app, "PUT", &format!("/sessions/{id}/transactions/big.csv"), &big).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn uploads_over_the_configured_limit_are_rejected() {
        let mut small = state(&[]);
        small.max_upload_bytes = 1024;
        let app = router(small);
        let id = new_session(&app).await;

        let (status, _) = send(&app, "PUT", &format!("/sessions/{id}/rules/big.txt"), &[b'a'; 2048]).await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        let (status, _) = send(&app, "PUT", &format!("/sessions/{id}/rules/ok.txt"), &[b'a'; 512]).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn full_analysis_flow() {
        let app = router(state(&[ANALYSIS_REPLY]));
        let id = new_session(&app).await;

        let (status, body) = send_json(&app, "PUT", &format!("/sessions/{id}/rules/rules.txt"), b"R1: positive").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["added"], true);
        let (status, body) = send_json(&app, "PUT", &format!("/sessions/{id}/rules/rules.txt"), b"again").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["added"], false);

        let (status, body) = send_json(&app, "POST", &format!("/sessions/{id}/rules/rules.txt/select"), b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"selected": ["rules.txt"]}));

        let (status, _) = send_json(&app, "PUT", &format!("/sessions/{id}/transactions/tx.csv"), b"id\nT1\nT2\nT3").await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send_json(&app, "POST", &format!("/sessions/{id}/analyze"), b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stats"]["total"], 3);
        assert_eq!(body["stats"]["high"], 1);
        assert_eq!(body["stats"]["medium"], 1);
        assert_eq!(body["stats"]["low"], 1);
        assert_eq!(body["stats"]["failure_rate"], 33.33);

        let (status, body) = send_json(&app, "GET", &format!("/sessions/{id}/dashboard.json"), b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["header"]["analysed"], "rules.txt");
        assert_eq!(body["transactions"]["median_risk"], "50.00");

        let (status, page) = send(&app, "GET", &format!("/sessions/{id}/dashboard"), b"").await;
        assert_eq!(status, StatusCode::OK);
        let page = String::from_utf8(page).unwrap();
        assert!(page.contains("T1: Needs Review"));
    }

    #[tokio::test]
    async fn analyze_without_selection_is_a_bad_request() {
        let app = router(state(&[]));
        let id = new_session(&app).await;
        let (status, body) = send_json(&app, "POST", &format!("/sessions/{id}/analyze"), b"").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Please select at least one rules file");
    }

    #[tokio::test]
    async fn unusable_reply_returns_raw_output() {
        let app = router(state(&["I am unable to comply."]));
        let id = new_session(&app).await;
        send(&app, "PUT", &format!("/sessions/{id}/rules/rules.txt"), b"R1").await;
        send(&app, "POST", &format!("/sessions/{id}/rules/rules.txt/select"), b"").await;
        send(&app, "PUT", &format!("/sessions/{id}/transactions/tx.csv"), b"id\nT1").await;

        let (status, body) = send_json(&app, "POST", &format!("/sessions/{id}/analyze"), b"").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["raw_output"], "I am unable to comply.");

        // Nothing was recorded.
        let (status, _) = send(&app, "GET", &format!("/sessions/{id}/dashboard"), b"").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn generated_rules_can_be_downloaded() {
        let app = router(state(&["## Rules\n- R1"]));
        let id = new_session(&app).await;
        send(&app, "PUT", &format!("/sessions/{id}/rules/policy.txt"), b"Be nice.").await;

        let (status, _) = send(&app, "GET", &format!("/sessions/{id}/rules/policy.txt/download"), b"").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send_json(&app, "POST", &format!("/sessions/{id}/rules/policy.txt/generate"), b"").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], "## Rules\n- R1");
        assert_eq!(body["download_name"], "analysis_policy.txt.md");

        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/sessions/{id}/rules/policy.txt/download"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(
            res.headers()[header::CONTENT_DISPOSITION],
            "attachment; filename=\"analysis_policy.txt.md\""
        );
    }

    #[tokio::test]
    async fn unknown_sessions_and_documents_are_not_found() {
        let app = router(state(&[]));
        let missing = Uuid::new_v4();
        let (status, _) = send(&app, "POST", &format!("/sessions/{missing}/analyze"), b"").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let id = new_session(&app).await;
        let (status, body) = send_json(&app, "POST", &format!("/sessions/{id}/rules/nope.pdf/select"), b"").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "unknown rules document nope.pdf");

        let (status, _) = send(&app, "DELETE", &format!("/sessions/{id}"), b"").await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "DELETE", &format!("/sessions/{id}"), b"").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_endpoint_configuration_is_unavailable() {
        let mut st = state(&[]);
        st.llm = None;
        let app = router(st);
        let id = new_session(&app).await;
        send(&app, "PUT", &format!("/sessions/{id}/rules/a.txt"), b"R").await;
        let (status, _) = send(&app, "POST", &format!("/sessions/{id}/rules/a.txt/generate"), b"").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
