//! HTTP surface: the assistant pages plus the read-aloud API.
//!
//! - `GET /`, `GET /departments`: static pages
//! - `GET|POST /ai_assistant?department=..`: the question form and its answers
//! - `/speech/*`: start, pause, resume and stop read-aloud sessions

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::assistant::{Assistant, AssistantError, Upload};
use crate::pages::{self, AssistantView};
use crate::speech::session::SessionStatus;
use crate::speech::{SpeechOptions, SpeechSessions};

#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<Assistant>,
    /// `None` when no speech engine could be loaded.
    pub speech: Option<Arc<SpeechSessions>>,
    pub departments: Arc<Vec<String>>,
}

// --- Request/Response types ---

/// Raw query pairs; repeated keys are allowed.
type QueryPairs = Vec<(String, String)>;

/// First `department` value, or `General` when absent.
fn department_of(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .find(|(key, _)| key == "department")
        .map(|(_, value)| value.clone())
        .unwrap_or_else(|| "General".to_string())
}

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
    rate: Option<u32>,
    voice_index: Option<usize>,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stopped: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            session_id: None,
            stopped: None,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            session_id: None,
            stopped: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Serialize)]
struct SpeechStatusResponse {
    enabled: bool,
    voices: Vec<String>,
    sessions: Vec<SessionStatus>,
}

type ApiResponse = (StatusCode, Json<SimpleResponse>);

/// Build the axum router.
pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", get(handle_welcome))
        .route("/departments", get(handle_departments))
        .route("/ai_assistant", get(handle_assistant_form).post(handle_assistant_submit))
        .route("/speech/speak", post(handle_speak))
        .route("/speech/stop", post(handle_stop_all))
        .route("/speech/status", get(handle_speech_status))
        .route("/speech/{id}/pause", post(handle_pause))
        .route("/speech/{id}/resume", post(handle_resume))
        .route("/speech/{id}/stop", post(handle_stop))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(app: Router, addr: &str) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await
}

// --- Page handlers ---

async fn handle_welcome() -> Html<String> {
    Html(pages::welcome())
}

async fn handle_departments(State(state): State<AppState>) -> Html<String> {
    Html(pages::departments(&state.departments))
}

async fn handle_assistant_form(Query(query): Query<QueryPairs>) -> Html<String> {
    Html(pages::assistant(&AssistantView::empty(&department_of(&query))))
}

async fn handle_assistant_submit(
    State(state): State<AppState>,
    Query(query): Query<QueryPairs>,
    multipart: Multipart,
) -> (StatusCode, Html<String>) {
    let department = department_of(&query);

    let (prompt, upload) = match read_form(multipart).await {
        Ok(form) => form,
        Err(e) => {
            warn!("Rejected malformed form: {e}");
            let view = AssistantView::error(&department, None, format!("Invalid form data: {e}"));
            return (StatusCode::BAD_REQUEST, Html(pages::assistant(&view)));
        }
    };

    let Some(prompt) = prompt else {
        let view = AssistantView::error(&department, None, "Missing prompt field.");
        return (StatusCode::BAD_REQUEST, Html(pages::assistant(&view)));
    };

    info!(
        "POST /ai_assistant [{department}]: {} chars, file={:?}",
        prompt.len(),
        upload.as_ref().map(|u| u.file_name.as_str())
    );

    match state.assistant.answer(&prompt, upload).await {
        Ok(answer) => {
            let view = AssistantView {
                department,
                prompt: Some(prompt),
                error: None,
                response_html: Some(answer.html),
                response_text: Some(answer.text),
                show_content: true,
            };
            (StatusCode::OK, Html(pages::assistant(&view)))
        }
        Err(e) => {
            let status = match e {
                AssistantError::Save(_) => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::OK,
            };
            let view = AssistantView::error(&department, Some(&prompt), e.to_string());
            (status, Html(pages::assistant(&view)))
        }
    }
}

/// Pull `prompt` and `pdf_file` out of the multipart body; other fields are ignored.
async fn read_form(
    mut multipart: Multipart,
) -> Result<(Option<String>, Option<Upload>), axum::extract::multipart::MultipartError> {
    let mut prompt = None;
    let mut upload = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "prompt" => prompt = Some(field.text().await?),
            "pdf_file" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?.to_vec();
                upload = Some(Upload { file_name, bytes });
            }
            _ => {}
        }
    }

    Ok((prompt, upload))
}

// --- Speech handlers ---

fn speech_disabled() -> ApiResponse {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(SimpleResponse::err("speech is disabled")),
    )
}

fn unknown_session(id: u64) -> ApiResponse {
    (
        StatusCode::NOT_FOUND,
        Json(SimpleResponse::err(format!("unknown session: {id}"))),
    )
}

async fn handle_speak(State(state): State<AppState>, Json(req): Json<SpeakRequest>) -> ApiResponse {
    let Some(speech) = state.speech else {
        return speech_disabled();
    };
    if req.text.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, Json(SimpleResponse::err("empty text")));
    }

    let defaults = speech.defaults();
    let options = SpeechOptions {
        rate: req.rate.unwrap_or(defaults.rate),
        voice_index: req.voice_index.unwrap_or(defaults.voice_index),
    };

    let preview: String = req.text.chars().take(80).collect();
    info!(
        "POST /speech/speak: \"{}{}\" ({} chars, rate={}, voice={})",
        preview.replace('\n', " "),
        if req.text.chars().count() > 80 { "..." } else { "" },
        req.text.len(),
        options.rate,
        options.voice_index,
    );

    match speech.start(req.text, options) {
        Ok(id) => (
            StatusCode::OK,
            Json(SimpleResponse {
                session_id: Some(id),
                ..SimpleResponse::ok("speaking")
            }),
        ),
        Err(e) => {
            warn!("Failed to start speech: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SimpleResponse::err(e.to_string())),
            )
        }
    }
}

fn control(
    state: &AppState,
    id: u64,
    action: fn(&SpeechSessions, u64) -> bool,
    status: &str,
) -> ApiResponse {
    let Some(speech) = &state.speech else {
        return speech_disabled();
    };
    if !action(speech, id) {
        return unknown_session(id);
    }
    info!("Speech session {id}: {status}");
    (
        StatusCode::OK,
        Json(SimpleResponse {
            session_id: Some(id),
            ..SimpleResponse::ok(status)
        }),
    )
}

async fn handle_pause(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResponse {
    control(&state, id, SpeechSessions::pause, "paused")
}

async fn handle_resume(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResponse {
    control(&state, id, SpeechSessions::resume, "resumed")
}

async fn handle_stop(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResponse {
    control(&state, id, SpeechSessions::stop, "stopped")
}

async fn handle_stop_all(State(state): State<AppState>) -> ApiResponse {
    let Some(speech) = state.speech else {
        return speech_disabled();
    };
    let stopped = speech.stop_all();
    info!("Stopped {stopped} speech sessions");
    (
        StatusCode::OK,
        Json(SimpleResponse {
            stopped: Some(stopped),
            ..SimpleResponse::ok("stopped")
        }),
    )
}

async fn handle_speech_status(State(state): State<AppState>) -> Json<SpeechStatusResponse> {
    Json(match &state.speech {
        Some(speech) => SpeechStatusResponse {
            enabled: true,
            voices: speech.voices(),
            sessions: speech.status(),
        },
        None => SpeechStatusResponse {
            enabled: false,
            voices: Vec::new(),
            sessions: Vec::new(),
        },
    })
}
