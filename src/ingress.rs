//! HTTP ingress: validates wire requests and enqueues [`Message`] values.
//!
//! Malformed requests are rejected here with `400` and never reach the
//! router.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::{
    Json, Router,
    extract::{Multipart, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use metrics::counter;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::message::{ChatType, Content, Message, MessageType, WireMessage};
use crate::metrics::ingress as ingress_metrics;
use crate::router::{Inbound, InboundSender};

/// Service name reported by `/health`.
pub const SERVICE_NAME: &str = "chat-relay";

#[derive(Clone)]
struct IngressState {
    inbound: InboundSender,
    upload_dir: PathBuf,
}

/// Build the router exposing `/message/*` and `/health`.
pub fn ingress_routes(inbound: InboundSender, upload_dir: PathBuf) -> Router {
    let state = IngressState {
        inbound,
        upload_dir,
    };

    Router::new()
        .route("/health", get(health))
        .route("/message/text", post(receive_text))
        .route("/message/image", post(receive_image))
        .route("/message/voice", post(receive_voice))
        .route("/message/file", post(receive_file))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Responses ───────────────────────────────────────────────────────────

fn reject(route: &'static str, err: &ValidationError) -> Response {
    warn!(route, error = %err, "Request rejected");
    counter!(ingress_metrics::REJECTED_TOTAL, "route" => route).increment(1);
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"status": "error", "message": err.to_string()})),
    )
        .into_response()
}

fn unavailable() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({"status": "error", "message": "router is not accepting messages"})),
    )
        .into_response()
}

fn enqueue(state: &IngressState, message: Message) -> bool {
    let sender_id = message.sender_id();
    let message_type = message.message_type();
    if state.inbound.send(Inbound::Message(message)).is_err() {
        warn!(sender_id, "Inbound queue closed, message not accepted");
        return false;
    }
    debug!(sender_id, message_type = %message_type, "Message enqueued");
    true
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": SERVICE_NAME}))
}

async fn receive_text(
    State(state): State<IngressState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    const ROUTE: &str = "text";

    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            return reject(
                ROUTE,
                &ValidationError::invalid("body", rejection.body_text()),
            );
        }
    };

    let message = match parse_text_body(&body) {
        Ok(message) => message,
        Err(e) => return reject(ROUTE, &e),
    };

    if !enqueue(&state, message) {
        return unavailable();
    }
    (
        StatusCode::OK,
        Json(json!({"status": "ok", "message": "message received"})),
    )
        .into_response()
}

async fn receive_image(state: State<IngressState>, multipart: Multipart) -> Response {
    receive_upload(state, multipart, UploadKind::IMAGE).await
}

async fn receive_voice(state: State<IngressState>, multipart: Multipart) -> Response {
    receive_upload(state, multipart, UploadKind::VOICE).await
}

async fn receive_file(state: State<IngressState>, multipart: Multipart) -> Response {
    receive_upload(state, multipart, UploadKind::FILE).await
}

// ── Text validation ─────────────────────────────────────────────────────

const TEXT_FIELDS: &[&str] = &[
    "sender_id",
    "sender",
    "chat_type",
    "character",
    "message_type",
    "message_send_time",
    "content",
];

/// Field-by-field validation so the client learns exactly which field is
/// wrong.
fn parse_text_body(body: &Value) -> Result<Message, ValidationError> {
    let object = body
        .as_object()
        .ok_or_else(|| ValidationError::invalid("body", "expected a JSON object"))?;

    for field in TEXT_FIELDS {
        if !object.contains_key(*field) {
            return Err(ValidationError::MissingField(field.to_string()));
        }
    }

    let integer = |field: &str| {
        object[field]
            .as_i64()
            .ok_or_else(|| ValidationError::invalid(field, "must be an integer"))
    };
    let string = |field: &str| {
        object[field]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| ValidationError::invalid(field, "must be a string"))
    };

    Message::from_wire(WireMessage {
        sender_id: integer("sender_id")?,
        sender: string("sender")?,
        chat_type: string("chat_type")?,
        character: integer("character")?,
        message_type: string("message_type")?,
        message_send_time: string("message_send_time")?,
        content: string("content")?,
    })
}

// ── Uploads ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct UploadKind {
    message_type: MessageType,
    /// Multipart part carrying the file.
    part: &'static str,
    /// Required content-type prefix.
    mime_prefix: &'static str,
    /// Directory under the upload root.
    dir: &'static str,
}

impl UploadKind {
    const IMAGE: Self = Self {
        message_type: MessageType::Image,
        part: "image",
        mime_prefix: "image/",
        dir: "images",
    };
    const VOICE: Self = Self {
        message_type: MessageType::Voice,
        part: "voice",
        mime_prefix: "audio/",
        dir: "voices",
    };
    const FILE: Self = Self {
        message_type: MessageType::File,
        part: "file",
        mime_prefix: "application/",
        dir: "files",
    };
}

const UPLOAD_FIELDS: &[&str] = &[
    "sender_id",
    "sender",
    "chat_type",
    "character",
    "message_send_time",
];

struct UploadedFile {
    file_name: String,
    bytes: Vec<u8>,
}

async fn receive_upload(
    State(state): State<IngressState>,
    mut multipart: Multipart,
    kind: UploadKind,
) -> Response {
    let route = kind.part;
    let mut form: HashMap<String, String> = HashMap::new();
    let mut upload: Option<UploadedFile> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return reject(route, &ValidationError::invalid("body", e.body_text())),
        };
        let name = field.name().unwrap_or_default().to_string();

        if name == kind.part {
            let content_type = field.content_type().unwrap_or_default().to_string();
            if !content_type.starts_with(kind.mime_prefix) {
                return reject(
                    route,
                    &ValidationError::UnsupportedContentType {
                        field: name,
                        content_type,
                    },
                );
            }
            let file_name = field.file_name().unwrap_or_default().to_string();
            if file_name.is_empty() {
                return reject(route, &ValidationError::invalid(name, "no file selected"));
            }
            let bytes = match field.bytes().await {
                Ok(bytes) => bytes.to_vec(),
                Err(e) => return reject(route, &ValidationError::invalid(name, e.body_text())),
            };
            upload = Some(UploadedFile { file_name, bytes });
        } else {
            match field.text().await {
                Ok(value) => {
                    form.insert(name, value);
                }
                Err(e) => return reject(route, &ValidationError::invalid(name, e.body_text())),
            }
        }
    }

    let Some(upload) = upload else {
        return reject(route, &ValidationError::MissingField(kind.part.to_string()));
    };

    let path = kind_dir(&state.upload_dir, kind).join(stored_name(&upload.file_name));
    let message = match build_upload_message(&form, kind, &path) {
        Ok(message) => message,
        Err(e) => return reject(route, &e),
    };

    if let Err(e) = store(&path, &upload.bytes).await {
        warn!(route, path = %path.display(), error = %e, "Failed to store upload");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"status": "error", "message": format!("upload failed: {e}")})),
        )
            .into_response();
    }
    info!(route, path = %path.display(), bytes = upload.bytes.len(), "Upload stored");

    if !enqueue(&state, message) {
        return unavailable();
    }
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "message": format!("{} received", kind.part),
            "path": path.display().to_string(),
        })),
    )
        .into_response()
}

fn build_upload_message(
    form: &HashMap<String, String>,
    kind: UploadKind,
    path: &Path,
) -> Result<Message, ValidationError> {
    for field in UPLOAD_FIELDS {
        if !form.contains_key(*field) {
            return Err(ValidationError::MissingField(field.to_string()));
        }
    }
    if let Some(declared) = form.get("message_type")
        && declared != kind.message_type.as_str()
    {
        return Err(ValidationError::invalid(
            "message_type",
            format!("must be {}", kind.message_type),
        ));
    }

    let integer = |field: &str| {
        form[field]
            .trim()
            .parse::<i64>()
            .map_err(|_| ValidationError::invalid(field, "must be an integer"))
    };
    let chat_type: ChatType = form["chat_type"].parse()?;

    Message::new(
        integer("sender_id")?,
        form["sender"].clone(),
        chat_type,
        integer("character")?,
        kind.message_type,
        form["message_send_time"].clone(),
        Content::File {
            path: path.display().to_string(),
        },
    )
}

fn kind_dir(root: &Path, kind: UploadKind) -> PathBuf {
    root.join(kind.dir)
}

/// Strip directory components and anything outside `[A-Za-z0-9._-]`, and
/// prefix a unique id so uploads never overwrite each other.
fn stored_name(original: &str) -> String {
    let base = original.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    let unique = Uuid::new_v4().simple();
    if cleaned.is_empty() {
        unique.to_string()
    } else {
        format!("{unique}_{cleaned}")
    }
}

async fn store(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await
}
