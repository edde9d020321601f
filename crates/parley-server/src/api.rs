use std::sync::Arc;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::Method,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use parley_shared::constants::UPLOADS_URL_PREFIX;
use parley_shared::{Message, MessageKey, RoomId, UserId};
use parley_store::{EditOutcome, Report, ReportStore, StoreError, StoredReport, UploadStore};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::hub::ChatHub;
use crate::ws::ws_handler;

/// Multipart framing on top of the attachment itself.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ChatHub>,
    pub uploads: Arc<UploadStore>,
    pub reports: Arc<ReportStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    let body_limit = state.config.max_upload_size + MULTIPART_OVERHEAD;
    let uploads = ServeDir::new(state.uploads.base_path());

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route("/api/messages/upload", post(upload_attachment))
        .route("/api/messages/delete", post(delete_messages))
        .route("/api/messages/edit", post(edit_message))
        .route("/api/messages/:room_id", get(get_messages))
        .route("/api/block", post(block_user))
        .route("/api/unblock", post(unblock_user))
        .route("/api/block-status", get(block_status))
        .route("/api/blocked-users", get(blocked_users))
        .route("/api/report", post(file_report))
        .route("/api/presence/:user_id", get(presence_of))
        .route("/api/admin/online-users", get(online_users))
        .route("/api/admin/reports", get(list_reports))
        .route("/api/admin/reports/:report_id", get(get_report))
        .nest_service(UPLOADS_URL_PREFIX, uploads)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct SuccessResponse {
    success: bool,
}

#[derive(Serialize)]
struct BlockResponse {
    blocked: bool,
}

#[derive(Serialize)]
struct CountResponse {
    count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PresenceResponse {
    user_id: UserId,
    online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_seen: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BlockedUserView {
    user_id: UserId,
    username: String,
    full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    avatar: Option<String>,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum DeleteScope {
    /// Hide for the requesting user only.
    Me,
    /// Remove from the log.
    Everyone,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteRequest {
    room_id: RoomId,
    ids: Vec<String>,
    #[serde(rename = "type")]
    scope: DeleteScope,
    user_id: Option<UserId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditRequest {
    room_id: RoomId,
    msg_id: String,
    text: String,
    user_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockRequest {
    user_id: UserId,
    target_id: UserId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserQuery {
    user_id: UserId,
}

#[derive(Deserialize)]
struct ReportRequest {
    reporter: Option<String>,
    reported: Option<String>,
    reason: Option<String>,
    time: Option<serde_json::Value>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Full log of a room. Logs that cannot be read come back empty.
async fn get_messages(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let room = RoomId::new(room_id);
    room.validate()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;

    match state.hub.logs().load(&room).await {
        Ok(log) => Ok(Json(log)),
        Err(e) => {
            warn!(room = %room, error = %e, "Serving empty log");
            Ok(Json(Vec::new()))
        }
    }
}

async fn upload_attachment(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Message>, ServerError> {
    let mut file: Option<(Option<String>, Option<String>, Vec<u8>)> = None;
    let mut room_id = None;
    let mut from = None;
    let mut to = None;
    let mut time = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
            file = Some((file_name, content_type, data.to_vec()));
            continue;
        }

        let value = field
            .text()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
        match name.as_str() {
            "roomId" => room_id = Some(value),
            "from" => from = Some(value),
            "to" => to = Some(value),
            "time" => time = Some(value),
            _ => {}
        }
    }

    let (file_name, content_type, data) =
        file.ok_or_else(|| ServerError::BadRequest("No file uploaded".to_string()))?;
    let room = RoomId::new(non_empty(room_id, "roomId")?);
    room.validate()
        .map_err(|e| ServerError::BadRequest(e.to_string()))?;
    let from = UserId::new(non_empty(from, "from")?);
    let time = non_empty(time, "time")?
        .trim()
        .parse::<i64>()
        .map_err(|_| ServerError::BadRequest("time must be a number".to_string()))?;

    let stored = state.uploads.store(file_name.as_deref(), &data).await?;

    let message = Message {
        from,
        to: to.filter(|t| !t.is_empty()).map(UserId::new),
        room_id: Some(room.clone()),
        time,
        text: None,
        file_url: Some(UploadStore::url_for(&stored)),
        file_type: Some(content_type.unwrap_or_else(|| "application/octet-stream".to_string())),
        delivered: false,
        seen: false,
        edited: false,
        deleted_for: Vec::new(),
    };
    if let Err(e) = state.hub.logs().append(&room, message.clone()).await {
        if let Err(cleanup) = state.uploads.remove(&stored).await {
            warn!(file = %stored, error = %cleanup, "Failed to remove orphaned upload");
        }
        return Err(e.into());
    }

    info!(room = %room, file = %stored, size = data.len(), "Attachment uploaded");
    Ok(Json(message))
}

async fn delete_messages(
    State(state): State<AppState>,
    payload: Result<Json<DeleteRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ServerError> {
    let Json(req) = payload?;
    let keys = parse_keys(&req.ids)?;
    let logs = state.hub.logs();

    match req.scope {
        DeleteScope::Me => {
            let user = req
                .user_id
                .filter(|u| !u.is_empty())
                .ok_or_else(|| ServerError::BadRequest("userId is required".to_string()))?;
            logs.soft_delete(&req.room_id, &keys, &user).await?;
        }
        DeleteScope::Everyone => {
            logs.hard_delete(&req.room_id, &keys).await?;
        }
    }

    Ok(Json(SuccessResponse { success: true }))
}

/// Edits by anyone but the sender are ignored and still answered with
/// success.
async fn edit_message(
    State(state): State<AppState>,
    payload: Result<Json<EditRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ServerError> {
    let Json(req) = payload?;
    let key = parse_key(&req.msg_id)?;
    let outcome = state
        .hub
        .logs()
        .edit(&req.room_id, &key, &req.text, &req.user_id)
        .await?;

    match outcome {
        EditOutcome::Applied(_) => info!(room = %req.room_id, key = %key, "Message edited"),
        EditOutcome::NotFound => warn!(room = %req.room_id, key = %key, "Edit of missing message"),
        EditOutcome::NotSender => warn!(
            room = %req.room_id,
            key = %key,
            user = %req.user_id,
            "Edit by non-sender ignored"
        ),
    }

    Ok(Json(SuccessResponse { success: true }))
}

async fn block_user(
    State(state): State<AppState>,
    payload: Result<Json<BlockRequest>, JsonRejection>,
) -> Result<Json<BlockResponse>, ServerError> {
    let Json(req) = payload?;
    require_ids(&req.user_id, &req.target_id)?;
    state.hub.blocks().block(&req.user_id, &req.target_id);
    Ok(Json(BlockResponse { blocked: true }))
}

async fn unblock_user(
    State(state): State<AppState>,
    payload: Result<Json<BlockRequest>, JsonRejection>,
) -> Result<Json<BlockResponse>, ServerError> {
    let Json(req) = payload?;
    require_ids(&req.user_id, &req.target_id)?;
    state.hub.blocks().unblock(&req.user_id, &req.target_id);
    Ok(Json(BlockResponse { blocked: false }))
}

async fn block_status(
    State(state): State<AppState>,
    query: Result<Query<BlockRequest>, QueryRejection>,
) -> Result<Json<BlockResponse>, ServerError> {
    let Query(req) = query?;
    Ok(Json(BlockResponse {
        blocked: state.hub.blocks().is_blocked(&req.user_id, &req.target_id),
    }))
}

async fn blocked_users(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<Vec<BlockedUserView>>, ServerError> {
    let Query(query) = query?;
    let ids = state.hub.blocks().blocked_by(&query.user_id);
    if ids.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let profiles = state
        .hub
        .directory()
        .find_many_by_ids(&ids)
        .await
        .map_err(|e| ServerError::Internal(format!("Directory lookup failed: {e}")))?;

    Ok(Json(
        profiles
            .into_iter()
            .map(|p| BlockedUserView {
                user_id: p.user_id,
                username: p.username,
                full_name: p.full_name,
                avatar: p.avatar,
            })
            .collect(),
    ))
}

async fn file_report(
    State(state): State<AppState>,
    payload: Result<Json<ReportRequest>, JsonRejection>,
) -> Result<Json<SuccessResponse>, ServerError> {
    let Json(req) = payload?;
    let missing = || ServerError::BadRequest("Missing fields".to_string());
    let reporter = req.reporter.filter(|s| !s.is_empty()).ok_or_else(missing)?;
    let reported = req.reported.filter(|s| !s.is_empty()).ok_or_else(missing)?;
    let reason = req.reason.filter(|s| !s.is_empty()).ok_or_else(missing)?;

    let report = Report {
        reporter: UserId::new(reporter),
        reported: UserId::new(reported),
        reason,
        time: req.time,
    };
    state.reports.save(&report).await?;

    Ok(Json(SuccessResponse { success: true }))
}

/// Live presence plus the directory's last-seen, if known.
async fn presence_of(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceResponse>, ServerError> {
    let user = UserId::new(user_id);
    let online = state.hub.presence().is_online(&user);
    let last_seen = state
        .hub
        .directory()
        .find_by_id(&user)
        .await
        .map_err(|e| ServerError::Internal(format!("Directory lookup failed: {e}")))?
        .and_then(|profile| profile.last_seen);

    Ok(Json(PresenceResponse {
        user_id: user,
        online,
        last_seen,
    }))
}

async fn online_users(State(state): State<AppState>) -> Json<CountResponse> {
    Json(CountResponse {
        count: state.hub.presence().online_count(),
    })
}

async fn list_reports(
    State(state): State<AppState>,
) -> Result<Json<Vec<StoredReport>>, ServerError> {
    Ok(Json(state.reports.list().await?))
}

async fn get_report(
    State(state): State<AppState>,
    Path(report_id): Path<String>,
) -> Result<Json<StoredReport>, ServerError> {
    let report = state.reports.load(&report_id).await.map_err(|e| match e {
        StoreError::NotFound => ServerError::NotFound(format!("report {report_id}")),
        other => other.into(),
    })?;
    Ok(Json(StoredReport {
        id: report_id,
        report,
    }))
}

fn non_empty(value: Option<String>, field: &str) -> Result<String, ServerError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ServerError::BadRequest(format!("Missing field '{field}'")))
}

fn require_ids(user: &UserId, target: &UserId) -> Result<(), ServerError> {
    if user.is_empty() || target.is_empty() {
        return Err(ServerError::BadRequest(
            "userId and targetId are required".to_string(),
        ));
    }
    Ok(())
}

fn parse_key(id: &str) -> Result<MessageKey, ServerError> {
    id.parse()
        .map_err(|e: parley_shared::ProtocolError| ServerError::BadRequest(e.to_string()))
}

fn parse_keys(ids: &[String]) -> Result<Vec<MessageKey>, ServerError> {
    ids.iter().map(|id| parse_key(id)).collect()
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    use crate::blocks::BlockRegistry;
    use crate::directory::{MemoryDirectory, UserProfile};
    use crate::presence::PresenceTracker;
    use parley_store::RoomLogStore;

    async fn test_state() -> (AppState, Arc<MemoryDirectory>, TempDir) {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().to_path_buf(),
            max_upload_size: 1024,
            ..ServerConfig::default()
        };
        let logs = RoomLogStore::open(config.messages_dir()).await.unwrap();
        let uploads = UploadStore::new(config.uploads_dir(), config.max_upload_size)
            .await
            .unwrap();
        let reports = ReportStore::open(config.reports_dir()).await.unwrap();
        let directory = Arc::new(MemoryDirectory::new());
        let hub = Arc::new(ChatHub::new(
            Arc::new(PresenceTracker::new()),
            Arc::new(BlockRegistry::new()),
            Arc::new(logs),
            directory.clone(),
        ));
        let state = AppState {
            hub,
            uploads: Arc::new(uploads),
            reports: Arc::new(reports),
            config: Arc::new(config),
        };
        (state, directory, dir)
    }

    async fn call(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn seed(state: &AppState, time: i64) {
        state
            .hub
            .logs()
            .append(
                &"r1".into(),
                Message::text("alice".into(), "bob".into(), "r1".into(), time, "hi"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _directory, _dir) = test_state().await;
        let (status, body) = call(&state, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_get_messages() {
        let (state, _directory, _dir) = test_state().await;
        let (status, body) = call(&state, get("/api/messages/r1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));

        seed(&state, 1000).await;
        let (_, body) = call(&state, get("/api/messages/r1")).await;
        assert_eq!(body[0]["from"], "alice");
        assert_eq!(body[0]["delivered"], false);
    }

    #[tokio::test]
    async fn test_corrupt_log_served_empty() {
        let (state, _directory, dir) = test_state().await;
        std::fs::write(dir.path().join("messages").join("r1.json"), b"garbage").unwrap();
        let (status, body) = call(&state, get("/api/messages/r1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_invalid_room_rejected() {
        let (state, _directory, _dir) = test_state().await;
        let (status, _) = call(&state, get("/api/messages/bad%20room")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_delete_for_me_and_everyone() {
        let (state, _directory, _dir) = test_state().await;
        seed(&state, 1).await;
        seed(&state, 2).await;

        let (status, body) = call(
            &state,
            post_json(
                "/api/messages/delete",
                json!({"roomId": "r1", "ids": ["alice-1"], "type": "me", "userId": "bob"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
        let log = state.hub.logs().load(&"r1".into()).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].deleted_for, vec![UserId::from("bob")]);

        let (status, _) = call(
            &state,
            post_json(
                "/api/messages/delete",
                json!({"roomId": "r1", "ids": ["alice-1", "alice-2"], "type": "everyone"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.hub.logs().load(&"r1".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_rejects_malformed_ids() {
        let (state, _directory, _dir) = test_state().await;
        seed(&state, 1).await;
        let (status, _) = call(
            &state,
            post_json(
                "/api/messages/delete",
                json!({"roomId": "r1", "ids": ["alice-1", "oops"], "type": "everyone"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(state.hub.logs().load(&"r1".into()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_edit_only_by_sender() {
        let (state, _directory, _dir) = test_state().await;
        seed(&state, 1000).await;

        let (status, body) = call(
            &state,
            post_json(
                "/api/messages/edit",
                json!({"roomId": "r1", "msgId": "alice-1000", "text": "pwned", "userId": "bob"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
        let log = state.hub.logs().load(&"r1".into()).await.unwrap();
        assert_eq!(log[0].text.as_deref(), Some("hi"));
        assert!(!log[0].edited);

        call(
            &state,
            post_json(
                "/api/messages/edit",
                json!({"roomId": "r1", "msgId": "alice-1000", "text": "hello", "userId": "alice"}),
            ),
        )
        .await;
        let log = state.hub.logs().load(&"r1".into()).await.unwrap();
        assert_eq!(log[0].text.as_deref(), Some("hello"));
        assert!(log[0].edited);
    }

    #[tokio::test]
    async fn test_block_endpoints() {
        let (state, directory, _dir) = test_state().await;
        directory
            .insert(UserProfile {
                user_id: "mallory".into(),
                username: "mal".into(),
                full_name: "Mallory".into(),
                avatar: Some("/a.png".into()),
                online: true,
                last_seen: None,
            })
            .await;

        let (_, body) = call(
            &state,
            post_json("/api/block", json!({"userId": "alice", "targetId": "mallory"})),
        )
        .await;
        assert_eq!(body, json!({"blocked": true}));

        let (_, body) = call(
            &state,
            get("/api/block-status?userId=alice&targetId=mallory"),
        )
        .await;
        assert_eq!(body, json!({"blocked": true}));
        let (_, body) = call(
            &state,
            get("/api/block-status?userId=mallory&targetId=alice"),
        )
        .await;
        assert_eq!(body, json!({"blocked": false}));

        let (_, body) = call(&state, get("/api/blocked-users?userId=alice")).await;
        assert_eq!(
            body,
            json!([{"userId": "mallory", "username": "mal", "fullName": "Mallory", "avatar": "/a.png"}])
        );

        let (_, body) = call(
            &state,
            post_json("/api/unblock", json!({"userId": "alice", "targetId": "mallory"})),
        )
        .await;
        assert_eq!(body, json!({"blocked": false}));
        let (_, body) = call(&state, get("/api/blocked-users?userId=alice")).await;
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_block_requires_ids() {
        let (state, _directory, _dir) = test_state().await;
        let (status, _) = call(
            &state,
            post_json("/api/block", json!({"userId": "", "targetId": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_report() {
        let (state, _directory, dir) = test_state().await;
        let (status, body) = call(
            &state,
            post_json("/api/report", json!({"reporter": "alice", "reason": "spam"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "Missing fields"}));

        let (status, body) = call(
            &state,
            post_json(
                "/api/report",
                json!({"reporter": "alice", "reported": "mallory", "reason": "spam", "time": 5}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));
        let filed = std::fs::read_dir(dir.path().join("reports")).unwrap().count();
        assert_eq!(filed, 1);
    }

    fn multipart(parts: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let boundary = "XPARLEYBOUNDARY";
        let mut body = Vec::new();
        for (name, file_name, data) in parts {
            body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());

        Request::builder()
            .method("POST")
            .uri("/api/messages/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_appends_attachment() {
        let (state, _directory, dir) = test_state().await;
        let request = multipart(&[
            ("roomId", None, b"r1"),
            ("from", None, b"alice"),
            ("to", None, b"bob"),
            ("time", None, b"1700"),
            ("file", Some("cat.png"), b"\x89PNG"),
        ]);
        let (status, body) = call(&state, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["from"], "alice");
        assert_eq!(body["time"], 1700);
        assert_eq!(body["fileType"], "image/png");
        assert_eq!(body["delivered"], false);
        let url = body["fileUrl"].as_str().unwrap().to_string();
        assert!(url.starts_with("/messages_uploads/"));
        assert!(url.ends_with(".png"));

        let log = state.hub.logs().load(&"r1".into()).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].file_url.as_deref(), Some(url.as_str()));

        let name = url.trim_start_matches("/messages_uploads/");
        let on_disk = dir.path().join("messages_uploads").join(name);
        assert_eq!(std::fs::read(on_disk).unwrap(), b"\x89PNG");

        let response = build_router(state.clone()).oneshot(get(&url)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let served = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&served[..], b"\x89PNG");
    }

    #[tokio::test]
    async fn test_upload_validation() {
        let (state, _directory, _dir) = test_state().await;

        let (status, body) = call(
            &state,
            multipart(&[("roomId", None, b"r1"), ("from", None, b"alice"), ("time", None, b"1")]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "No file uploaded"}));

        let (status, _) = call(
            &state,
            multipart(&[
                ("roomId", None, b"r1"),
                ("from", None, b"alice"),
                ("time", None, b"soon"),
                ("file", Some("a.png"), b"x"),
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(state.hub.logs().load(&"r1".into()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_presence_endpoints() {
        let (state, _directory, _dir) = test_state().await;
        state
            .hub
            .presence()
            .mark_online(&"alice".into(), parley_shared::ConnectionId::new());

        let (_, body) = call(&state, get("/api/presence/alice")).await;
        assert_eq!(body, json!({"userId": "alice", "online": true}));
        let (_, body) = call(&state, get("/api/presence/bob")).await;
        assert_eq!(body, json!({"userId": "bob", "online": false}));
        let (_, body) = call(&state, get("/api/admin/online-users")).await;
        assert_eq!(body, json!({"count": 1}));
    }

    #[tokio::test]
    async fn test_failed_append_removes_upload() {
        let (state, _directory, dir) = test_state().await;
        std::fs::write(dir.path().join("messages").join("r1.json"), b"garbage").unwrap();

        let (status, _) = call(
            &state,
            multipart(&[
                ("roomId", None, b"r1"),
                ("from", None, b"alice"),
                ("time", None, b"5"),
                ("file", Some("cat.png"), b"\x89PNG"),
            ]),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let leftover = std::fs::read_dir(dir.path().join("messages_uploads"))
            .unwrap()
            .count();
        assert_eq!(leftover, 0);
    }

    #[tokio::test]
    async fn test_missing_json_fields_are_bad_requests() {
        let (state, _directory, _dir) = test_state().await;
        seed(&state, 1000).await;

        let cases = [
            (
                "/api/messages/edit",
                json!({"roomId": "r1", "text": "x", "userId": "alice"}),
            ),
            ("/api/block", json!({"userId": "alice"})),
            ("/api/unblock", json!({"userId": "alice"})),
            (
                "/api/messages/delete",
                json!({"roomId": "r1", "type": "everyone"}),
            ),
            (
                "/api/messages/delete",
                json!({"roomId": "r1", "ids": ["alice-1000"], "type": "nobody"}),
            ),
        ];
        for (uri, body) in cases {
            let (status, body) = call(&state, post_json(uri, body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(body["error"].is_string(), "{uri}: {body}");
        }

        let request = Request::builder()
            .method("POST")
            .uri("/api/report")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = call(&state, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        // Nothing was touched.
        let log = state.hub.logs().load(&"r1".into()).await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(!log[0].edited);
    }

    #[tokio::test]
    async fn test_missing_query_fields_are_bad_requests() {
        let (state, _directory, _dir) = test_state().await;
        for uri in ["/api/block-status?userId=alice", "/api/blocked-users"] {
            let (status, body) = call(&state, get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert!(body["error"].is_string(), "{uri}: {body}");
        }
    }

    #[tokio::test]
    async fn test_admin_reports() {
        let (state, _directory, _dir) = test_state().await;
        let (_, body) = call(&state, get("/api/admin/reports")).await;
        assert_eq!(body, json!([]));

        call(
            &state,
            post_json(
                "/api/report",
                json!({"reporter": "alice", "reported": "mallory", "reason": "spam"}),
            ),
        )
        .await;

        let (status, body) = call(&state, get("/api/admin/reports")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["reporter"], "alice");
        assert_eq!(body[0]["reason"], "spam");
        let id = body[0]["id"].as_str().unwrap().to_string();

        let (status, body) = call(&state, get(&format!("/api/admin/reports/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["id"], id.as_str());
        assert_eq!(body["reported"], "mallory");

        let (status, body) = call(&state, get("/api/admin/reports/0-missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }
}
