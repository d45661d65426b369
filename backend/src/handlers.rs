use annotation_proxy_shared::{ActionRequest, ActionResponse, AnnotationError, ErrorKind};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};

use crate::{request_context::RequestId, state::AppState};

/// Single action endpoint: `{action, payload}` in, the uniform envelope out.
pub async fn handle_action(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    body: Bytes,
) -> (StatusCode, Json<ActionResponse>) {
    let request_id = request_id
        .map(|Extension(RequestId(id))| id)
        .unwrap_or_default();

    let service = match state.service() {
        Ok(service) => service,
        Err(err) => return failure(err),
    };

    let request = match parse_request(&body) {
        Ok(request) => request,
        Err(err) => return failure(err),
    };
    let action = request.action.clone().unwrap_or_default();
    tracing::debug!("[{request_id}] dispatching action {action}");

    match service.dispatch(request).await {
        Ok(output) => (StatusCode::OK, Json(output.into())),
        Err(err) => {
            match err.kind() {
                ErrorKind::Validation | ErrorKind::NotFound => {
                    tracing::warn!("[{request_id}] action {action} rejected: {err}");
                },
                _ => tracing::error!("[{request_id}] action {action} failed: {err}"),
            }
            failure(err)
        },
    }
}

fn parse_request(body: &[u8]) -> Result<ActionRequest, AnnotationError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(ActionRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|err| AnnotationError::Validation(format!("Invalid request body: {err}")))
}

fn failure(err: AnnotationError) -> (StatusCode, Json<ActionResponse>) {
    (status_for(err.kind()), Json(ActionResponse::failure(err.to_string())))
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Config | ErrorKind::Upstream | ErrorKind::Corrupt => {
            StatusCode::INTERNAL_SERVER_ERROR
        },
    }
}
