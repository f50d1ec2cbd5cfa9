//! Axum Handlers for the REST API
//!
//! Registration and login forms. The chat screen itself lives in `ws`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use coach_core::{
    error::CoachError,
    profile::{LEVEL_OPTIONS, TARGET_OPTIONS},
    prompt::PRACTICE_AREAS,
};
use std::sync::Arc;
use tracing::{error, warn};

use crate::{
    models::{ErrorResponse, FormOptions, LoginPayload, ProfileView, RegisterPayload},
    state::AppState,
};

const GENERIC_LOGIN_FAILURE: &str = "Wrong phone number or password.";

/// What a failed login tells the user. Unknown identifiers and wrong passwords
/// read the same unless `reveal_reason` is set.
pub fn login_failure_message(err: &CoachError, reveal_reason: bool) -> String {
    match err {
        CoachError::NotFound { .. } | CoachError::BadCredential if !reveal_reason => {
            GENERIC_LOGIN_FAILURE.to_string()
        }
        other => other.user_message(),
    }
}

pub enum ApiError {
    Unprocessable { message: String, field: String },
    Conflict(String),
    NotFound(String),
    Unauthorized(String),
    ServiceUnavailable(String),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    /// Maps a core error. With `reveal_reason` off, unknown identifiers and
    /// wrong passwords produce the same response.
    pub fn from_coach(err: CoachError, reveal_reason: bool) -> Self {
        match err {
            CoachError::ValidationFailed { field } => Self::Unprocessable {
                message: err.user_message(),
                field: field.to_string(),
            },
            CoachError::AlreadyExists { .. } => Self::Conflict(err.user_message()),
            CoachError::NotFound { .. } if reveal_reason => Self::NotFound(err.user_message()),
            CoachError::BadCredential if reveal_reason => Self::Unauthorized(err.user_message()),
            CoachError::NotFound { .. } | CoachError::BadCredential => {
                Self::Unauthorized(login_failure_message(&err, false))
            }
            CoachError::StoreUnavailable(_) => {
                Self::ServiceUnavailable("Profiles are temporarily unavailable. Please try again.".to_string())
            }
            other => Self::InternalServerError(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unprocessable { message, field } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorResponse {
                    message,
                    field: Some(field),
                }),
            )
                .into_response(),
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse::new(message))).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse::new(message))).into_response()
            }
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, Json(ErrorResponse::new(message))).into_response()
            }
            ApiError::ServiceUnavailable(message) => {
                (StatusCode::SERVICE_UNAVAILABLE, Json(ErrorResponse::new(message))).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse::new(message)),
                )
                    .into_response()
            }
        }
    }
}

/// Register a new student profile.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterPayload,
    responses(
        (status = 201, description = "Profile created", body = ProfileView),
        (status = 409, description = "Identifier already registered", body = ErrorResponse),
        (status = 422, description = "A required field is empty", body = ErrorResponse),
        (status = 503, description = "Profile store unavailable", body = ErrorResponse)
    )
)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RegisterPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .sessions
        .register(&payload.identifier, &payload.password, payload.fields())
        .await
        .map_err(|e| ApiError::from_coach(e, true))?;

    let view = ProfileView::from(session.profile());
    state.sessions.logout(session);
    Ok((StatusCode::CREATED, Json(view)))
}

/// Check a student's credentials.
#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginPayload,
    responses(
        (status = 200, description = "Credentials accepted", body = ProfileView),
        (status = 401, description = "Wrong password, or unknown identifier when reasons are hidden", body = ErrorResponse),
        (status = 404, description = "Unknown identifier (only when reasons are revealed)", body = ErrorResponse),
        (status = 503, description = "Profile store unavailable", body = ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .sessions
        .authenticate(&payload.identifier, &payload.password)
        .await
        .map_err(|e| {
            warn!(reason = %e, "Login failed");
            ApiError::from_coach(e, state.login_reveal_reason)
        })?;

    let view = ProfileView::from(session.profile());
    state.sessions.logout(session);
    Ok((StatusCode::OK, Json(view)))
}

/// Choices offered by the registration form.
#[utoipa::path(
    get,
    path = "/form-options",
    responses(
        (status = 200, description = "Level, target and practice area choices", body = FormOptions)
    )
)]
pub async fn form_options() -> Json<FormOptions> {
    fn owned(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }
    Json(FormOptions {
        levels: owned(&LEVEL_OPTIONS),
        targets: owned(&TARGET_OPTIONS),
        practice_areas: owned(&PRACTICE_AREAS),
    })
}
