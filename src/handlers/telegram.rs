//! Telegram login callback endpoint.
//!
//! Reads the composite `tgAuthResult` form field produced by the callback
//! normalizer and acknowledges the login payload it carries. Signature
//! verification against the bot token is not performed here.

use axum::extract::rejection::FormRejection;
use axum::http::StatusCode;
use axum::{Form, Json};
use tracing::{info, instrument};

use crate::error::{AppError, AppResult};
use crate::models::{
    COMPOSITE_FIELD, CallbackAccepted, CallbackPayload, CompositeCallbackForm, FieldValue,
};

/// Accept a normalized Telegram login callback.
///
/// # Request Body
///
/// ```text
/// tgAuthResult=%7B%22id%22%3A%2242%22%2C%22hash%22%3A%22abc%22%7D
/// ```
///
/// # Errors
///
/// `400 Bad Request` when the body is not a form, the field is missing or
/// undecodable, or the payload carries no `id`, `hash` or `auth_date`.
/// `413 Payload Too Large` when the body exceeds `MAX_REQUEST_BODY_SIZE`.
#[instrument(skip(form))]
pub async fn telegram_callback(
    form: Result<Form<CompositeCallbackForm>, FormRejection>,
) -> AppResult<(StatusCode, Json<CallbackAccepted>)> {
    let Form(form) = form.map_err(|e| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(e.body_text())
        } else {
            AppError::BadRequest(e.body_text())
        }
    })?;

    let raw = form
        .tg_auth_result
        .ok_or_else(|| AppError::BadRequest(format!("missing '{COMPOSITE_FIELD}' field")))?;

    let payload = CallbackPayload::from_composite(&raw)
        .ok_or_else(|| AppError::BadRequest(format!("'{COMPOSITE_FIELD}' is not a login payload")))?;

    if !payload.has_proof() {
        return Err(AppError::BadRequest(
            "login payload has no id, hash or auth_date".to_string(),
        ));
    }

    let telegram_id = payload.id.as_ref().map(FieldValue::as_text);
    let username = payload.username.as_ref().map(FieldValue::as_text);
    info!(
        telegram_id = telegram_id.as_deref().unwrap_or_default(),
        "Telegram login callback accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(CallbackAccepted {
            status: "accepted",
            telegram_id,
            username,
        }),
    ))
}
