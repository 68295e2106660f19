use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{log_activity, require_admin};
use crate::error::ApiError;
use crate::models::{SETTINGS_DOC, SMS_SETTINGS, VOICE_SETTINGS};
use crate::notify::{Delivery, SmsSettings};
use crate::pipeline::agent::ActiveCall;
use crate::settings::{load_sms_settings, load_voice_settings, VoiceSettings};
use crate::twilio::validate_e164;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TestSmsRequest {
    /// Defaults to the admin number in the SMS settings.
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TestSmsResponse {
    pub to: String,
    #[serde(flatten)]
    pub delivery: Delivery,
}

/// GET /api/admin/sms-settings
pub async fn get_sms_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<SmsSettings>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(load_sms_settings(&state.db).await?))
}

/// PUT /api/admin/sms-settings
pub async fn put_sms_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(settings): Json<SmsSettings>,
) -> Result<Json<SmsSettings>, ApiError> {
    let admin = require_admin(&state, &headers).await?;

    if settings.enabled && !validate_e164(&settings.phone_number) {
        return Err(ApiError::BadRequest(
            "phone_number must be in E.164 format (+<digits>)".to_string(),
        ));
    }

    let doc = state
        .db
        .set(SMS_SETTINGS, SETTINGS_DOC, &settings.to_document())
        .await?;
    let saved = SmsSettings::from_document(&doc);

    log_activity(
        &state,
        &admin,
        "sms_settings_updated",
        SETTINGS_DOC,
        json!({ "enabled": saved.enabled }),
    )
    .await;

    Ok(Json(saved))
}

/// POST /api/admin/sms/test
pub async fn send_test_sms(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TestSmsRequest>,
) -> Result<Json<TestSmsResponse>, ApiError> {
    let admin = require_admin(&state, &headers).await?;

    let settings = load_sms_settings(&state.db).await?;
    let to = req
        .to
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| settings.phone_number.clone());
    if !validate_e164(&to) {
        return Err(ApiError::BadRequest(format!(
            "no valid destination number (got {to:?})"
        )));
    }
    let body = req
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| "Test notification from your rental desk.".to_string());

    let delivery = state.notifier.send(&to, &body, &settings).await?;
    log_activity(&state, &admin, "sms_test", &to, json!({ "delivery": &delivery })).await;

    Ok(Json(TestSmsResponse { to, delivery }))
}

/// GET /api/admin/voice-settings
pub async fn get_voice_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<VoiceSettings>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(
        load_voice_settings(&state.db, &state.config.voice).await?,
    ))
}

/// PUT /api/admin/voice-settings
pub async fn put_voice_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(settings): Json<VoiceSettings>,
) -> Result<Json<VoiceSettings>, ApiError> {
    let admin = require_admin(&state, &headers).await?;

    let escalation = settings.escalation_number.trim();
    if !escalation.is_empty() && !validate_e164(escalation) {
        return Err(ApiError::BadRequest(
            "escalation_number must be in E.164 format (+<digits>)".to_string(),
        ));
    }
    if settings.business_name.trim().is_empty() {
        return Err(ApiError::BadRequest("business_name is required".to_string()));
    }

    let doc = state
        .db
        .set(VOICE_SETTINGS, SETTINGS_DOC, &settings.to_document())
        .await?;
    let saved = VoiceSettings::from_document(&doc, &state.config.voice);

    log_activity(
        &state,
        &admin,
        "voice_settings_updated",
        SETTINGS_DOC,
        json!({
            "enabled": saved.enabled,
            "speech": saved.speech,
            "transcription": saved.transcription,
        }),
    )
    .await;

    Ok(Json(saved))
}

/// GET /api/admin/calls: calls the voice agent is currently handling.
pub async fn list_active_calls(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ActiveCall>>, ApiError> {
    require_admin(&state, &headers).await?;
    Ok(Json(state.agent.active_calls().await))
}
