//! TwiML webhooks for the voice line.
//!
//! Each caller turn is one HTTP round trip: Twilio posts what the caller said
//! (or a recording of it), the agent decides, and the response TwiML speaks
//! the reply and listens again.

use axum::extract::{Form, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use super::twiml::{Listen, Speech, Twiml};
use crate::greeting::select_greeting;
use crate::pipeline::agent::{AgentReply, CallAction, CallMeta};
use crate::settings::{load_voice_settings, SpeechEngine, VoiceSettings};
use crate::AppState;

const CLOSED_MESSAGE: &str =
    "Thanks for calling. Our automated assistant is unavailable right now.";
const CONNECTING_MESSAGE: &str = "Please hold while I connect you.";
const NO_ESCALATION_MESSAGE: &str =
    "Nobody is available to take your call right now. Please try again later. Goodbye.";
const TRANSCRIBE_FAILED_MESSAGE: &str =
    "Sorry, I had trouble hearing that. Could you say it again?";

/// Statuses after which Twilio sends no more webhooks for the call.
const TERMINAL_STATUSES: &[&str] = &["completed", "busy", "failed", "no-answer", "canceled"];

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct CallForm {
    pub call_sid: String,
    pub from: String,
    pub to: String,
    /// Set by `<Gather input="speech">`.
    pub speech_result: Option<String>,
    /// Set by `<Record>`.
    pub recording_url: Option<String>,
    /// Set on status callbacks.
    pub call_status: Option<String>,
}

impl CallForm {
    fn meta(&self) -> CallMeta {
        CallMeta {
            call_sid: self.call_sid.clone(),
            from: self.from.clone(),
            to: self.to.clone(),
        }
    }
}

/// POST /twilio/voice: incoming call.
pub async fn handle_voice(State(state): State<AppState>, Form(form): Form<CallForm>) -> Twiml {
    tracing::info!(call_sid = %form.call_sid, from = %form.from, "Incoming call");
    let settings = voice_settings(&state).await;

    if !settings.enabled {
        tracing::info!(call_sid = %form.call_sid, "Voice agent disabled, forwarding call");
        let twiml = Twiml::new().speak(&Speech::Say(CLOSED_MESSAGE.to_string()));
        return match escalation_target(&settings) {
            Some(number) => twiml.dial(number),
            None => twiml.hangup(),
        };
    }

    let greeting = if settings.greeting.trim().is_empty() {
        select_greeting(&settings.business_name)
    } else {
        settings.greeting.clone()
    };

    let speech = speech_for(&state, &settings, &greeting).await;
    let mode = settings.listen_mode(state.stt.is_configured());
    listen_again(&state, Twiml::new(), mode, &speech)
}

/// POST /twilio/voice/respond: Twilio speech recognition result.
pub async fn handle_respond(State(state): State<AppState>, Form(form): Form<CallForm>) -> Twiml {
    let input = form.speech_result.clone().unwrap_or_default();
    tracing::info!(call_sid = %form.call_sid, input = %input, "Caller said");
    take_turn(&state, &form, &input).await
}

/// POST /twilio/voice/recording: `<Record>` finished; transcribe with Deepgram.
pub async fn handle_recording(
    State(state): State<AppState>,
    Form(form): Form<CallForm>,
) -> Twiml {
    let Some(url) = form.recording_url.as_deref().filter(|u| !u.is_empty()) else {
        tracing::warn!(call_sid = %form.call_sid, "Recording callback without RecordingUrl");
        return take_turn(&state, &form, "").await;
    };

    let transcript = match state.twilio.fetch_recording(url).await {
        Ok((audio, content_type)) => state
            .stt
            .transcribe(audio, &content_type)
            .await
            .map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    match transcript {
        Ok(text) => {
            tracing::info!(call_sid = %form.call_sid, input = %text, "Caller said");
            take_turn(&state, &form, &text).await
        }
        Err(e) => {
            tracing::error!(call_sid = %form.call_sid, "Transcription failed: {e}");
            let settings = voice_settings(&state).await;
            let speech = Speech::Say(TRANSCRIBE_FAILED_MESSAGE.to_string());
            let mode = settings.listen_mode(state.stt.is_configured());
            listen_again(&state, Twiml::new(), mode, &speech)
        }
    }
}

/// POST /twilio/voice/status: call status callback.
pub async fn handle_status(
    State(state): State<AppState>,
    Form(form): Form<CallForm>,
) -> StatusCode {
    let status = form.call_status.as_deref().unwrap_or_default();
    tracing::debug!(call_sid = %form.call_sid, status, "Call status");
    if TERMINAL_STATUSES.contains(&status) {
        if let Some(messages) = state.agent.end_session(&form.call_sid).await {
            tracing::info!(call_sid = %form.call_sid, status, messages, "Call ended");
        }
    }
    StatusCode::NO_CONTENT
}

/// GET /twilio/audio/{id}: a synthesized clip referenced by `<Play>`.
pub async fn serve_clip(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.clips.get(&id).await {
        Some(clip) => ([("Content-Type", clip.content_type)], clip.audio).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn take_turn(state: &AppState, form: &CallForm, input: &str) -> Twiml {
    let settings = voice_settings(state).await;
    let meta = form.meta();
    let reply = state
        .agent
        .handle_turn(&meta, input, &settings.agent_context())
        .await;
    tracing::info!(call_sid = %meta.call_sid, action = ?reply.action, "Agent replied");

    if reply.action == CallAction::SendBookingLink {
        send_booking_link(state, &meta, &settings);
    }
    if matches!(reply.action, CallAction::Escalate | CallAction::EndCall) {
        state.agent.end_session(&meta.call_sid).await;
    }

    let speech = speech_for(state, &settings, &reply.message).await;
    let mode = settings.listen_mode(state.stt.is_configured());
    match reply.action {
        CallAction::Continue | CallAction::SendBookingLink => {
            listen_again(state, Twiml::new(), mode, &speech)
        }
        _ => render_closing(&reply, &speech, escalation_target(&settings)),
    }
}

/// TwiML for a reply that ends the agent's part of the call.
fn render_closing(reply: &AgentReply, speech: &Speech, escalation: Option<&str>) -> Twiml {
    match (reply.action, escalation) {
        (CallAction::Escalate, Some(number)) => Twiml::new()
            .speak(speech)
            .speak(&Speech::Say(CONNECTING_MESSAGE.to_string()))
            .dial(number),
        (CallAction::Escalate, None) => Twiml::new()
            .speak(&Speech::Say(NO_ESCALATION_MESSAGE.to_string()))
            .hangup(),
        _ => Twiml::new().speak(speech).hangup(),
    }
}

/// Speak, listen, and loop back to the respond handler if nothing was heard.
fn listen_again(state: &AppState, twiml: Twiml, mode: Listen, speech: &Speech) -> Twiml {
    let base = &state.config.server.external_url;
    let action = match mode {
        Listen::Gather => callback_url(base, "/twilio/voice/respond"),
        Listen::Record => callback_url(base, "/twilio/voice/recording"),
    };
    twiml
        .listen(mode, &action, speech)
        .redirect(&callback_url(base, "/twilio/voice/respond"))
}

fn send_booking_link(state: &AppState, meta: &CallMeta, settings: &VoiceSettings) {
    if settings.booking_url.is_empty() || meta.from.is_empty() {
        tracing::warn!(
            call_sid = %meta.call_sid,
            "Booking link requested but no URL or caller number"
        );
        return;
    }
    let twilio = state.twilio.clone();
    let to = meta.from.clone();
    let call_sid = meta.call_sid.clone();
    let body = format!(
        "Thanks for calling {}! Book your rental here: {}",
        settings.business_name, settings.booking_url
    );
    tokio::spawn(async move {
        match twilio.send_sms(&to, &body).await {
            Ok(sid) => tracing::info!(%call_sid, message_sid = %sid, "Booking link sent"),
            Err(e) => tracing::error!(%call_sid, "Failed to send booking link: {e}"),
        }
    });
}

/// ElevenLabs clip when selected and available, otherwise Twilio `<Say>`.
async fn speech_for(state: &AppState, settings: &VoiceSettings, text: &str) -> Speech {
    if settings.speech != SpeechEngine::ElevenLabs || !state.tts.is_configured() {
        return Speech::Say(text.to_string());
    }
    let audio = if settings.voice_id.is_empty() {
        state.tts.synthesize(text).await
    } else {
        state.tts.synthesize_with_voice(text, &settings.voice_id).await
    };
    match audio {
        Ok(audio) => {
            let id = state.clips.insert(audio).await;
            Speech::Play(callback_url(
                &state.config.server.external_url,
                &format!("/twilio/audio/{id}"),
            ))
        }
        Err(e) => {
            tracing::warn!("TTS failed, falling back to <Say>: {e}");
            Speech::Say(text.to_string())
        }
    }
}

async fn voice_settings(state: &AppState) -> VoiceSettings {
    match load_voice_settings(&state.db, &state.config.voice).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("Could not load voice settings, using defaults: {e}");
            VoiceSettings::defaults(&state.config.voice)
        }
    }
}

fn escalation_target(settings: &VoiceSettings) -> Option<&str> {
    Some(settings.escalation_number.trim()).filter(|n| !n.is_empty())
}

pub fn callback_url(external_url: &str, path: &str) -> String {
    format!("{}{path}", external_url.trim_end_matches('/'))
}
