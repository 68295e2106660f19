use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

use super::llm::{ChatMessage, ChatModel};

/// Caller phrases that skip the model and go straight to a human.
pub const ESCALATION_PHRASES: &[&str] = &[
    "speak to a person",
    "speak to someone",
    "talk to a person",
    "talk to someone",
    "human agent",
    "real person",
    "representative",
    "operator",
    "manager",
];

/// Caller phrases that end the call.
pub const END_CALL_PHRASES: &[&str] = &[
    "goodbye",
    "that's all",
    "that is all",
    "hang up",
    "no thank you bye",
];

/// Phrases (from caller or model) that mean the caller should get the booking link by SMS.
pub const BOOKING_LINK_PHRASES: &[&str] = &[
    "booking link",
    "send you a link",
    "text you a link",
    "text me the link",
    "send me the link",
    "book online",
];

const ESCALATION_MESSAGE: &str = "Let me connect you with a member of our team. One moment please.";
const FAILURE_MESSAGE: &str =
    "I'm having trouble right now. Let me connect you with a member of our team.";
const EMPTY_INPUT_MESSAGE: &str = "Sorry, I didn't catch that. Could you say that again?";
const SILENT_LINE_MESSAGE: &str =
    "I'm not hearing anything, so I'll end the call. Please call back any time. Goodbye.";

/// Consecutive turns without speech before the call is ended.
const MAX_SILENT_TURNS: u32 = 3;

/// Oldest messages are dropped past this many.
const MAX_HISTORY: usize = 40;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallAction {
    Continue,
    Escalate,
    SendBookingLink,
    EndCall,
}

/// Who is on the line.
#[derive(Debug, Clone, Default)]
pub struct CallMeta {
    pub call_sid: String,
    pub from: String,
    pub to: String,
}

/// Per-turn business context, read from the voice settings.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    pub business_name: String,
    pub booking_url: String,
    pub instructions: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentReply {
    pub action: CallAction,
    pub message: String,
}

/// Summary of a live call for the admin dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveCall {
    pub call_sid: String,
    pub from: String,
    pub turns: usize,
    pub idle_secs: u64,
}

/// Drives one conversation per call SID against a chat model.
pub struct CallAgent<M> {
    model: M,
    sessions: Mutex<HashMap<String, Session>>,
    session_timeout: Duration,
}

struct Session {
    meta: CallMeta,
    transcript: Vec<ChatMessage>,
    last_used: Instant,
    silent_turns: u32,
}

impl Session {
    fn new(meta: &CallMeta) -> Self {
        Self {
            meta: meta.clone(),
            transcript: Vec::new(),
            last_used: Instant::now(),
            silent_turns: 0,
        }
    }
}

impl<M: ChatModel> CallAgent<M> {
    pub fn new(model: M, session_timeout_secs: u64) -> Self {
        Self {
            model,
            sessions: Mutex::new(HashMap::new()),
            session_timeout: Duration::from_secs(session_timeout_secs),
        }
    }

    /// Handle one caller utterance and decide what the call does next.
    pub async fn handle_turn(
        &self,
        meta: &CallMeta,
        input: &str,
        ctx: &AgentContext,
    ) -> AgentReply {
        let input = input.trim();
        if input.is_empty() {
            return self.silent_turn(meta).await;
        }

        let transcript = {
            let mut sessions = self.sessions.lock().await;
            sessions.retain(|_, s| s.last_used.elapsed() < self.session_timeout);

            let session = sessions
                .entry(meta.call_sid.clone())
                .or_insert_with(|| Session::new(meta));
            session.last_used = Instant::now();
            session.silent_turns = 0;
            push_capped(&mut session.transcript, ChatMessage::user(input));
            session.transcript.clone()
        };

        if let Some(action) = classify_input(input) {
            let message = match action {
                CallAction::EndCall => {
                    format!("Thanks for calling {}. Goodbye!", ctx.business_name)
                }
                _ => ESCALATION_MESSAGE.to_string(),
            };
            tracing::info!(call_sid = %meta.call_sid, ?action, "Caller phrase matched");
            self.record_reply(&meta.call_sid, &message).await;
            return AgentReply { action, message };
        }

        let mut messages = Vec::with_capacity(transcript.len() + 1);
        messages.push(ChatMessage::system(system_prompt(ctx)));
        messages.extend(transcript);

        tracing::info!(
            call_sid = %meta.call_sid,
            turns = messages.len() - 1,
            "Sending transcript to model"
        );

        match self.model.complete(&messages).await {
            Ok(reply) => {
                self.record_reply(&meta.call_sid, &reply).await;
                let wants_link = contains_any(input, BOOKING_LINK_PHRASES)
                    || contains_any(&reply, BOOKING_LINK_PHRASES);
                let action = if wants_link && !ctx.booking_url.is_empty() {
                    CallAction::SendBookingLink
                } else {
                    CallAction::Continue
                };
                tracing::info!(
                    call_sid = %meta.call_sid,
                    ?action,
                    reply_len = reply.len(),
                    "Model replied"
                );
                AgentReply {
                    action,
                    message: reply,
                }
            }
            Err(e) => {
                tracing::error!(call_sid = %meta.call_sid, "Model call failed, escalating: {e}");
                AgentReply {
                    action: CallAction::Escalate,
                    message: FAILURE_MESSAGE.to_string(),
                }
            }
        }
    }

    /// Re-prompt after a turn with no speech, ending the call once the line
    /// has been silent for [`MAX_SILENT_TURNS`] turns in a row.
    async fn silent_turn(&self, meta: &CallMeta) -> AgentReply {
        let silent = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions
                .entry(meta.call_sid.clone())
                .or_insert_with(|| Session::new(meta));
            session.last_used = Instant::now();
            session.silent_turns += 1;
            session.silent_turns
        };

        if silent >= MAX_SILENT_TURNS {
            tracing::info!(call_sid = %meta.call_sid, silent, "Line silent, ending call");
            return AgentReply {
                action: CallAction::EndCall,
                message: SILENT_LINE_MESSAGE.to_string(),
            };
        }
        AgentReply {
            action: CallAction::Continue,
            message: EMPTY_INPUT_MESSAGE.to_string(),
        }
    }

    async fn record_reply(&self, call_sid: &str, reply: &str) {
        if let Some(session) = self.sessions.lock().await.get_mut(call_sid) {
            push_capped(&mut session.transcript, ChatMessage::assistant(reply));
            session.last_used = Instant::now();
        }
    }

    /// Drop a call's transcript (call ended). Returns how many messages it held.
    pub async fn end_session(&self, call_sid: &str) -> Option<usize> {
        let removed = self.sessions.lock().await.remove(call_sid);
        removed.map(|s| {
            tracing::info!(call_sid, messages = s.transcript.len(), "Call session ended");
            s.transcript.len()
        })
    }

    /// Evict idle sessions. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_used.elapsed() < self.session_timeout);
        before - sessions.len()
    }

    pub async fn active_calls(&self) -> Vec<ActiveCall> {
        let sessions = self.sessions.lock().await;
        let mut calls: Vec<ActiveCall> = sessions
            .values()
            .map(|s| ActiveCall {
                call_sid: s.meta.call_sid.clone(),
                from: s.meta.from.clone(),
                turns: s.transcript.len(),
                idle_secs: s.last_used.elapsed().as_secs(),
            })
            .collect();
        calls.sort_by_key(|c| c.idle_secs);
        calls
    }
}

fn push_capped(transcript: &mut Vec<ChatMessage>, msg: ChatMessage) {
    transcript.push(msg);
    if transcript.len() > MAX_HISTORY {
        let excess = transcript.len() - MAX_HISTORY;
        transcript.drain(..excess);
    }
}

/// Decide from the caller's words alone, without the model.
pub fn classify_input(input: &str) -> Option<CallAction> {
    if contains_any(input, ESCALATION_PHRASES) {
        Some(CallAction::Escalate)
    } else if contains_any(input, END_CALL_PHRASES) {
        Some(CallAction::EndCall)
    } else {
        None
    }
}

fn contains_any(text: &str, phrases: &[&str]) -> bool {
    let normalized = text.to_lowercase().replace('\u{2019}', "'");
    phrases.iter().any(|p| normalized.contains(p))
}

fn system_prompt(ctx: &AgentContext) -> String {
    let mut prompt = format!(
        "You are the phone assistant for {}, a vehicle rental business. \
         You are speaking on a phone call, so answer in one to three short spoken sentences \
         with no lists, markdown or URLs. Help callers with vehicle availability, pricing, \
         pickup and return, and booking questions. If you don't know something, say a team \
         member can help.",
        ctx.business_name
    );
    if !ctx.booking_url.is_empty() {
        prompt.push_str(
            " When the caller wants to make a reservation, offer to text them the booking link \
             and say \"I'll text you the booking link\".",
        );
    }
    if !ctx.instructions.trim().is_empty() {
        prompt.push_str("\n\nAdditional instructions from the business:\n");
        prompt.push_str(ctx.instructions.trim());
    }
    prompt
}
