use axum::response::{IntoResponse, Response};

/// Amazon Polly voice used for `<Say>`.
const SAY_VOICE: &str = "Polly.Joanna";

/// How the line speaks a piece of text.
#[derive(Debug, Clone, PartialEq)]
pub enum Speech {
    /// Twilio's built-in TTS.
    Say(String),
    /// A synthesized clip at this URL.
    Play(String),
}

/// How the line listens for the caller's next utterance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Listen {
    /// Twilio speech recognition via `<Gather>`.
    Gather,
    /// `<Record>` and transcribe the recording ourselves.
    Record,
}

/// Minimal TwiML document builder.
#[derive(Debug, Default)]
pub struct Twiml {
    verbs: Vec<String>,
}

impl Twiml {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn speak(mut self, speech: &Speech) -> Self {
        self.verbs.push(speech_verb(speech));
        self
    }

    /// Speak `prompt` and wait for the caller, posting what they said to `action`.
    pub fn listen(mut self, mode: Listen, action: &str, prompt: &Speech) -> Self {
        let action = escape(action);
        match mode {
            Listen::Gather => self.verbs.push(format!(
                r#"<Gather input="speech" action="{action}" method="POST" speechTimeout="auto" language="en-US">{}</Gather>"#,
                speech_verb(prompt)
            )),
            Listen::Record => {
                self.verbs.push(speech_verb(prompt));
                self.verbs.push(format!(
                    r#"<Record action="{action}" method="POST" maxLength="30" timeout="3" playBeep="false" trim="trim-silence" />"#
                ));
            }
        }
        self
    }

    pub fn dial(mut self, number: &str) -> Self {
        self.verbs.push(format!("<Dial>{}</Dial>", escape(number)));
        self
    }

    pub fn redirect(mut self, url: &str) -> Self {
        self.verbs
            .push(format!(r#"<Redirect method="POST">{}</Redirect>"#, escape(url)));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push("<Hangup />".to_string());
        self
    }

    pub fn build(&self) -> String {
        let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Response>\n");
        for verb in &self.verbs {
            out.push_str("    ");
            out.push_str(verb);
            out.push('\n');
        }
        out.push_str("</Response>");
        out
    }
}

impl IntoResponse for Twiml {
    fn into_response(self) -> Response {
        ([("Content-Type", "text/xml")], self.build()).into_response()
    }
}

fn speech_verb(speech: &Speech) -> String {
    match speech {
        Speech::Say(text) => format!(r#"<Say voice="{SAY_VOICE}">{}</Say>"#, escape(text)),
        Speech::Play(url) => format!("<Play>{}</Play>", escape(url)),
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn say_text_is_escaped() {
        let xml = Twiml::new()
            .speak(&Speech::Say("Tom & Jerry's <deal>".into()))
            .build();
        assert!(xml.contains(
            r#"<Say voice="Polly.Joanna">Tom &amp; Jerry&apos;s &lt;deal&gt;</Say>"#
        ));
        assert!(xml.starts_with("<?xml"));
        assert!(xml.ends_with("</Response>"));
    }

    #[test]
    fn gather_wraps_prompt() {
        let xml = Twiml::new()
            .listen(
                Listen::Gather,
                "https://x.test/twilio/voice/respond",
                &Speech::Play("https://x.test/twilio/audio/ab12".into()),
            )
            .build();
        assert!(xml.contains(
            r#"<Gather input="speech" action="https://x.test/twilio/voice/respond" method="POST" speechTimeout="auto" language="en-US"><Play>https://x.test/twilio/audio/ab12</Play></Gather>"#
        ));
    }

    #[test]
    fn record_follows_prompt() {
        let xml = Twiml::new()
            .listen(
                Listen::Record,
                "https://x.test/twilio/voice/recording",
                &Speech::Say("Go ahead.".into()),
            )
            .build();
        let say = xml.find("<Say").unwrap();
        let record = xml.find("<Record").unwrap();
        assert!(say < record);
        assert!(xml.contains(r#"action="https://x.test/twilio/voice/recording""#));
    }

    #[test]
    fn dial_and_hangup() {
        let xml = Twiml::new().dial("+15550002222").hangup().build();
        assert!(xml.contains("<Dial>+15550002222</Dial>"));
        assert!(xml.contains("<Hangup />"));
    }

    #[test]
    fn query_string_ampersands_are_escaped() {
        let xml = Twiml::new().redirect("https://x.test/a?b=1&c=2").build();
        assert!(xml.contains("https://x.test/a?b=1&amp;c=2"));
    }
}
