pub mod client;
pub mod signature;
pub mod twiml;
pub mod webhook;

/// Basic E.164 validation: starts with +, followed by digits only, 8-16 total chars.
pub fn validate_e164(s: &str) -> bool {
    if !s.starts_with('+') || s.len() < 8 || s.len() > 16 {
        return false;
    }
    s[1..].chars().all(|c| c.is_ascii_digit())
}
