use std::io::{self, BufRead, Write};

use super::ansi;

/// Ask for a line of input. An empty answer takes `default` when given,
/// otherwise the question is repeated.
pub fn ask(label: &str, default: Option<&str>) -> String {
    loop {
        match default {
            Some(d) => print!("  {label} {}: ", ansi::dim(&format!("[{d}]"))),
            None => print!("  {label}: "),
        }
        let _ = io::stdout().flush();

        let answer = read_line();
        if !answer.is_empty() {
            return answer;
        }
        if let Some(d) = default {
            return d.to_string();
        }
    }
}

/// Like [`ask`] but an empty answer is allowed.
pub fn ask_optional(label: &str) -> String {
    print!("  {label} {}: ", ansi::dim("(optional)"));
    let _ = io::stdout().flush();
    read_line()
}

/// Ask without echoing. Empty answers are accepted only when `optional`.
pub fn ask_secret(label: &str, optional: bool) -> String {
    loop {
        let prompt = if optional {
            format!("  {label} {}: ", ansi::dim("(optional, hidden)"))
        } else {
            format!("  {label} {}: ", ansi::dim("(hidden)"))
        };
        let answer = rpassword::prompt_password(prompt)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        if !answer.is_empty() || optional {
            return answer;
        }
    }
}

pub fn confirm(question: &str) -> bool {
    print!("  {question} {}: ", ansi::dim("[y/N]"));
    let _ = io::stdout().flush();
    matches!(read_line().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn read_line() -> String {
    let mut line = String::new();
    match io::stdin().lock().read_line(&mut line) {
        Ok(0) | Err(_) => String::new(),
        Ok(_) => line.trim().to_string(),
    }
}
