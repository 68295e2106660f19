use chrono::{Local, Timelike};
use rand::seq::SliceRandom;

const ANYTIME: &[&str] = &[
    "Thanks for calling {business}.",
    "Hi, you've reached {business}.",
    "Hello, this is {business}.",
];

const MORNING: &[&str] = &["Good morning, thanks for calling {business}."];

const AFTERNOON: &[&str] = &["Good afternoon, you've reached {business}."];

const EVENING: &[&str] = &["Good evening, thanks for calling {business}."];

/// Outside business hours callers are told a person may not be available.
const AFTER_HOURS: &[&str] = &[
    "Thanks for calling {business}. Our desk is closed right now, but I can still help.",
];

const OPENERS: &[&str] = &[
    "How can I help you today?",
    "Are you looking to book a vehicle or ask about an existing rental?",
    "What can I do for you?",
];

fn time_pool(hour: u32) -> &'static [&'static str] {
    match hour {
        6..=11 => MORNING,
        12..=16 => AFTERNOON,
        17..=20 => EVENING,
        _ => AFTER_HOURS,
    }
}

/// Pick a greeting for an incoming call based on the local time of day.
///
/// The `{business}` placeholder is replaced with the business name and the
/// greeting ends with a question so the caller knows to speak.
pub fn select_greeting(business: &str) -> String {
    select_greeting_for_hour(business, Local::now().hour())
}

fn select_greeting_for_hour(business: &str, hour: u32) -> String {
    let time_specific = time_pool(hour);
    let mut rng = rand::thread_rng();

    // After hours always uses the closed notice.
    let template: &str = if time_specific == AFTER_HOURS {
        AFTER_HOURS.choose(&mut rng).copied().unwrap_or(AFTER_HOURS[0])
    } else {
        let pool: Vec<&str> = ANYTIME.iter().chain(time_specific).copied().collect();
        pool.choose(&mut rng).copied().unwrap_or(ANYTIME[0])
    };

    let opener = OPENERS.choose(&mut rng).copied().unwrap_or(OPENERS[0]);
    format!("{} {opener}", template.replace("{business}", business))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn greeting_names_the_business() {
        let greeting = select_greeting_for_hour("Coastal Car Rentals", 10);
        assert!(
            greeting.contains("Coastal Car Rentals"),
            "greeting should name the business: {greeting}"
        );
    }

    #[test]
    fn greeting_never_leaves_placeholder_and_asks_a_question() {
        for hour in 0..24 {
            let greeting = select_greeting_for_hour("Coastal", hour);
            assert!(
                !greeting.contains("{business}"),
                "placeholder not replaced at hour {hour}: {greeting}"
            );
            assert!(greeting.ends_with('?'), "no question at hour {hour}: {greeting}");
        }
    }

    #[test]
    fn after_hours_mentions_closed_desk() {
        for hour in [0, 3, 5, 21, 23] {
            assert!(select_greeting_for_hour("X", hour).contains("closed"));
        }
    }

    #[test]
    fn time_pool_boundaries() {
        assert_eq!(time_pool(5), AFTER_HOURS);
        assert_eq!(time_pool(6), MORNING);
        assert_eq!(time_pool(11), MORNING);
        assert_eq!(time_pool(12), AFTERNOON);
        assert_eq!(time_pool(16), AFTERNOON);
        assert_eq!(time_pool(17), EVENING);
        assert_eq!(time_pool(20), EVENING);
        assert_eq!(time_pool(21), AFTER_HOURS);
    }
}
