use chrono::{DateTime, Utc};

/// Human-readable age of `then` as seen at `now`, e.g. "5 minutes ago".
/// Anything older than a week is shown as a date ("Jan 30, 2016").
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(then);

    // Clock skew between writers can put `then` slightly in the future.
    if elapsed.num_seconds() < 60 {
        return "just now".to_string();
    }

    let minutes = elapsed.num_minutes();
    if minutes < 60 {
        return ago(minutes, "minute");
    }

    let hours = elapsed.num_hours();
    if hours < 24 {
        return ago(hours, "hour");
    }

    let days = elapsed.num_days();
    if days < 7 {
        return ago(days, "day");
    }

    then.format("%b %d, %Y").to_string()
}

fn ago(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", n, unit)
    }
}
