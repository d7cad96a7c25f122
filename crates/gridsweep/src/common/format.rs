use std::time::Duration;

use taskgrid::ResourceAmount;

pub fn human_duration(duration: Duration) -> String {
    // Truncate to reasonable precision
    let duration = if duration.as_secs() >= 3600 {
        Duration::from_secs(duration.as_secs() / 60 * 60)
    } else if duration.as_secs() >= 60 {
        Duration::from_secs(duration.as_secs())
    } else {
        Duration::from_millis(duration.as_millis() as u64)
    };
    humantime::format_duration(duration).to_string()
}

/// Memory and disk amounts are kept in MB.
pub fn human_mb_amount(amount: ResourceAmount) -> String {
    if amount < 2048 {
        format!("{amount} MB")
    } else {
        format!("{:.2} GB", amount as f64 / 1024.0)
    }
}

pub fn format_comma_delimited<I: IntoIterator<Item = T>, T: ToString>(items: I) -> String {
    items
        .into_iter()
        .map(|item| item.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
