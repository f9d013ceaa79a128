pub mod boosts;
pub mod chat;
pub mod market;
pub mod requests;
pub mod store;
pub mod sui;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use teloxide::prelude::ChatId;

pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("System clock is before the unix epoch")
        .as_secs()
}

/// The shared trending channel, if configured.
pub fn trending_chat_id() -> Option<ChatId> {
    std::env::var("TRENDING_CHAT_ID")
        .ok()
        .and_then(|id| id.parse::<i64>().ok())
        .map(ChatId)
}

/// Public t.me link of the trending channel, used in alert buttons.
pub fn trending_channel_link() -> Option<reqwest::Url> {
    std::env::var("TRENDING_CHANNEL_LINK")
        .ok()
        .and_then(|link| link.parse().ok())
}

pub fn format_duration(duration: Duration) -> String {
    let mut duration = duration;
    let mut result = String::new();
    let mut components = 0;
    const MAX_COMPONENTS: usize = 2;
    if duration.as_secs() >= 86400 && components < MAX_COMPONENTS {
        result.push_str(&format!("{}d ", duration.as_secs() / 86400));
        duration = Duration::from_secs(duration.as_secs() % 86400);
        components += 1;
    }
    if duration.as_secs() >= 3600 && components < MAX_COMPONENTS {
        result.push_str(&format!("{}h ", duration.as_secs() / 3600));
        duration = Duration::from_secs(duration.as_secs() % 3600);
        components += 1;
    }
    if duration.as_secs() >= 60 && components < MAX_COMPONENTS {
        result.push_str(&format!("{}m ", duration.as_secs() / 60));
        duration = Duration::from_secs(duration.as_secs() % 60);
        components += 1;
    }
    if duration.as_secs() > 0 && components < MAX_COMPONENTS {
        result.push_str(&format!("{}s", duration.as_secs()));
        components += 1;
    }
    if components == 0 {
        result.push_str("in less than a second");
    }
    result.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_uses_at_most_two_components() {
        assert_eq!(format_duration(Duration::from_secs(4 * 3600)), "4h");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(
            format_duration(Duration::from_secs(7 * 86400 + 3 * 3600 + 25 * 60)),
            "7d 3h"
        );
        assert_eq!(format_duration(Duration::ZERO), "in less than a second");
    }
}
