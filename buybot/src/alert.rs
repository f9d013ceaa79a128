use moonbot_common::feed::BuyEvent;
use moonbot_common::teloxide::types::InlineKeyboardButton;
use moonbot_common::teloxide::utils::markdown;
use moonbot_common::utils::market::{format_price, format_usd_compact, TokenInfo};
use moonbot_common::utils::sui::{shorten_address, EXPLORER_URL};
use moonbot_common::utils::trending_channel_link;

use crate::{GroupSettings, TRENDING_MIN_BUY_USD};

const MAX_EMOJIS: usize = 20;

/// How many emojis a buy of this size earns: one per `emoji_step` dollars,
/// at least 1, capped at 20.
pub fn emoji_intensity(usd_value: f64, emoji_step: f64) -> usize {
    if emoji_step <= 0.0 {
        return 1;
    }
    ((usd_value / emoji_step) as usize).clamp(1, MAX_EMOJIS)
}

pub fn meets_min_buy(min_buy_usd: f64, usd_value: f64) -> bool {
    usd_value >= min_buy_usd
}

/// Buys this large, or buys of a boosted token, also go to the shared
/// trending channel.
pub fn should_trend(usd_value: f64, boosted: bool) -> bool {
    boosted || usd_value >= TRENDING_MIN_BUY_USD
}

pub fn alert_text(
    event: &BuyEvent,
    info: &TokenInfo,
    settings: &GroupSettings,
    sui_price: f64,
) -> String {
    let emoji = settings.emoji.as_deref().unwrap_or("🔥");
    let emojis = emoji.repeat(emoji_intensity(event.usd_value, settings.emoji_step));
    let symbol = markdown::escape(
        settings
            .token_symbol
            .as_deref()
            .unwrap_or(info.symbol.as_str()),
    );
    let mut text = format!(
        "{emojis} *{symbol} Buy\\!* {emojis}\n\n\
        💰 {size} \\| {amount} {symbol}\n\
        👤 Buyer: [{buyer}]({EXPLORER_URL}/txblock/{digest})\n\
        🔼 MCap {market_cap}\n\
        📊 Liquidity {liquidity}\n\
        📈 Price {price}\n\
        💧 SUI Price: {sui}",
        size = markdown::escape(&format!("${:.2}", event.usd_value)),
        amount = markdown::escape(&format!("{:.2}", event.token_amount)),
        buyer = markdown::escape(&shorten_address(&event.buyer, 6)),
        digest = event.tx_digest,
        market_cap = markdown::escape(&format_usd_compact(info.market_cap)),
        liquidity = markdown::escape(&format_usd_compact(info.liquidity)),
        price = markdown::escape(&format_price(info.price)),
        sui = markdown::escape(&format!("${sui_price:.2}")),
    );
    let links = links_line(settings);
    if !links.is_empty() {
        text.push_str("\n\n");
        text.push_str(&links);
    }
    text
}

/// `[Website](...) | [Telegram](...)` from the fields that are set.
pub fn links_line(settings: &GroupSettings) -> String {
    let mut links = Vec::new();
    if let Some(website) = &settings.website {
        links.push(format!("[Website]({website})"));
    }
    if let Some(telegram) = &settings.telegram_link {
        links.push(format!("[Telegram]({telegram})"));
    }
    if let Some(twitter) = &settings.twitter_link {
        links.push(format!("[X]({twitter})"));
    }
    if let Some(chart) = &settings.chart_link {
        links.push(format!("[Chart]({chart})"));
    }
    links.join(" \\| ")
}

pub fn alert_buttons(settings: &GroupSettings) -> Vec<Vec<InlineKeyboardButton>> {
    let mut buttons = Vec::new();
    if let Some(chart) = settings
        .chart_link
        .as_ref()
        .and_then(|link| link.parse().ok())
    {
        buttons.push(vec![InlineKeyboardButton::url("📈 Buy Now", chart)]);
    }
    if let Some(link) = trending_channel_link() {
        buttons.push(vec![InlineKeyboardButton::url("🚀 Trending", link)]);
    }
    buttons
}

pub fn trending_alert_text(event: &BuyEvent, info: &TokenInfo) -> String {
    format!(
        "🚀 *BIG BUY ALERT*\n\n\
        *{symbol}* \\({coin}\\)\n\
        Amount: {size}\n\
        Buyer: {buyer}\n\
        [Tx]({EXPLORER_URL}/txblock/{digest})",
        symbol = markdown::escape(&info.symbol),
        coin = markdown::escape(&event.coin_type.short()),
        size = markdown::escape(&format!("${:.2}", event.usd_value)),
        buyer = markdown::escape(&shorten_address(&event.buyer, 6)),
        digest = event.tx_digest,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use moonbot_common::utils::sui::CoinType;

    fn coin() -> CoinType {
        "0x7b888393d6a552819bb0a7f878183abaf04550bfb9546b20ea586d338210826f::moon::MOON"
            .parse()
            .unwrap()
    }

    fn event(usd_value: f64) -> BuyEvent {
        BuyEvent {
            coin_type: coin(),
            buyer: "0xabcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890"
                .to_string(),
            token_amount: 1234.5,
            usd_value,
            tx_digest: "7qGqXYB7kbhJ6oWZJZcVKyPDkfQU4DHJp9jWBP8rJf3z".to_string(),
            timestamp: 1_700_000_000,
        }
    }

    fn settings() -> GroupSettings {
        GroupSettings {
            coin_type: Some(coin()),
            token_symbol: Some("MOON".to_string()),
            min_buy_usd: Some(50.0),
            emoji: Some("🔥".to_string()),
            emoji_step: 5.0,
            ..GroupSettings::default()
        }
    }

    #[test]
    fn emoji_count_is_linear_in_buy_size() {
        assert_eq!(emoji_intensity(17.0, 5.0), 3);
        assert_eq!(emoji_intensity(4.99, 5.0), 1);
        assert_eq!(emoji_intensity(250.0, 5.0), 20);
        assert_eq!(emoji_intensity(1_000_000.0, 5.0), 20);
        assert_eq!(emoji_intensity(100.0, 0.0), 1);
    }

    #[test]
    fn min_buy_threshold_is_inclusive() {
        assert!(!meets_min_buy(50.0, 49.99));
        assert!(meets_min_buy(50.0, 50.0));
        assert!(meets_min_buy(50.0, 50.01));
    }

    #[test]
    fn trending_gate() {
        assert!(!should_trend(199.99, false));
        assert!(should_trend(200.0, false));
        assert!(should_trend(0.01, true));
    }

    #[test]
    fn alert_is_deterministic_and_escaped() {
        let info = TokenInfo {
            symbol: "MOON".to_string(),
            market_cap: 123_450.0,
            liquidity: 45_670.0,
            price: 0.00001234,
            ..TokenInfo::default()
        };
        let text = alert_text(&event(17.0), &info, &settings(), 1.23);
        assert!(text.starts_with("🔥🔥🔥 *MOON Buy\\!* 🔥🔥🔥"));
        assert!(text.contains("$17\\.00"));
        assert!(text.contains("0xabcd\\.\\.\\.7890"));
        assert!(text.contains("MCap $123\\.45K"));
        assert!(text.contains("Liquidity $45\\.67K"));
        assert!(text.contains("SUI Price: $1\\.23"));
        assert!(!text.contains("Website"));
    }

    #[test]
    fn links_line_only_includes_set_fields() {
        let mut settings = settings();
        assert_eq!(links_line(&settings), "");
        settings.website = Some("https://moon.example".to_string());
        settings.twitter_link = Some("https://x.com/moon".to_string());
        assert_eq!(
            links_line(&settings),
            "[Website](https://moon.example) \\| [X](https://x.com/moon)"
        );
    }

    #[test]
    fn trending_alert_mentions_token_and_size() {
        let info = TokenInfo {
            symbol: "MOON".to_string(),
            ..TokenInfo::default()
        };
        let text = trending_alert_text(&event(250.0), &info);
        assert!(text.contains("BIG BUY ALERT"));
        assert!(text.contains("*MOON*"));
        assert!(text.contains("$250\\.00"));
    }
}
