use std::collections::{HashMap, HashSet};
use std::time::Duration;

use moonbot_common::state::MoonbotState;
use moonbot_common::teloxide::prelude::{Requester, UserId};
use moonbot_common::teloxide::types::InlineKeyboardMarkup;
use moonbot_common::teloxide::utils::markdown;
use moonbot_common::utils::boosts::Boosts;
use moonbot_common::utils::market::{
    fetch_token_info, format_percent_change, format_price, format_usd, TokenInfo,
};
use moonbot_common::utils::sui::CoinType;
use moonbot_common::utils::{trending_chat_id, unix_now};

use crate::{BuyRecord, BuybotConfig};

pub const LEADERBOARD_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// Trailing window the volume ranking looks at.
pub const VOLUME_WINDOW: Duration = Duration::from_secs(30 * 60);
/// Buy records older than this are pruned on each tick.
const RETENTION: Duration = Duration::from_secs(24 * 60 * 60);
const MAX_ENTRIES: usize = 10;

const RANK_EMOJIS: [&str; 10] = ["🥇", "🥈", "🥉", "4️⃣", "5️⃣", "6️⃣", "7️⃣", "8️⃣", "9️⃣", "🔟"];

#[derive(Debug, PartialEq)]
pub struct LeaderboardEntry {
    pub coin_type: CoinType,
    pub volume: f64,
    pub boosted: bool,
}

/// Sums buy volume per coin over records newer than `cutoff`.
pub fn volume_by_coin<'a>(
    records: impl Iterator<Item = &'a BuyRecord>,
    cutoff: u64,
) -> HashMap<CoinType, f64> {
    let mut volumes = HashMap::new();
    for record in records.filter(|record| record.timestamp > cutoff) {
        *volumes.entry(record.coin_type.clone()).or_insert(0.0) += record.usd_value;
    }
    volumes
}

/// Boosted coins first, volume descending within each class, top 10.
pub fn rank(
    volumes: HashMap<CoinType, f64>,
    boosted: &HashSet<CoinType>,
) -> Vec<LeaderboardEntry> {
    let mut entries: Vec<LeaderboardEntry> = volumes
        .into_iter()
        .map(|(coin_type, volume)| LeaderboardEntry {
            boosted: boosted.contains(&coin_type),
            coin_type,
            volume,
        })
        .collect();
    entries.sort_by(|a, b| {
        b.boosted
            .cmp(&a.boosted)
            .then(b.volume.total_cmp(&a.volume))
    });
    entries.truncate(MAX_ENTRIES);
    entries
}

fn render_entry(index: usize, entry: &LeaderboardEntry, info: &TokenInfo) -> String {
    format!(
        "{rank} *${symbol}*{boost}\n    Volume \\(30m\\): {volume}\n    Price: {price} \\({change}\\)\n",
        rank = RANK_EMOJIS[index],
        symbol = markdown::escape(&info.symbol),
        boost = if entry.boosted { " 🚀" } else { "" },
        volume = markdown::escape(&format_usd(entry.volume)),
        price = markdown::escape(&format_price(info.price)),
        change = markdown::escape(&format_percent_change(info.price_change_30m)),
    )
}

/// Renders and posts one leaderboard update, pins it, and prunes old buy
/// records.
pub async fn leaderboard_tick(
    state: &MoonbotState,
    bot_id: UserId,
    boosts: &Boosts,
    config: &BuybotConfig,
) -> Result<(), anyhow::Error> {
    let Some(trending_chat) = trending_chat_id() else {
        return Ok(());
    };
    let now = unix_now();
    let records: Vec<(String, BuyRecord)> = config
        .buys
        .values()
        .await?
        .map(|entry| (entry.key().clone(), entry.value().clone()))
        .collect();

    let volumes = volume_by_coin(
        records.iter().map(|(_, record)| record),
        now.saturating_sub(VOLUME_WINDOW.as_secs()),
    );
    let boosted = boosts.active_coins(now).await?;
    let entries = rank(volumes, &boosted);

    if !entries.is_empty() {
        let mut message = "🏆 *MOONBAGS TRENDING LEADERBOARD* 🏆\n\n".to_string();
        for (index, entry) in entries.iter().enumerate() {
            let info = match fetch_token_info(&entry.coin_type).await {
                Ok(info) => info,
                Err(err) => {
                    log::warn!("No market data for {} on leaderboard: {err:?}", entry.coin_type);
                    TokenInfo::default()
                }
            };
            message.push_str(&render_entry(index, entry, &info));
            message.push('\n');
        }
        message.push_str(&format!(
            "Updated: {}",
            markdown::escape(&chrono::Utc::now().format("%H:%M UTC").to_string())
        ));

        let Some(bot) = state.bot(&bot_id) else {
            return Ok(());
        };
        let sent = bot
            .send_text_message(
                trending_chat,
                message,
                InlineKeyboardMarkup::new(Vec::<Vec<_>>::new()),
            )
            .await?;
        // Best-effort: the bot may not have pin rights in the channel
        if let Err(err) = bot.bot().unpin_all_chat_messages(trending_chat).await {
            log::warn!("Failed to unpin previous leaderboard: {err:?}");
        }
        if let Err(err) = bot.bot().pin_chat_message(trending_chat, sent.id).await {
            log::warn!("Failed to pin leaderboard: {err:?}");
        }
    }

    let stale: Vec<String> = records
        .into_iter()
        .filter(|(_, record)| record.timestamp + RETENTION.as_secs() < now)
        .map(|(digest, _)| digest)
        .collect();
    config.buys.delete_many(stale).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coin(n: u8) -> CoinType {
        format!(
            "0x{:064x}::token::TOKEN{n}",
            n as u128
        )
        .parse()
        .unwrap()
    }

    fn record(n: u8, usd_value: f64, timestamp: u64) -> BuyRecord {
        BuyRecord {
            coin_type: coin(n),
            buyer: "0xbuyer".to_string(),
            token_amount: 1.0,
            usd_value,
            timestamp,
        }
    }

    #[test]
    fn volume_only_counts_records_inside_the_window() {
        let records = vec![
            record(1, 100.0, 1000),
            record(1, 50.0, 900),
            record(1, 999.0, 100), // too old
            record(2, 10.0, 1000),
        ];
        let volumes = volume_by_coin(records.iter(), 500);
        assert_eq!(volumes[&coin(1)], 150.0);
        assert_eq!(volumes[&coin(2)], 10.0);
    }

    #[test]
    fn boosted_coins_rank_first() {
        let mut volumes = HashMap::new();
        volumes.insert(coin(1), 1000.0);
        volumes.insert(coin(2), 5.0);
        volumes.insert(coin(3), 500.0);
        let boosted = HashSet::from([coin(2)]);
        let ranked = rank(volumes, &boosted);
        assert_eq!(ranked[0].coin_type, coin(2));
        assert!(ranked[0].boosted);
        assert_eq!(ranked[1].coin_type, coin(1));
        assert_eq!(ranked[2].coin_type, coin(3));
    }

    #[test]
    fn expired_boosts_do_not_affect_ordering() {
        // An expired boost never makes it into the boosted set
        let mut volumes = HashMap::new();
        volumes.insert(coin(1), 1000.0);
        volumes.insert(coin(2), 5.0);
        let ranked = rank(volumes, &HashSet::new());
        assert_eq!(ranked[0].coin_type, coin(1));
        assert!(!ranked.iter().any(|entry| entry.boosted));
    }

    #[test]
    fn leaderboard_is_capped_at_ten() {
        let volumes: HashMap<CoinType, f64> = (1..=15)
            .map(|n| (coin(n), n as f64 * 10.0))
            .collect();
        let ranked = rank(volumes, &HashSet::new());
        assert_eq!(ranked.len(), 10);
        // Highest volume first
        assert_eq!(ranked[0].coin_type, coin(15));
        assert_eq!(ranked[9].coin_type, coin(6));
    }
}
