pub mod alert;
mod dedupe;
pub mod leaderboard;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use moonbot_common::bot_commands::{MessageCommand, TgCommand};
use moonbot_common::feed::{BuyEvent, FeedEventHandler};
use moonbot_common::mongodb::Database;
use moonbot_common::state::{MoonbotModule, MoonbotState};
use moonbot_common::teloxide::prelude::{ChatId, Message, UserId};
use moonbot_common::teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use moonbot_common::teloxide::utils::markdown;
use moonbot_common::tgbot::{
    Attachment, BotData, MustAnswerCallbackQuery, TgCallbackContext,
};
use moonbot_common::utils::boosts::Boosts;
use moonbot_common::utils::chat::{
    check_admin_permission_in_chat, get_chat_title_cached_5m, DM_CHAT,
};
use moonbot_common::utils::market::{fetch_token_info, TokenInfo};
use moonbot_common::utils::store::PersistentCachedStore;
use moonbot_common::utils::sui::CoinType;
use moonbot_common::utils::{trending_chat_id, unix_now};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::dedupe::RecentDigests;

/// Buys above this size go to the trending channel even without a boost.
pub const TRENDING_MIN_BUY_USD: f64 = 200.0;

const RECENT_DIGESTS_CAPACITY: usize = 10_000;

pub struct BuybotModule {
    state: Arc<MoonbotState>,
    boosts: Arc<Boosts>,
    bot_configs: Arc<HashMap<UserId, BuybotConfig>>,
}

/// Per-group alert configuration. Starts as an incomplete draft while the
/// admin walks through the setup menu; `enabled` flips on when Finish
/// passes the completeness check.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct GroupSettings {
    pub coin_type: Option<CoinType>,
    pub token_symbol: Option<String>,
    pub min_buy_usd: Option<f64>,
    pub emoji: Option<String>,
    #[serde(default = "default_emoji_step")]
    pub emoji_step: f64,
    pub website: Option<String>,
    pub telegram_link: Option<String>,
    pub twitter_link: Option<String>,
    pub chart_link: Option<String>,
    #[serde(default)]
    pub media: Attachment,
    #[serde(default)]
    pub enabled: bool,
}

fn default_emoji_step() -> f64 {
    5.0
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            coin_type: None,
            token_symbol: None,
            min_buy_usd: None,
            emoji: None,
            emoji_step: default_emoji_step(),
            website: None,
            telegram_link: None,
            twitter_link: None,
            chart_link: None,
            media: Attachment::None,
            enabled: false,
        }
    }
}

impl GroupSettings {
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.coin_type.is_none() {
            missing.push("token");
        }
        if self.min_buy_usd.is_none() {
            missing.push("minimum buy");
        }
        if self.emoji.is_none() {
            missing.push("emoji");
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }
}

/// One observed purchase, keyed by transaction digest in the store. The
/// unique key is the dedupe boundary: a digest is alerted at most once.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BuyRecord {
    pub coin_type: CoinType,
    pub buyer: String,
    pub token_amount: f64,
    pub usd_value: f64,
    pub timestamp: u64,
}

pub struct BuybotConfig {
    pub(crate) groups: PersistentCachedStore<ChatId, GroupSettings>,
    pub(crate) buys: PersistentCachedStore<String, BuyRecord>,
    recent_digests: Mutex<RecentDigests>,
    tokens_cache: RwLock<HashMap<CoinType, Vec<ChatId>>>,
}

impl BuybotConfig {
    pub async fn new(db: Database, bot_id: UserId) -> Result<Self, anyhow::Error> {
        Ok(Self {
            groups: PersistentCachedStore::new(db.clone(), &format!("bot{bot_id}_buybot_groups"))
                .await?,
            buys: PersistentCachedStore::new(db, &format!("bot{bot_id}_buybot_buys")).await?,
            recent_digests: Mutex::new(RecentDigests::new(RECENT_DIGESTS_CAPACITY)),
            tokens_cache: RwLock::new(HashMap::new()),
        })
    }

    async fn recalculate_tokens_cache(&self) -> Result<HashSet<CoinType>, anyhow::Error> {
        let mut tokens_cache = self.tokens_cache.write().await;
        tokens_cache.clear();
        for entry in self.groups.values().await? {
            let chat_id = *entry.key();
            let settings = entry.value();
            if !settings.enabled {
                continue;
            }
            if let Some(coin_type) = settings.coin_type.clone() {
                tokens_cache.entry(coin_type).or_default().push(chat_id);
            }
        }
        Ok(tokens_cache.keys().cloned().collect())
    }

    async fn subscribed_chats(&self, coin: &CoinType) -> Vec<ChatId> {
        self.tokens_cache
            .read()
            .await
            .get(coin)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl FeedEventHandler for BuybotModule {
    async fn handle_buy(&self, event: &BuyEvent) -> Result<(), anyhow::Error> {
        self.process_buy(event).await
    }
}

impl BuybotModule {
    pub async fn new(state: Arc<MoonbotState>, boosts: Arc<Boosts>) -> Result<Self, anyhow::Error> {
        let mut bot_configs = HashMap::new();
        for bot in state.bots() {
            let bot_id = bot.id();
            let config = BuybotConfig::new(state.db(), bot_id).await?;
            bot_configs.insert(bot_id, config);
            log::info!("Buybot config loaded for bot {bot_id}");
        }
        let module = Self {
            state,
            boosts,
            bot_configs: Arc::new(bot_configs),
        };
        module.recalculate_tokens_cache().await?;
        Ok(module)
    }

    async fn recalculate_tokens_cache(&self) -> Result<(), anyhow::Error> {
        let mut all_coins = HashSet::new();
        for config in self.bot_configs.values() {
            all_coins.extend(config.recalculate_tokens_cache().await?);
        }
        self.state.set_tracked_coins(all_coins).await;
        Ok(())
    }

    async fn process_buy(&self, event: &BuyEvent) -> Result<(), anyhow::Error> {
        for bot in self.state.bots() {
            let bot_id = bot.id();
            let Some(config) = self.bot_configs.get(&bot_id) else {
                continue;
            };
            if !config
                .recent_digests
                .lock()
                .await
                .insert(event.tx_digest.clone())
            {
                continue;
            }
            let record = BuyRecord {
                coin_type: event.coin_type.clone(),
                buyer: event.buyer.clone(),
                token_amount: event.token_amount,
                usd_value: event.usd_value,
                timestamp: event.timestamp,
            };
            if !config
                .buys
                .insert_if_not_exists(event.tx_digest.clone(), record)
                .await?
            {
                continue;
            }

            let info = match fetch_token_info(&event.coin_type).await {
                Ok(info) => info,
                Err(err) => {
                    log::warn!(
                        "No market data for {} while alerting: {err:?}",
                        event.coin_type
                    );
                    TokenInfo::default()
                }
            };
            let sui_price = self.state.sui_price().await;

            for chat_id in config.subscribed_chats(&event.coin_type).await {
                let Some(settings) = config.groups.get(&chat_id).await else {
                    continue;
                };
                if !settings.enabled {
                    continue;
                }
                if !alert::meets_min_buy(settings.min_buy_usd.unwrap_or(0.0), event.usd_value) {
                    continue;
                }
                if bot.reached_notification_limit(chat_id).await {
                    continue;
                }
                let text = alert::alert_text(event, &info, &settings, sui_price);
                let reply_markup = InlineKeyboardMarkup::new(alert::alert_buttons(&settings));
                let media = settings.media.clone();
                let state = Arc::clone(&self.state);
                let digest = event.tx_digest.clone();
                tokio::spawn(async move {
                    let Some(bot) = state.bot(&bot_id) else {
                        return;
                    };
                    if let Err(err) = bot.send(chat_id, text, reply_markup, media).await {
                        log::warn!("Failed to send buy alert {digest} to {chat_id}: {err:?}");
                    }
                });
            }

            let boosted = self.boosts.is_boosted(&event.coin_type, unix_now()).await;
            if alert::should_trend(event.usd_value, boosted) {
                if let Some(trending_chat) = trending_chat_id() {
                    let text = alert::trending_alert_text(event, &info);
                    let state = Arc::clone(&self.state);
                    let digest = event.tx_digest.clone();
                    tokio::spawn(async move {
                        let Some(bot) = state.bot(&bot_id) else {
                            return;
                        };
                        if let Err(err) = bot
                            .send_text_message(
                                trending_chat,
                                text,
                                InlineKeyboardMarkup::new(Vec::<Vec<_>>::new()),
                            )
                            .await
                        {
                            log::warn!("Failed to send trending alert {digest}: {err:?}");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    async fn settings_menu(
        &self,
        bot: &BotData,
        target_chat_id: ChatId,
    ) -> Result<(String, InlineKeyboardMarkup), anyhow::Error> {
        let chat_name = markdown::escape(
            &get_chat_title_cached_5m(bot.bot(), target_chat_id)
                .await?
                .unwrap_or(DM_CHAT.to_string()),
        );
        let settings = if let Some(config) = self.bot_configs.get(&bot.id()) {
            config.groups.get(&target_chat_id).await.unwrap_or_default()
        } else {
            GroupSettings::default()
        };
        let links_set = [
            &settings.website,
            &settings.telegram_link,
            &settings.twitter_link,
            &settings.chart_link,
        ]
        .iter()
        .filter(|link| link.is_some())
        .count();
        let message = format!(
            "⚙️ Buybot settings for *{chat_name}*\n\n\
            🪙 Token: {token}\n\
            💰 Min Buy: {min_buy}\n\
            🎨 Emoji: {emoji}\n\
            🔗 Links: {links_set} set\n\
            📷 Media: {media}\n\n\
            {status}",
            token = match (&settings.token_symbol, &settings.coin_type) {
                (Some(symbol), Some(coin)) => format!(
                    "{} \\({}\\)",
                    markdown::escape(symbol),
                    markdown::escape(&coin.short())
                ),
                _ => "Not set".to_string(),
            },
            min_buy = match settings.min_buy_usd {
                Some(min_buy) => markdown::escape(&format!("${min_buy:.2}")),
                None => "Not set".to_string(),
            },
            emoji = match &settings.emoji {
                Some(emoji) => format!(
                    "{emoji} \\({} per emoji\\)",
                    markdown::escape(&format!("${:.2}", settings.emoji_step))
                ),
                None => "Not set".to_string(),
            },
            media = if settings.media == Attachment::None {
                "Not set"
            } else {
                "Set"
            },
            status = if settings.enabled {
                "✅ Alerts are live"
            } else {
                "⏸ Alerts are not active yet, press Finish when you're done"
            },
        );
        let mut buttons = vec![
            vec![
                InlineKeyboardButton::callback(
                    "🪙 Set Token",
                    bot.to_callback_data(&TgCommand::BuybotSetToken(target_chat_id))
                        .await,
                ),
                InlineKeyboardButton::callback(
                    "💰 Min Buy",
                    bot.to_callback_data(&TgCommand::BuybotSetMinBuy(target_chat_id))
                        .await,
                ),
            ],
            vec![
                InlineKeyboardButton::callback(
                    "🎨 Emoji",
                    bot.to_callback_data(&TgCommand::BuybotSetEmoji(target_chat_id))
                        .await,
                ),
                InlineKeyboardButton::callback(
                    "🔗 Links",
                    bot.to_callback_data(&TgCommand::BuybotLinks(target_chat_id))
                        .await,
                ),
            ],
            vec![
                InlineKeyboardButton::callback(
                    "📷 Media",
                    bot.to_callback_data(&TgCommand::BuybotSetMedia(target_chat_id))
                        .await,
                ),
                InlineKeyboardButton::callback(
                    "👀 Preview",
                    bot.to_callback_data(&TgCommand::BuybotPreview(target_chat_id))
                        .await,
                ),
            ],
        ];
        if settings.enabled {
            buttons.push(vec![InlineKeyboardButton::callback(
                "⏸ Disable",
                bot.to_callback_data(&TgCommand::BuybotDisable(target_chat_id))
                    .await,
            )]);
        } else {
            buttons.push(vec![InlineKeyboardButton::callback(
                "✅ Finish",
                bot.to_callback_data(&TgCommand::BuybotFinish(target_chat_id))
                    .await,
            )]);
        }
        buttons.push(vec![InlineKeyboardButton::callback(
            "⬅️ Back",
            bot.to_callback_data(&TgCommand::ChatSettings(target_chat_id))
                .await,
        )]);
        Ok((message, InlineKeyboardMarkup::new(buttons)))
    }

    /// Sends a fresh settings menu after a text input, prefixed with the
    /// outcome of that input.
    async fn send_menu_after_input(
        &self,
        bot: &BotData,
        dm_chat_id: ChatId,
        target_chat_id: ChatId,
        prefix: &str,
    ) -> Result<(), anyhow::Error> {
        let (menu, reply_markup) = self.settings_menu(bot, target_chat_id).await?;
        bot.send_text_message(dm_chat_id, format!("{prefix}\n\n{menu}"), reply_markup)
            .await?;
        Ok(())
    }

    async fn edit_settings(
        &self,
        bot: &BotData,
        target_chat_id: ChatId,
        edit: impl FnOnce(&mut GroupSettings),
    ) -> Result<GroupSettings, anyhow::Error> {
        let config = self
            .bot_configs
            .get(&bot.id())
            .ok_or_else(|| anyhow::anyhow!("No buybot config for bot {}", bot.id()))?;
        let mut settings = config.groups.get(&target_chat_id).await.unwrap_or_default();
        edit(&mut settings);
        config
            .groups
            .insert_or_update(target_chat_id, settings.clone())
            .await?;
        Ok(settings)
    }

    async fn send_retry_message(
        &self,
        bot: &BotData,
        dm_chat_id: ChatId,
        target_chat_id: ChatId,
        message: String,
    ) -> Result<(), anyhow::Error> {
        let reply_markup = InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
            "⬅️ Cancel",
            bot.to_callback_data(&TgCommand::BuybotSettings(target_chat_id))
                .await,
        )]]);
        bot.send_text_message(dm_chat_id, message, reply_markup)
            .await?;
        Ok(())
    }
}

fn normalize_url(text: &str) -> Result<String, String> {
    let text = text.trim();
    if text.is_empty() || text.contains(char::is_whitespace) || !text.contains('.') {
        return Err("That doesn't look like a link\\. Try again, or send `skip` to clear it".to_string());
    }
    let url = if text.starts_with("http://") || text.starts_with("https://") {
        text.to_string()
    } else {
        format!("https://{text}")
    };
    url.parse::<reqwest::Url>()
        .map_err(|_| "That doesn't look like a link\\. Try again, or send `skip` to clear it".to_string())?;
    Ok(url)
}

fn parse_emoji_input(text: &str) -> Result<(String, f64), String> {
    let mut parts = text.split_whitespace();
    let (Some(emoji), Some(step), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err("Send the emoji and the $ value per emoji, like `🔥 5`".to_string());
    };
    if emoji.chars().count() > 8 {
        return Err("That emoji is too long".to_string());
    }
    let step: f64 = step
        .parse()
        .map_err(|_| "Invalid amount\\. Send something like `🔥 5`".to_string())?;
    if !step.is_finite() || step <= 0.0 {
        return Err("The $ value per emoji must be positive".to_string());
    }
    Ok((emoji.to_string(), step))
}

fn parse_min_buy(text: &str) -> Result<f64, String> {
    let text = text.trim().trim_start_matches('$');
    let min_buy: f64 = text
        .parse()
        .map_err(|_| "Invalid amount\\. Send a number like `50`".to_string())?;
    if !min_buy.is_finite() || min_buy < 0.0 {
        return Err("The minimum buy must not be negative".to_string());
    }
    Ok(min_buy)
}

#[async_trait]
impl MoonbotModule for BuybotModule {
    fn name(&self) -> &'static str {
        "Buybot"
    }

    async fn start(&self) -> Result<(), anyhow::Error> {
        let state = Arc::clone(&self.state);
        let boosts = Arc::clone(&self.boosts);
        let bot_configs = Arc::clone(&self.bot_configs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(leaderboard::LEADERBOARD_INTERVAL);
            // The first tick fires immediately; skip it so the board covers
            // a full window
            interval.tick().await;
            loop {
                interval.tick().await;
                for (bot_id, config) in bot_configs.iter() {
                    if let Err(err) =
                        leaderboard::leaderboard_tick(&state, *bot_id, &boosts, config).await
                    {
                        log::error!("Leaderboard update failed: {err:?}");
                    }
                }
            }
        });
        Ok(())
    }

    async fn handle_message(
        &self,
        bot: &BotData,
        user_id: Option<UserId>,
        chat_id: ChatId,
        command: MessageCommand,
        text: &str,
        message: &Message,
    ) -> Result<(), anyhow::Error> {
        if !chat_id.is_user() {
            return Ok(());
        }
        let Some(user_id) = user_id else {
            return Ok(());
        };
        match command {
            MessageCommand::BuybotSetToken(target_chat_id) => {
                if !check_admin_permission_in_chat(bot, target_chat_id, user_id).await {
                    return Ok(());
                }
                let coin_type: CoinType = match text.trim().parse() {
                    Ok(coin_type) => coin_type,
                    Err(_) => {
                        self.send_retry_message(
                            bot,
                            chat_id,
                            target_chat_id,
                            "❌ Invalid SUI token format\\! Expected `0x...::module::TYPE`"
                                .to_string(),
                        )
                        .await?;
                        return Ok(());
                    }
                };
                let info = match fetch_token_info(&coin_type).await {
                    Ok(info) => info,
                    Err(err) => {
                        log::warn!("Failed to verify token {coin_type}: {err:?}");
                        self.send_retry_message(
                            bot,
                            chat_id,
                            target_chat_id,
                            "❌ Failed to verify the token\\. Check the address and try again"
                                .to_string(),
                        )
                        .await?;
                        return Ok(());
                    }
                };
                bot.remove_message_command(&user_id).await?;
                self.edit_settings(bot, target_chat_id, |settings| {
                    settings.coin_type = Some(coin_type);
                    settings.token_symbol = Some(info.symbol.clone());
                })
                .await?;
                self.recalculate_tokens_cache().await?;
                let confirmation = format!(
                    "✅ Token set: *{symbol}*\nPrice: {price}\nMarket Cap: {market_cap}",
                    symbol = markdown::escape(&info.symbol),
                    price = markdown::escape(
                        &moonbot_common::utils::market::format_price(info.price)
                    ),
                    market_cap = markdown::escape(
                        &moonbot_common::utils::market::format_usd_compact(info.market_cap)
                    ),
                );
                self.send_menu_after_input(bot, chat_id, target_chat_id, &confirmation)
                    .await?;
            }
            MessageCommand::BuybotSetMinBuy(target_chat_id) => {
                if !check_admin_permission_in_chat(bot, target_chat_id, user_id).await {
                    return Ok(());
                }
                let min_buy = match parse_min_buy(text) {
                    Ok(min_buy) => min_buy,
                    Err(message) => {
                        self.send_retry_message(bot, chat_id, target_chat_id, message)
                            .await?;
                        return Ok(());
                    }
                };
                bot.remove_message_command(&user_id).await?;
                self.edit_settings(bot, target_chat_id, |settings| {
                    settings.min_buy_usd = Some(min_buy);
                })
                .await?;
                self.send_menu_after_input(
                    bot,
                    chat_id,
                    target_chat_id,
                    &format!(
                        "✅ Min buy set: {}",
                        markdown::escape(&format!("${min_buy:.2}"))
                    ),
                )
                .await?;
            }
            MessageCommand::BuybotSetEmoji(target_chat_id) => {
                if !check_admin_permission_in_chat(bot, target_chat_id, user_id).await {
                    return Ok(());
                }
                let (emoji, step) = match parse_emoji_input(text) {
                    Ok(parsed) => parsed,
                    Err(message) => {
                        self.send_retry_message(bot, chat_id, target_chat_id, message)
                            .await?;
                        return Ok(());
                    }
                };
                bot.remove_message_command(&user_id).await?;
                let confirmation = format!(
                    "✅ Set {emoji} per {}",
                    markdown::escape(&format!("${step:.2}"))
                );
                self.edit_settings(bot, target_chat_id, |settings| {
                    settings.emoji = Some(emoji);
                    settings.emoji_step = step;
                })
                .await?;
                self.send_menu_after_input(bot, chat_id, target_chat_id, &confirmation)
                    .await?;
            }
            MessageCommand::BuybotSetWebsite(target_chat_id)
            | MessageCommand::BuybotSetTelegram(target_chat_id)
            | MessageCommand::BuybotSetTwitter(target_chat_id)
            | MessageCommand::BuybotSetChart(target_chat_id) => {
                if !check_admin_permission_in_chat(bot, target_chat_id, user_id).await {
                    return Ok(());
                }
                let link = if text.trim().eq_ignore_ascii_case("skip") {
                    None
                } else {
                    match normalize_url(text) {
                        Ok(url) => Some(url),
                        Err(message) => {
                            self.send_retry_message(bot, chat_id, target_chat_id, message)
                                .await?;
                            return Ok(());
                        }
                    }
                };
                bot.remove_message_command(&user_id).await?;
                let (field, confirmation) = match command {
                    MessageCommand::BuybotSetWebsite(_) => ("website", "✅ Website saved\\!"),
                    MessageCommand::BuybotSetTelegram(_) => ("telegram", "✅ Telegram saved\\!"),
                    MessageCommand::BuybotSetTwitter(_) => ("twitter", "✅ Twitter/X saved\\!"),
                    _ => ("chart", "✅ Chart link saved\\!"),
                };
                let confirmation = if link.is_none() {
                    "✅ Link cleared".to_string()
                } else {
                    confirmation.to_string()
                };
                self.edit_settings(bot, target_chat_id, |settings| match field {
                    "website" => settings.website = link,
                    "telegram" => settings.telegram_link = link,
                    "twitter" => settings.twitter_link = link,
                    _ => settings.chart_link = link,
                })
                .await?;
                self.send_menu_after_input(bot, chat_id, target_chat_id, &confirmation)
                    .await?;
            }
            MessageCommand::BuybotSetMedia(target_chat_id) => {
                if !check_admin_permission_in_chat(bot, target_chat_id, user_id).await {
                    return Ok(());
                }
                let media = if text.trim().eq_ignore_ascii_case("skip") {
                    Attachment::None
                } else if let Some(photo) = message.photo().and_then(|sizes| sizes.last()) {
                    Attachment::PhotoFileId(photo.file.id.clone())
                } else if let Some(animation) = message.animation() {
                    Attachment::AnimationFileId(animation.file.id.clone())
                } else {
                    self.send_retry_message(
                        bot,
                        chat_id,
                        target_chat_id,
                        "❌ Unsupported media\\! Send a photo or a GIF, or `skip`".to_string(),
                    )
                    .await?;
                    return Ok(());
                };
                bot.remove_message_command(&user_id).await?;
                let confirmation = if media == Attachment::None {
                    "✅ Media cleared"
                } else {
                    "✅ Media saved\\!"
                };
                self.edit_settings(bot, target_chat_id, |settings| {
                    settings.media = media;
                })
                .await?;
                self.send_menu_after_input(bot, chat_id, target_chat_id, confirmation)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn handle_callback<'a>(
        &'a self,
        mut context: TgCallbackContext<'a>,
        _query: &mut Option<MustAnswerCallbackQuery>,
    ) -> Result<(), anyhow::Error> {
        if !context.chat_id().is_user() {
            return Ok(());
        }
        match context.parse_command().await? {
            TgCommand::BuybotSettings(target_chat_id) => {
                if !check_admin_permission_in_chat(context.bot(), target_chat_id, context.user_id())
                    .await
                {
                    return Ok(());
                }
                context
                    .bot()
                    .remove_message_command(&context.user_id())
                    .await?;
                let (message, reply_markup) =
                    self.settings_menu(context.bot(), target_chat_id).await?;
                context.edit_or_send(message, reply_markup).await?;
            }
            TgCommand::BuybotSetToken(target_chat_id) => {
                if !check_admin_permission_in_chat(context.bot(), target_chat_id, context.user_id())
                    .await
                {
                    return Ok(());
                }
                context
                    .bot()
                    .set_message_command(
                        context.user_id(),
                        MessageCommand::BuybotSetToken(target_chat_id),
                    )
                    .await?;
                let message = "
🔗 Enter the full SUI token address\\.

Format: `0x...::module::TYPE`

Example:
`0x7b888393d6a552819bb0a7f878183abaf04550bfb9546b20ea586d338210826f::moon::MOON`
                "
                .trim()
                .to_string();
                let reply_markup =
                    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                        "⬅️ Cancel",
                        context
                            .bot()
                            .to_callback_data(&TgCommand::BuybotSettings(target_chat_id))
                            .await,
                    )]]);
                context.edit_or_send(message, reply_markup).await?;
            }
            TgCommand::BuybotSetMinBuy(target_chat_id) => {
                if !check_admin_permission_in_chat(context.bot(), target_chat_id, context.user_id())
                    .await
                {
                    return Ok(());
                }
                context
                    .bot()
                    .set_message_command(
                        context.user_id(),
                        MessageCommand::BuybotSetMinBuy(target_chat_id),
                    )
                    .await?;
                let message = "💰 Enter the minimum buy size in USD for alerts".to_string();
                let reply_markup =
                    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                        "⬅️ Cancel",
                        context
                            .bot()
                            .to_callback_data(&TgCommand::BuybotSettings(target_chat_id))
                            .await,
                    )]]);
                context.edit_or_send(message, reply_markup).await?;
            }
            TgCommand::BuybotSetEmoji(target_chat_id) => {
                if !check_admin_permission_in_chat(context.bot(), target_chat_id, context.user_id())
                    .await
                {
                    return Ok(());
                }
                context
                    .bot()
                    .set_message_command(
                        context.user_id(),
                        MessageCommand::BuybotSetEmoji(target_chat_id),
                    )
                    .await?;
                let message =
                    "🎨 Send the emoji and the $ value per emoji, like `🔥 5`".to_string();
                let reply_markup =
                    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                        "⬅️ Cancel",
                        context
                            .bot()
                            .to_callback_data(&TgCommand::BuybotSettings(target_chat_id))
                            .await,
                    )]]);
                context.edit_or_send(message, reply_markup).await?;
            }
            TgCommand::BuybotLinks(target_chat_id) => {
                if !check_admin_permission_in_chat(context.bot(), target_chat_id, context.user_id())
                    .await
                {
                    return Ok(());
                }
                let message = "🔗 Which link do you want to set? Send `skip` while editing a link to clear it".to_string();
                let reply_markup = InlineKeyboardMarkup::new(vec![
                    vec![
                        InlineKeyboardButton::callback(
                            "Website",
                            context
                                .bot()
                                .to_callback_data(&TgCommand::BuybotSetWebsite(target_chat_id))
                                .await,
                        ),
                        InlineKeyboardButton::callback(
                            "Telegram",
                            context
                                .bot()
                                .to_callback_data(&TgCommand::BuybotSetTelegram(target_chat_id))
                                .await,
                        ),
                    ],
                    vec![
                        InlineKeyboardButton::callback(
                            "Twitter/X",
                            context
                                .bot()
                                .to_callback_data(&TgCommand::BuybotSetTwitter(target_chat_id))
                                .await,
                        ),
                        InlineKeyboardButton::callback(
                            "Chart",
                            context
                                .bot()
                                .to_callback_data(&TgCommand::BuybotSetChart(target_chat_id))
                                .await,
                        ),
                    ],
                    vec![InlineKeyboardButton::callback(
                        "⬅️ Back",
                        context
                            .bot()
                            .to_callback_data(&TgCommand::BuybotSettings(target_chat_id))
                            .await,
                    )],
                ]);
                context.edit_or_send(message, reply_markup).await?;
            }
            command @ (TgCommand::BuybotSetWebsite(_)
            | TgCommand::BuybotSetTelegram(_)
            | TgCommand::BuybotSetTwitter(_)
            | TgCommand::BuybotSetChart(_)) => {
                let (target_chat_id, message_command) = match command {
                    TgCommand::BuybotSetWebsite(chat_id) => {
                        (chat_id, MessageCommand::BuybotSetWebsite(chat_id))
                    }
                    TgCommand::BuybotSetTelegram(chat_id) => {
                        (chat_id, MessageCommand::BuybotSetTelegram(chat_id))
                    }
                    TgCommand::BuybotSetTwitter(chat_id) => {
                        (chat_id, MessageCommand::BuybotSetTwitter(chat_id))
                    }
                    TgCommand::BuybotSetChart(chat_id) => {
                        (chat_id, MessageCommand::BuybotSetChart(chat_id))
                    }
                    _ => unreachable!(),
                };
                if !check_admin_permission_in_chat(context.bot(), target_chat_id, context.user_id())
                    .await
                {
                    return Ok(());
                }
                context
                    .bot()
                    .set_message_command(context.user_id(), message_command)
                    .await?;
                let message =
                    "🔗 Send the link, or `skip` to clear the current one".to_string();
                let reply_markup =
                    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                        "⬅️ Cancel",
                        context
                            .bot()
                            .to_callback_data(&TgCommand::BuybotLinks(target_chat_id))
                            .await,
                    )]]);
                context.edit_or_send(message, reply_markup).await?;
            }
            TgCommand::BuybotSetMedia(target_chat_id) => {
                if !check_admin_permission_in_chat(context.bot(), target_chat_id, context.user_id())
                    .await
                {
                    return Ok(());
                }
                context
                    .bot()
                    .set_message_command(
                        context.user_id(),
                        MessageCommand::BuybotSetMedia(target_chat_id),
                    )
                    .await?;
                let message =
                    "📷 Send a photo or GIF to attach to alerts, or `skip` to clear it"
                        .to_string();
                let reply_markup =
                    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                        "⬅️ Cancel",
                        context
                            .bot()
                            .to_callback_data(&TgCommand::BuybotSettings(target_chat_id))
                            .await,
                    )]]);
                context.edit_or_send(message, reply_markup).await?;
            }
            TgCommand::BuybotPreview(target_chat_id) => {
                if !check_admin_permission_in_chat(context.bot(), target_chat_id, context.user_id())
                    .await
                {
                    return Ok(());
                }
                let settings = if let Some(config) = self.bot_configs.get(&context.bot().id()) {
                    config.groups.get(&target_chat_id).await.unwrap_or_default()
                } else {
                    return Ok(());
                };
                let Some(coin_type) = settings.coin_type.clone() else {
                    let reply_markup =
                        InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                            "⬅️ Back",
                            context
                                .bot()
                                .to_callback_data(&TgCommand::BuybotSettings(target_chat_id))
                                .await,
                        )]]);
                    context
                        .edit_or_send("Set a token first".to_string(), reply_markup)
                        .await?;
                    return Ok(());
                };
                let info = fetch_token_info(&coin_type).await.unwrap_or_default();
                let event = BuyEvent {
                    coin_type,
                    buyer: format!("0x{}", "ab".repeat(32)),
                    token_amount: 1234.56,
                    usd_value: 250.0,
                    tx_digest: "11111111111111111111111111111111".to_string(),
                    timestamp: unix_now(),
                };
                let text =
                    alert::alert_text(&event, &info, &settings, self.state.sui_price().await);
                context
                    .send(
                        text,
                        InlineKeyboardMarkup::new(alert::alert_buttons(&settings)),
                        settings.media.clone(),
                    )
                    .await?;
            }
            TgCommand::BuybotFinish(target_chat_id) => {
                if !check_admin_permission_in_chat(context.bot(), target_chat_id, context.user_id())
                    .await
                {
                    return Ok(());
                }
                let settings = if let Some(config) = self.bot_configs.get(&context.bot().id()) {
                    config.groups.get(&target_chat_id).await.unwrap_or_default()
                } else {
                    return Ok(());
                };
                let missing = settings.missing_fields();
                if !missing.is_empty() {
                    let reply_markup =
                        InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                            "⬅️ Back",
                            context
                                .bot()
                                .to_callback_data(&TgCommand::BuybotSettings(target_chat_id))
                                .await,
                        )]]);
                    context
                        .edit_or_send(
                            format!(
                                "Almost there\\! Still missing: {}",
                                markdown::escape(&missing.join(", "))
                            ),
                            reply_markup,
                        )
                        .await?;
                    return Ok(());
                }
                let settings = self
                    .edit_settings(context.bot(), target_chat_id, |settings| {
                        settings.enabled = true;
                    })
                    .await?;
                self.recalculate_tokens_cache().await?;
                let announcement = format!(
                    "✅ Setup complete\\! Tracking *{symbol}* \\(buys over {min_buy}\\)",
                    symbol = markdown::escape(settings.token_symbol.as_deref().unwrap_or("?")),
                    min_buy = markdown::escape(&format!(
                        "${:.2}",
                        settings.min_buy_usd.unwrap_or_default()
                    )),
                );
                if let Err(err) = context
                    .bot()
                    .send_text_message(
                        target_chat_id,
                        announcement,
                        InlineKeyboardMarkup::new(Vec::<Vec<_>>::new()),
                    )
                    .await
                {
                    log::warn!("Failed to announce setup in {target_chat_id}: {err:?}");
                }
                let (message, reply_markup) =
                    self.settings_menu(context.bot(), target_chat_id).await?;
                context
                    .edit_or_send(format!("✅ Setup done\\!\n\n{message}"), reply_markup)
                    .await?;
            }
            TgCommand::BuybotDisable(target_chat_id) => {
                if !check_admin_permission_in_chat(context.bot(), target_chat_id, context.user_id())
                    .await
                {
                    return Ok(());
                }
                self.edit_settings(context.bot(), target_chat_id, |settings| {
                    settings.enabled = false;
                })
                .await?;
                self.recalculate_tokens_cache().await?;
                let (message, reply_markup) =
                    self.settings_menu(context.bot(), target_chat_id).await?;
                context.edit_or_send(message, reply_markup).await?;
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_requires_token_min_buy_and_emoji() {
        let mut settings = GroupSettings::default();
        assert_eq!(
            settings.missing_fields(),
            vec!["token", "minimum buy", "emoji"]
        );
        settings.coin_type = Some(
            "0x7b888393d6a552819bb0a7f878183abaf04550bfb9546b20ea586d338210826f::moon::MOON"
                .parse()
                .unwrap(),
        );
        settings.min_buy_usd = Some(50.0);
        assert_eq!(settings.missing_fields(), vec!["emoji"]);
        assert!(!settings.is_complete());
        settings.emoji = Some("🔥".to_string());
        assert!(settings.is_complete());
        // Optional fields don't gate completion
        assert!(settings.website.is_none());
        assert!(settings.media == Attachment::None);
    }

    #[test]
    fn url_normalization_prefixes_https() {
        assert_eq!(
            normalize_url("moon.example").unwrap(),
            "https://moon.example"
        );
        assert_eq!(
            normalize_url("https://moon.example").unwrap(),
            "https://moon.example"
        );
        assert!(normalize_url("not a url").is_err());
        assert!(normalize_url("").is_err());
        assert!(normalize_url("nodots").is_err());
    }

    #[test]
    fn emoji_input_requires_emoji_and_step() {
        assert_eq!(
            parse_emoji_input("🔥 5").unwrap(),
            ("🔥".to_string(), 5.0)
        );
        assert!(parse_emoji_input("🔥").is_err());
        assert!(parse_emoji_input("🔥 0").is_err());
        assert!(parse_emoji_input("🔥 -5").is_err());
        assert!(parse_emoji_input("🔥 5 extra").is_err());
    }

    #[test]
    fn min_buy_accepts_dollar_prefix() {
        assert_eq!(parse_min_buy("50").unwrap(), 50.0);
        assert_eq!(parse_min_buy("$12.5").unwrap(), 12.5);
        assert!(parse_min_buy("-1").is_err());
        assert!(parse_min_buy("abc").is_err());
    }
}
