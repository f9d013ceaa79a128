use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use moonbot_common::bot_commands::{MessageCommand, TgCommand};
use moonbot_common::state::MoonbotModule;
use moonbot_common::teloxide::prelude::{ChatId, Message, UserId};
use moonbot_common::teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};
use moonbot_common::teloxide::utils::markdown;
use moonbot_common::tgbot::{BotData, MustAnswerCallbackQuery, TgCallbackContext};
use moonbot_common::utils::boosts::{BoostDuration, Boosts};
use moonbot_common::utils::market::fetch_token_info;
use moonbot_common::utils::sui::{looks_like_digest, verify_payment, CoinType};
use moonbot_common::utils::{trending_chat_id, unix_now};

/// Abandoned payment sessions are dropped after this much idle time.
const PENDING_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub struct BoostModule {
    boosts: Arc<Boosts>,
    pending: Arc<DashMap<UserId, PendingBoost>>,
}

/// An in-flight boost purchase: duration picked, payment not confirmed
/// yet. Lives in memory only; restarting the bot cancels it.
#[derive(Clone)]
struct PendingBoost {
    coin_type: CoinType,
    duration: BoostDuration,
    created: Instant,
}

fn boost_wallet() -> Option<String> {
    std::env::var("BOOST_WALLET").ok()
}

impl BoostModule {
    pub fn new(boosts: Arc<Boosts>) -> Self {
        Self {
            boosts,
            pending: Arc::new(DashMap::new()),
        }
    }

    async fn open_duration_menu(
        &self,
        bot: &BotData,
        chat_id: ChatId,
        coin_type: CoinType,
    ) -> Result<(), anyhow::Error> {
        let mut buttons = Vec::new();
        for duration in BoostDuration::ALL {
            buttons.push(vec![InlineKeyboardButton::callback(
                format!("{} - {} SUI", duration.label(), duration.price_sui()),
                bot.to_callback_data(&TgCommand::BoostSelectDuration(
                    coin_type.clone(),
                    duration,
                ))
                .await,
            )]);
        }
        buttons.push(vec![InlineKeyboardButton::callback(
            "⬅️ Cancel",
            bot.to_callback_data(&TgCommand::BoostCancel).await,
        )]);
        let message = format!(
            "💰 Boosting *{coin}*\n\nSelect the boost duration:",
            coin = markdown::escape(&coin_type.short())
        );
        bot.send_text_message(chat_id, message, InlineKeyboardMarkup::new(buttons))
            .await?;
        Ok(())
    }

    async fn handle_confirm(
        &self,
        bot: &BotData,
        user_id: UserId,
        chat_id: ChatId,
        digest: &str,
    ) -> Result<(), anyhow::Error> {
        let empty_markup = InlineKeyboardMarkup::new(Vec::<Vec<_>>::new());
        let Some(pending) = self.pending.get(&user_id).map(|entry| entry.clone()) else {
            bot.send_text_message(
                chat_id,
                "No boost in progress\\. Start one with `/boost <token address>`".to_string(),
                empty_markup,
            )
            .await?;
            return Ok(());
        };
        if !looks_like_digest(digest) {
            bot.send_text_message(
                chat_id,
                "❌ That doesn't look like a transaction hash\\. Send `/confirm TX_HASH`"
                    .to_string(),
                empty_markup,
            )
            .await?;
            return Ok(());
        }
        let Some(wallet) = boost_wallet() else {
            log::error!("BOOST_WALLET is not set, can't verify boost payments");
            bot.send_text_message(
                chat_id,
                "⚠️ Boosts are not available right now".to_string(),
                empty_markup,
            )
            .await?;
            return Ok(());
        };
        // Claim the digest before verifying so one payment can never fund
        // two boosts, even across restarts
        if !self
            .boosts
            .claim_tx(digest.to_string(), pending.coin_type.clone())
            .await?
        {
            bot.send_text_message(
                chat_id,
                "❌ This transaction was already used for a boost".to_string(),
                empty_markup,
            )
            .await?;
            return Ok(());
        }
        match verify_payment(digest, pending.duration.price_sui(), &wallet).await {
            Ok(true) => {
                let expires_at = self
                    .boosts
                    .activate(
                        pending.coin_type.clone(),
                        pending.duration.duration(),
                        unix_now(),
                    )
                    .await?;
                self.pending.remove(&user_id);
                bot.remove_message_command(&user_id).await?;
                let expires = chrono::DateTime::from_timestamp(expires_at as i64, 0)
                    .map(|time| time.format("%Y-%m-%d %H:%M UTC").to_string())
                    .unwrap_or_default();
                bot.send_text_message(
                    chat_id,
                    format!("✅ Boost active until: {}", markdown::escape(&expires)),
                    empty_markup.clone(),
                )
                .await?;
                self.announce_boost(bot, &pending).await;
            }
            Ok(false) => {
                self.boosts.release_tx(digest).await?;
                bot.send_text_message(
                    chat_id,
                    format!(
                        "❌ Payment verification failed\\! Make sure the transaction sends {} SUI to `{}` and retry with `/confirm TX_HASH`",
                        pending.duration.price_sui(),
                        markdown::escape(&wallet),
                    ),
                    empty_markup,
                )
                .await?;
            }
            Err(err) => {
                log::warn!("Payment verification for {digest} errored: {err:?}");
                self.boosts.release_tx(digest).await?;
                bot.send_text_message(
                    chat_id,
                    "⚠️ Couldn't reach the chain to verify the transaction\\. Try `/confirm TX_HASH` again in a minute".to_string(),
                    empty_markup,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn announce_boost(&self, bot: &BotData, pending: &PendingBoost) {
        let Some(trending_chat) = trending_chat_id() else {
            return;
        };
        let symbol = match fetch_token_info(&pending.coin_type).await {
            Ok(info) => info.symbol,
            Err(_) => pending.coin_type.name().to_string(),
        };
        let message = format!(
            "🚀 *BOOST ACTIVATED\\!*\n*{symbol}* \\({coin}\\) for {duration}",
            symbol = markdown::escape(&symbol),
            coin = markdown::escape(&pending.coin_type.short()),
            duration = markdown::escape(pending.duration.label()),
        );
        if let Err(err) = bot
            .send_text_message(
                trending_chat,
                message,
                InlineKeyboardMarkup::new(Vec::<Vec<_>>::new()),
            )
            .await
        {
            log::warn!("Failed to announce boost: {err:?}");
        }
    }
}

#[async_trait]
impl MoonbotModule for BoostModule {
    fn name(&self) -> &'static str {
        "Boost"
    }

    async fn start(&self) -> Result<(), anyhow::Error> {
        let pending = Arc::clone(&self.pending);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                pending.retain(|_, pending| pending.created.elapsed() < PENDING_TIMEOUT);
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
        _message: &Message,
    ) -> Result<(), anyhow::Error> {
        if !chat_id.is_user() {
            return Ok(());
        }
        let Some(user_id) = user_id else {
            return Ok(());
        };
        let empty_markup = InlineKeyboardMarkup::new(Vec::<Vec<_>>::new());
        if let Some(args) = text.strip_prefix("/boost") {
            let args = args.trim();
            if args.is_empty() {
                bot.send_text_message(
                    chat_id,
                    "Usage: `/boost 0x...::module::TYPE`".to_string(),
                    empty_markup,
                )
                .await?;
                return Ok(());
            }
            match args.parse::<CoinType>() {
                Ok(coin_type) => {
                    self.open_duration_menu(bot, chat_id, coin_type).await?;
                }
                Err(_) => {
                    bot.send_text_message(
                        chat_id,
                        "❌ Invalid token address\\! Expected `0x...::module::TYPE`".to_string(),
                        empty_markup,
                    )
                    .await?;
                }
            }
            return Ok(());
        }
        if let Some(digest) = text.strip_prefix("/confirm") {
            let digest = digest.trim();
            if digest.is_empty() {
                bot.send_text_message(
                    chat_id,
                    "❌ Missing TX hash\\! Send `/confirm TX_HASH`".to_string(),
                    empty_markup,
                )
                .await?;
                return Ok(());
            }
            self.handle_confirm(bot, user_id, chat_id, digest).await?;
            return Ok(());
        }
        if text == "/cancel" {
            // The hub confirms the cancellation; just drop the session
            self.pending.remove(&user_id);
            return Ok(());
        }
        match command {
            MessageCommand::BoostEnterToken => match text.trim().parse::<CoinType>() {
                Ok(coin_type) => {
                    bot.remove_message_command(&user_id).await?;
                    self.open_duration_menu(bot, chat_id, coin_type).await?;
                }
                Err(_) => {
                    bot.send_text_message(
                        chat_id,
                        "❌ Invalid token address\\! Expected `0x...::module::TYPE`\\. Try again"
                            .to_string(),
                        empty_markup,
                    )
                    .await?;
                }
            },
            MessageCommand::BoostAwaitTx => {
                self.handle_confirm(bot, user_id, chat_id, text.trim())
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
            TgCommand::BoostToken => {
                context
                    .bot()
                    .set_message_command(context.user_id(), MessageCommand::BoostEnterToken)
                    .await?;
                let reply_markup =
                    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                        "⬅️ Cancel",
                        context.bot().to_callback_data(&TgCommand::BoostCancel).await,
                    )]]);
                context
                    .edit_or_send(
                        "🚀 Send the token address you want to boost, like `0x...::module::TYPE`"
                            .to_string(),
                        reply_markup,
                    )
                    .await?;
            }
            TgCommand::BoostSelectDuration(coin_type, duration) => {
                let Some(wallet) = boost_wallet() else {
                    log::error!("BOOST_WALLET is not set, can't sell boosts");
                    context
                        .edit_or_send(
                            "⚠️ Boosts are not available right now".to_string(),
                            InlineKeyboardMarkup::new(Vec::<Vec<_>>::new()),
                        )
                        .await?;
                    return Ok(());
                };
                self.pending.insert(
                    context.user_id(),
                    PendingBoost {
                        coin_type,
                        duration,
                        created: Instant::now(),
                    },
                );
                context
                    .bot()
                    .set_message_command(context.user_id(), MessageCommand::BoostAwaitTx)
                    .await?;
                let reply_markup =
                    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
                        "⬅️ Cancel",
                        context.bot().to_callback_data(&TgCommand::BoostCancel).await,
                    )]]);
                context
                    .edit_or_send(
                        format!(
                            "Send {price} SUI to:\n`{wallet}`\n\nThen reply with the transaction hash, or `/confirm TX_HASH`",
                            price = duration.price_sui(),
                            wallet = markdown::escape(&wallet),
                        ),
                        reply_markup,
                    )
                    .await?;
            }
            TgCommand::BoostCancel => {
                self.pending.remove(&context.user_id());
                context
                    .bot()
                    .remove_message_command(&context.user_id())
                    .await?;
                context
                    .edit_or_send(
                        "❌ Boost cancelled".to_string(),
                        InlineKeyboardMarkup::new(Vec::<Vec<_>>::new()),
                    )
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }
}
