use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{
    mapref::{multiple::RefMulti, one::Ref},
    DashMap,
};
use mongodb::Database;
use teloxide::prelude::{ChatId, Message, UserId};
use tokio::sync::{RwLock, RwLockReadGuard};

use crate::bot_commands::MessageCommand;
use crate::feed::FeedEventHandler;
use crate::tgbot::{BotData, MustAnswerCallbackQuery, TgCallbackContext};
use crate::utils::market::fetch_sui_price;
use crate::utils::sui::CoinType;

pub struct Moonbot {
    state: Arc<MoonbotState>,
}

impl Moonbot {
    pub async fn new(db: Database) -> Result<Self, anyhow::Error> {
        let state = Arc::new(MoonbotState::new(db));
        Ok(Self { state })
    }

    pub fn state(&self) -> &MoonbotState {
        &self.state
    }

    pub fn arc_clone_state(&self) -> Arc<MoonbotState> {
        Arc::clone(&self.state)
    }

    pub async fn start_tg_bots(&self) -> Result<(), anyhow::Error> {
        for module in self.state.bot_modules().await.iter() {
            module.start().await?;
        }

        for bot in self.state.bots() {
            bot.start_polling().await?;
        }

        Ok(())
    }
}

pub struct MoonbotState {
    bots: DashMap<UserId, BotData>,
    bot_modules: RwLock<Vec<Arc<dyn MoonbotModule>>>,
    feed_handlers: RwLock<Vec<Arc<dyn FeedEventHandler>>>,
    db: Database,
    sui_price: Arc<RwLock<f64>>,
    tracked_coins: Arc<RwLock<HashSet<CoinType>>>,
}

impl MoonbotState {
    pub fn new(db: Database) -> Self {
        let sui_price = Arc::new(RwLock::new(0f64));
        let sui_price_clone = Arc::clone(&sui_price);
        tokio::spawn(async move {
            loop {
                match fetch_sui_price().await {
                    Ok(price) if price > 0.0 => *sui_price_clone.write().await = price,
                    Ok(_) => log::warn!("Market API returned a zero SUI price"),
                    Err(err) => log::warn!("Failed to refresh SUI price: {err:?}"),
                }
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
        });
        Self {
            bots: DashMap::new(),
            bot_modules: RwLock::new(Vec::new()),
            feed_handlers: RwLock::new(Vec::new()),
            db,
            sui_price,
            tracked_coins: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub async fn add_bot(&self, bot: BotData) -> Result<(), anyhow::Error> {
        let user_id = bot.id();
        self.bots.insert(user_id, bot);
        Ok(())
    }

    pub fn bot(&self, user_id: &UserId) -> Option<Ref<UserId, BotData>> {
        self.bots.get(user_id)
    }

    pub fn bots(&self) -> Vec<RefMulti<UserId, BotData>> {
        self.bots.iter().collect()
    }

    pub async fn add_bot_module<M: MoonbotModule>(&self, module: impl Into<Arc<M>>) {
        self.bot_modules.write().await.push(module.into());
    }

    pub async fn bot_modules(&self) -> RwLockReadGuard<Vec<Arc<dyn MoonbotModule>>> {
        self.bot_modules.read().await
    }

    pub async fn add_feed_handler<H: FeedEventHandler>(&self, handler: impl Into<Arc<H>>) {
        self.feed_handlers.write().await.push(handler.into());
    }

    pub async fn feed_handlers(&self) -> RwLockReadGuard<Vec<Arc<dyn FeedEventHandler>>> {
        self.feed_handlers.read().await
    }

    pub fn db(&self) -> Database {
        self.db.clone()
    }

    /// Last known SUI/USD price, 0 until the first successful refresh.
    pub async fn sui_price(&self) -> f64 {
        *self.sui_price.read().await
    }

    /// The union of coins any group subscribes to. The polling feed only
    /// asks the trade API about these.
    pub async fn tracked_coins(&self) -> HashSet<CoinType> {
        self.tracked_coins.read().await.clone()
    }

    pub async fn set_tracked_coins(&self, coins: HashSet<CoinType>) {
        *self.tracked_coins.write().await = coins;
    }
}

#[async_trait]
pub trait MoonbotModule: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn start(&self) -> Result<(), anyhow::Error> {
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
    ) -> Result<(), anyhow::Error>;

    async fn handle_callback<'a>(
        &'a self,
        context: TgCallbackContext<'a>,
        query: &mut Option<MustAnswerCallbackQuery>,
    ) -> Result<(), anyhow::Error>;
}
