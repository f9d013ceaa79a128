use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::warn;
use serde::{Deserialize, Serialize};
use teloxide::adaptors::throttle::Throttle;
use teloxide::adaptors::CacheMe;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::payloads::{
    EditMessageTextSetters, SendAnimationSetters, SendMessageSetters, SendPhotoSetters,
};
use teloxide::prelude::{
    dptree, CallbackQuery, ChatId, Dispatcher, Message, Requester, Update, UserId,
};
use teloxide::types::{
    InlineKeyboardMarkup, InputFile, LinkPreviewOptions, MessageId, ParseMode, ReplyMarkup,
};
use teloxide::utils::markdown;
use teloxide::{ApiError, Bot, RequestError};

use crate::bot_commands::{MessageCommand, TgCommand};
use crate::state::MoonbotState;
use crate::utils::chat::ChatPermissionLevel;
use crate::utils::format_duration;
use crate::utils::store::PersistentCachedStore;

pub type TgBot = CacheMe<Throttle<Bot>>;

/// Use this as callback data for buttons whose payload is never read.
pub const DONT_CARE: &str = "dontcare";

pub const NOTIFICATION_LIMIT_5M: usize = 20;
pub const NOTIFICATION_LIMIT_1H: usize = 150;
pub const NOTIFICATION_LIMIT_1D: usize = 1000;

pub struct BotData {
    bot: TgBot,
    bot_id: UserId,
    state: Arc<MoonbotState>,
    callback_data_cache: PersistentCachedStore<String, String>,
    message_commands: PersistentCachedStore<UserId, MessageCommand>,
    messages_sent_in_5m: Arc<DashMap<ChatId, AtomicUsize>>,
    messages_sent_in_1h: Arc<DashMap<ChatId, AtomicUsize>>,
    messages_sent_in_1d: Arc<DashMap<ChatId, AtomicUsize>>,
    last_message_limit_notification: DashMap<ChatId, Instant>,
    chat_permission_levels: PersistentCachedStore<ChatId, ChatPermissionLevel>,
}

impl BotData {
    pub async fn new(bot: TgBot, state: Arc<MoonbotState>) -> Result<Self, anyhow::Error> {
        let bot_id = bot.get_me().await?.id;
        let db = state.db();

        let messages_sent_in_5m = Arc::new(DashMap::new());
        let messages_sent_in_1h = Arc::new(DashMap::new());
        let messages_sent_in_1d = Arc::new(DashMap::new());

        for (counters, window) in [
            (Arc::clone(&messages_sent_in_5m), 5 * 60),
            (Arc::clone(&messages_sent_in_1h), 60 * 60),
            (Arc::clone(&messages_sent_in_1d), 24 * 60 * 60),
        ] {
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(window));
                loop {
                    interval.tick().await;
                    counters.clear();
                }
            });
        }

        Ok(Self {
            bot,
            bot_id,
            state,
            callback_data_cache: PersistentCachedStore::new(
                db.clone(),
                &format!("bot{bot_id}_callback_data_cache"),
            )
            .await?,
            message_commands: PersistentCachedStore::new(
                db.clone(),
                &format!("bot{bot_id}_message_commands"),
            )
            .await?,
            messages_sent_in_5m,
            messages_sent_in_1h,
            messages_sent_in_1d,
            last_message_limit_notification: DashMap::new(),
            chat_permission_levels: PersistentCachedStore::new(
                db.clone(),
                &format!("bot{bot_id}_chat_permission_levels"),
            )
            .await?,
        })
    }

    pub async fn start_polling(&self) -> Result<(), anyhow::Error> {
        let bot = self.bot.clone();
        let (msg_sender, mut msg_receiver) = tokio::sync::mpsc::channel(1000);
        let (callback_query_sender, mut callback_query_receiver) = tokio::sync::mpsc::channel(1000);

        tokio::spawn(async move {
            let handler = dptree::entry()
                .branch(Update::filter_message().endpoint(move |msg: Message| {
                    let msg_sender = msg_sender.clone();
                    async move {
                        msg_sender.send(msg).await.unwrap();
                        Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
                    }
                }))
                .branch(Update::filter_callback_query().endpoint(
                    move |callback_query: CallbackQuery| {
                        let callback_query_sender = callback_query_sender.clone();
                        async move {
                            callback_query_sender.send(callback_query).await.unwrap();
                            Ok::<(), Box<dyn std::error::Error + Send + Sync>>(())
                        }
                    },
                ));
            Dispatcher::builder(bot, handler).build().dispatch().await;
        });

        let me = self.id();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(msg) = msg_receiver.recv().await {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let text = msg.text().or(msg.caption()).unwrap_or_default();
                    for module in state.bot_modules().await.iter() {
                        let bot = state.bot(&me).unwrap();
                        let user_id = msg.from.as_ref().map(|user| user.id);
                        let result = if let Some(data) = text.strip_prefix("/start") {
                            module
                                .handle_message(
                                    &bot,
                                    user_id,
                                    msg.chat.id,
                                    MessageCommand::Start(data.trim().to_owned()),
                                    text,
                                    &msg,
                                )
                                .await
                        } else if let Some(user_id) = user_id {
                            let command = bot
                                .get_message_command(&user_id)
                                .await
                                .unwrap_or(MessageCommand::None);
                            log::debug!(
                                "chat={:?} command={command:?} module={}: {text}",
                                msg.chat.id,
                                module.name()
                            );
                            module
                                .handle_message(
                                    &bot,
                                    Some(user_id),
                                    msg.chat.id,
                                    command,
                                    text,
                                    &msg,
                                )
                                .await
                        } else {
                            Ok(())
                        };
                        if let Err(err) = result {
                            warn!(
                                "Error handling message {} in module {}: {:?}",
                                text,
                                module.name(),
                                err
                            );
                        }
                    }
                });
            }
        });

        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            while let Some(callback_query) = callback_query_receiver.recv().await {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let (Some(data), Some(message)) =
                        (callback_query.data, callback_query.message)
                    {
                        for module in state.bot_modules().await.iter() {
                            let bot = state.bot(&me).unwrap();
                            let context = TgCallbackContext::new(
                                bot.value(),
                                callback_query.from.id,
                                message.chat().id,
                                Some(message.id()),
                                &data,
                            );
                            log::debug!("Callback data: {data}, module: {}", module.name());
                            let mut query = Some(MustAnswerCallbackQuery {
                                bot_id: me,
                                callback_query: callback_query.id.clone(),
                                callback_query_answered: false,
                            });
                            if let Err(err) = module.handle_callback(context, &mut query).await {
                                warn!(
                                    "Error handling callback data {} in module {}: {:?}",
                                    data,
                                    module.name(),
                                    err
                                );
                            }
                            if let Some(query) = query {
                                query.answer_callback_query(&state).await;
                            }
                        }
                    }
                });
            }
        });
        Ok(())
    }

    pub fn bot(&self) -> &TgBot {
        &self.bot
    }

    pub fn state(&self) -> &Arc<MoonbotState> {
        &self.state
    }

    pub fn id(&self) -> UserId {
        self.bot_id
    }

    pub async fn send_text_message(
        &self,
        chat_id: ChatId,
        message: String,
        reply_markup: impl Into<ReplyMarkup>,
    ) -> Result<Message, anyhow::Error> {
        Ok(self
            .bot
            .send_message(chat_id, &message)
            .parse_mode(ParseMode::MarkdownV2)
            .reply_markup(reply_markup)
            .link_preview_options(LinkPreviewOptions {
                is_disabled: true,
                url: None,
                prefer_small_media: false,
                prefer_large_media: false,
                show_above_text: false,
            })
            .await
            .inspect_err(log_parse_error(message))?)
    }

    pub async fn send(
        &self,
        chat_id: ChatId,
        text: impl Into<String>,
        reply_markup: impl Into<ReplyMarkup>,
        attachment: Attachment,
    ) -> Result<Message, anyhow::Error> {
        let text = text.into();
        Ok(match attachment {
            Attachment::None => {
                self.bot
                    .send_message(chat_id, text.clone())
                    .parse_mode(ParseMode::MarkdownV2)
                    .reply_markup(reply_markup)
                    .link_preview_options(LinkPreviewOptions {
                        is_disabled: true,
                        url: None,
                        prefer_small_media: false,
                        prefer_large_media: false,
                        show_above_text: false,
                    })
                    .await
                    .inspect_err(log_parse_error(text))?
            }
            Attachment::PhotoFileId(file_id) => self
                .bot
                .send_photo(chat_id, InputFile::file_id(file_id))
                .caption(text.clone())
                .parse_mode(ParseMode::MarkdownV2)
                .reply_markup(reply_markup)
                .await
                .inspect_err(log_parse_error(text))?,
            Attachment::AnimationFileId(file_id) => self
                .bot
                .send_animation(chat_id, InputFile::file_id(file_id))
                .caption(text.clone())
                .parse_mode(ParseMode::MarkdownV2)
                .reply_markup(reply_markup)
                .await
                .inspect_err(log_parse_error(text))?,
        })
    }

    pub async fn create_hash_reference(&self, data: String) -> Result<String, anyhow::Error> {
        let mut hasher = DefaultHasher::new();
        data.hash(&mut hasher);
        let reference = format!("{:016x}", hasher.finish());
        self.callback_data_cache
            .insert_if_not_exists(reference.clone(), data)
            .await?;
        Ok(reference)
    }

    pub async fn to_callback_data(&self, data: &TgCommand) -> String {
        let data = serde_json::to_string(data).unwrap();
        self.create_hash_reference(data)
            .await
            .expect("Error creating callback data")
    }

    pub async fn parse_callback_data(&self, reference: &str) -> Result<TgCommand, anyhow::Error> {
        let data = self
            .callback_data_cache
            .get(&reference.to_string())
            .await
            .ok_or_else(|| anyhow::anyhow!("Callback data cannot be restored"))?;
        Ok(serde_json::from_str(&data)?)
    }

    pub async fn get_message_command(&self, user_id: &UserId) -> Option<MessageCommand> {
        self.message_commands.get(user_id).await
    }

    pub async fn set_message_command(
        &self,
        user_id: UserId,
        command: MessageCommand,
    ) -> Result<(), anyhow::Error> {
        self.message_commands
            .insert_or_update(user_id, command)
            .await?;
        Ok(())
    }

    pub async fn remove_message_command(&self, user_id: &UserId) -> Result<(), anyhow::Error> {
        self.message_commands.remove(user_id).await?;
        Ok(())
    }

    pub async fn reached_notification_limit(&self, chat_id: ChatId) -> bool {
        for (counters, limit, window) in [
            (&self.messages_sent_in_5m, NOTIFICATION_LIMIT_5M, 5 * 60),
            (&self.messages_sent_in_1h, NOTIFICATION_LIMIT_1H, 60 * 60),
            (
                &self.messages_sent_in_1d,
                NOTIFICATION_LIMIT_1D,
                24 * 60 * 60,
            ),
        ] {
            if let Some(messages) = counters.get(&chat_id) {
                let messages = messages.fetch_add(1, Ordering::Relaxed);
                if messages > limit {
                    self.send_message_limit_message(
                        chat_id,
                        limit,
                        Duration::from_secs(window),
                        messages,
                    )
                    .await;
                    return true;
                }
            } else {
                counters.insert(chat_id, AtomicUsize::new(1));
            }
        }
        false
    }

    async fn send_message_limit_message(
        &self,
        chat_id: ChatId,
        limit: usize,
        duration: Duration,
        messages: usize,
    ) {
        if let Some(last_notification) = self.last_message_limit_notification.get(&chat_id) {
            if last_notification.elapsed() < duration {
                return;
            }
        }
        self.last_message_limit_notification
            .insert(chat_id, Instant::now());
        let bot = self.bot.clone();
        tokio::spawn(async move {
            // Sent with a delay so it lands after the alerts that tripped the limit
            tokio::time::sleep(Duration::from_secs(10)).await;
            if let Err(err) = bot
                .send_message(chat_id, format!(
                    "This chat has reached the limit of {messages}/{limit} notifications in {}\\.\nConsider raising the minimum buy size\\.",
                    markdown::escape(&format_duration(duration))
                ))
                .parse_mode(ParseMode::MarkdownV2)
                .link_preview_options(LinkPreviewOptions {
                    is_disabled: true,
                    url: None,
                    prefer_small_media: false,
                    prefer_large_media: false,
                    show_above_text: false,
                })
                .await
            {
                warn!("Error sending message limit notification: {err:?}");
            }
        });
    }

    pub async fn get_chat_permission_level(&self, chat_id: ChatId) -> ChatPermissionLevel {
        self.chat_permission_levels
            .get(&chat_id)
            .await
            .unwrap_or_default()
    }

    pub async fn set_chat_permission_level(
        &self,
        chat_id: ChatId,
        permission_level: ChatPermissionLevel,
    ) -> Result<(), anyhow::Error> {
        self.chat_permission_levels
            .insert_or_update(chat_id, permission_level)
            .await?;
        Ok(())
    }
}

pub struct TgCallbackContext<'a> {
    bot: &'a BotData,
    user_id: UserId,
    chat_id: ChatId,
    last_message: Option<MessageId>,
    data: &'a str,
}

impl<'a> TgCallbackContext<'a> {
    pub fn new(
        bot: &'a BotData,
        user_id: UserId,
        chat_id: ChatId,
        last_message: Option<MessageId>,
        data: &'a str,
    ) -> Self {
        Self {
            bot,
            user_id,
            chat_id,
            last_message,
            data,
        }
    }

    pub fn bot(&self) -> &BotData {
        self.bot
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    pub fn message_id(&self) -> Option<MessageId> {
        self.last_message
    }

    pub async fn parse_command(&self) -> Result<TgCommand, anyhow::Error> {
        if self.data == DONT_CARE {
            return Err(anyhow::anyhow!("Tried to parse DONT_CARE callback data"));
        }
        self.bot.parse_callback_data(self.data).await
    }

    pub async fn edit_or_send(
        &mut self,
        text: impl Into<String>,
        reply_markup: InlineKeyboardMarkup,
    ) -> Result<(), anyhow::Error> {
        let text = text.into();
        if let Some(message_id) = self.last_message {
            let edit_result = self
                .bot
                .bot()
                .edit_message_text(self.chat_id, message_id, text.clone())
                .parse_mode(ParseMode::MarkdownV2)
                .link_preview_options(LinkPreviewOptions {
                    is_disabled: true,
                    url: None,
                    prefer_small_media: false,
                    prefer_large_media: false,
                    show_above_text: false,
                })
                .reply_markup(reply_markup.clone())
                .await;
            match edit_result {
                Ok(_) => {}
                Err(RequestError::Api(ApiError::MessageNotModified)) => {}
                Err(RequestError::Api(ApiError::Unknown(error_text))) => {
                    if error_text == "Bad Request: there is no text in the message to edit" {
                        let message = self.send(text, reply_markup, Attachment::None).await?;
                        self.last_message = Some(message.id);
                    } else {
                        return Err(anyhow::anyhow!(
                            "Error editing message: Unknown error: {error_text:?}"
                        ));
                    }
                }
                Err(err) => {
                    return Err(anyhow::anyhow!("Error editing message: {err:?}"));
                }
            }
        } else {
            let message = self.send(text, reply_markup, Attachment::None).await?;
            self.last_message = Some(message.id);
        }
        Ok(())
    }

    pub async fn send(
        &self,
        text: impl Into<String>,
        reply_markup: impl Into<ReplyMarkup>,
        attachment: Attachment,
    ) -> Result<Message, anyhow::Error> {
        self.bot
            .send(self.chat_id, text, reply_markup, attachment)
            .await
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub enum Attachment {
    #[default]
    None,
    PhotoFileId(String),
    AnimationFileId(String),
}

pub struct MustAnswerCallbackQuery {
    bot_id: UserId,
    callback_query: String,
    callback_query_answered: bool,
}

impl MustAnswerCallbackQuery {
    pub async fn answer_callback_query(mut self, state: &MoonbotState) {
        let bot = state
            .bot(&self.bot_id)
            .expect("Bot not found while answering a callback query");
        if let Err(err) = bot
            .bot()
            .answer_callback_query(self.callback_query.clone())
            .await
        {
            warn!(
                "Error answering callback query {}: {:?}",
                self.callback_query, err
            );
        }
        self.callback_query_answered = true;
    }
}

impl Drop for MustAnswerCallbackQuery {
    fn drop(&mut self) {
        if !self.callback_query_answered {
            panic!("Callback query {} was not answered", self.callback_query);
        }
    }
}

fn log_parse_error(text: impl Into<String>) -> impl FnOnce(&RequestError) {
    let text = text.into();
    move |err| {
        if let RequestError::Api(ApiError::CantParseEntities(s)) = err {
            warn!("Can't parse entities in message: {s}\n{text:?}");
        }
    }
}
