use async_trait::async_trait;
use moonbot_common::bot_commands::{MessageCommand, TgCommand};
use moonbot_common::state::MoonbotModule;
use moonbot_common::teloxide::prelude::{ChatId, Message, Requester, UserId};
use moonbot_common::teloxide::types::{
    ButtonRequest, ChatAdministratorRights, ChatShared, InlineKeyboardButton,
    InlineKeyboardMarkup, KeyboardButton, KeyboardButtonRequestChat, ReplyMarkup, RequestId,
};
use moonbot_common::teloxide::utils::markdown;
use moonbot_common::tgbot::{
    Attachment, BotData, MustAnswerCallbackQuery, TgCallbackContext, DONT_CARE,
};
use moonbot_common::utils::chat::{check_admin_permission_in_chat, get_chat_title_cached_5m};
use moonbot_common::utils::trending_channel_link;

const CANCEL_TEXT: &str = "Cancel";

pub struct HubModule;

impl HubModule {
    async fn open_main_menu<'a>(
        &'a self,
        context: &mut TgCallbackContext<'a>,
    ) -> Result<(), anyhow::Error> {
        context
            .bot()
            .remove_message_command(&context.user_id())
            .await?;
        let message = {
            use rand::prelude::SliceRandom;
            let messages = [
                "Welcome to Moonbags BuyBot 🌕\n\nTrack every buy of your token on Sui, hype your community, and climb the trending channel\\.",
                "Welcome to Moonbags BuyBot 🌕\n\nYour community sees every buy before the chart does 📈",
                "Welcome to Moonbags BuyBot 🌕\n\nBuy alerts, trending leaderboard, and paid boosts for your Sui token 🚀",
            ];
            messages
                .choose(&mut rand::thread_rng())
                .unwrap()
                .to_string()
        };
        let mut buttons = vec![vec![InlineKeyboardButton::callback(
            "⚙️ Set Up a Group",
            context.bot().to_callback_data(&TgCommand::ChooseChat).await,
        )]];
        buttons.push(vec![InlineKeyboardButton::callback(
            "🚀 Boost a Token",
            context.bot().to_callback_data(&TgCommand::BoostToken).await,
        )]);
        if let Some(link) = trending_channel_link() {
            buttons.push(vec![InlineKeyboardButton::url("🏆 Trending Channel", link)]);
        }
        let reply_markup = InlineKeyboardMarkup::new(buttons);
        context.edit_or_send(message, reply_markup).await?;
        Ok(())
    }

    async fn open_chat_selector(&self, context: TgCallbackContext<'_>) -> Result<(), anyhow::Error> {
        if !context.chat_id().is_user() {
            return Ok(());
        }
        context
            .bot()
            .set_message_command(context.user_id(), MessageCommand::ChooseChat)
            .await?;
        let message = "What chat do you want to set up?".to_string();
        let requested_bot_rights = Some(ChatAdministratorRights {
            can_manage_chat: true,
            is_anonymous: false,
            can_delete_messages: false,
            can_manage_video_chats: false,
            can_restrict_members: false,
            can_promote_members: false,
            can_change_info: false,
            can_invite_users: false,
            can_post_messages: Some(true),
            can_edit_messages: None,
            can_pin_messages: None,
            can_manage_topics: None,
            can_post_stories: None,
            can_edit_stories: None,
            can_delete_stories: None,
        });
        let reply_markup = ReplyMarkup::keyboard(vec![
            vec![KeyboardButton {
                text: "Group chat".into(),
                request: Some(ButtonRequest::RequestChat(KeyboardButtonRequestChat {
                    request_id: RequestId(69),
                    chat_is_channel: false,
                    chat_is_forum: None,
                    chat_has_username: None,
                    chat_is_created: None,
                    user_administrator_rights: requested_bot_rights.clone(),
                    bot_administrator_rights: requested_bot_rights,
                    bot_is_member: false,
                })),
            }],
            vec![KeyboardButton {
                text: CANCEL_TEXT.into(),
                request: None,
            }],
        ]);
        context
            .send(message, reply_markup, Attachment::None)
            .await?;
        Ok(())
    }

    async fn open_chat_settings<'a>(
        &'a self,
        context: &mut TgCallbackContext<'a>,
        target_chat_id: ChatId,
    ) -> Result<(), anyhow::Error> {
        if !check_admin_permission_in_chat(context.bot(), target_chat_id, context.user_id()).await {
            return Ok(());
        }
        let chat_name = markdown::escape(
            &get_chat_title_cached_5m(context.bot().bot(), target_chat_id)
                .await?
                .unwrap_or("DM".to_string()),
        );
        let message = format!("Settings for *{chat_name}*");
        let buttons = vec![
            vec![InlineKeyboardButton::callback(
                "💰 Buybot",
                context
                    .bot()
                    .to_callback_data(&TgCommand::BuybotSettings(target_chat_id))
                    .await,
            )],
            vec![InlineKeyboardButton::callback(
                "⬅️ Back",
                context
                    .bot()
                    .to_callback_data(&TgCommand::OpenMainMenu)
                    .await,
            )],
        ];
        let reply_markup = InlineKeyboardMarkup::new(buttons);
        context.edit_or_send(message, reply_markup).await?;
        Ok(())
    }
}

#[async_trait]
impl MoonbotModule for HubModule {
    fn name(&self) -> &'static str {
        "Hub"
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
        let Some(user_id) = user_id else {
            return Ok(());
        };
        if !chat_id.is_user() {
            // The only thing the bot does in groups is point admins to DM
            if text.starts_with("/start") {
                if !check_admin_permission_in_chat(bot, chat_id, user_id).await {
                    return Ok(());
                }
                let username = bot
                    .bot()
                    .get_me()
                    .await?
                    .username
                    .clone()
                    .unwrap_or_default();
                let reply_markup =
                    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::url(
                        "Start Setup",
                        format!("tg://resolve?domain={username}").parse()?,
                    )]]);
                bot.send_text_message(
                    chat_id,
                    "⚙️ Continue setup in private chat:".to_string(),
                    reply_markup,
                )
                .await?;
            }
            return Ok(());
        }
        if text == "/cancel" {
            // Clears whatever input any module is waiting for
            bot.remove_message_command(&user_id).await?;
            bot.send_text_message(
                chat_id,
                "❌ Operation cancelled".to_string(),
                ReplyMarkup::kb_remove(),
            )
            .await?;
            self.open_main_menu(&mut TgCallbackContext::new(
                bot, user_id, chat_id, None, DONT_CARE,
            ))
            .await?;
            return Ok(());
        }
        match command {
            MessageCommand::Start(_) => {
                self.open_main_menu(&mut TgCallbackContext::new(
                    bot, user_id, chat_id, None, DONT_CARE,
                ))
                .await?;
            }
            MessageCommand::ChooseChat => {
                if let Some(ChatShared {
                    chat_id: target_chat_id,
                    ..
                }) = message.shared_chat()
                {
                    bot.remove_message_command(&user_id).await?;
                    let chat_name = markdown::escape(
                        &get_chat_title_cached_5m(bot.bot(), *target_chat_id)
                            .await?
                            .unwrap_or("DM".to_string()),
                    );
                    bot.send_text_message(
                        chat_id,
                        format!("You have selected {chat_name}"),
                        ReplyMarkup::kb_remove(),
                    )
                    .await?;
                    self.open_chat_settings(
                        &mut TgCallbackContext::new(bot, user_id, chat_id, None, DONT_CARE),
                        *target_chat_id,
                    )
                    .await?;
                } else if text == CANCEL_TEXT {
                    bot.remove_message_command(&user_id).await?;
                    bot.send_text_message(
                        chat_id,
                        "Cancelled".to_string(),
                        ReplyMarkup::kb_remove(),
                    )
                    .await?;
                    self.open_main_menu(&mut TgCallbackContext::new(
                        bot, user_id, chat_id, None, DONT_CARE,
                    ))
                    .await?;
                } else {
                    let buttons = vec![vec![InlineKeyboardButton::callback(
                        "Cancel",
                        bot.to_callback_data(&TgCommand::CancelChat).await,
                    )]];
                    bot.send_text_message(
                        chat_id,
                        "Please use the 'Group chat' button".to_string(),
                        InlineKeyboardMarkup::new(buttons),
                    )
                    .await?;
                }
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
            TgCommand::OpenMainMenu => {
                self.open_main_menu(&mut context).await?;
            }
            TgCommand::ChooseChat => {
                self.open_chat_selector(context).await?;
            }
            TgCommand::ChatSettings(target_chat_id) => {
                self.open_chat_settings(&mut context, target_chat_id)
                    .await?;
            }
            TgCommand::CancelChat => {
                context
                    .bot()
                    .remove_message_command(&context.user_id())
                    .await?;
                context
                    .send(
                        "Cancelled".to_string(),
                        ReplyMarkup::kb_remove(),
                        Attachment::None,
                    )
                    .await?;
                self.open_main_menu(&mut context).await?;
            }
            _ => {}
        }
        Ok(())
    }
}
