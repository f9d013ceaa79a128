use serde::{Deserialize, Serialize};
use teloxide::prelude::ChatId;

#[allow(unused_imports)]
use crate::utils::{boosts::BoostDuration, sui::CoinType};

/// Callback-button payloads. Serialized, stored under a short hash
/// reference, and restored when the button is pressed.
#[derive(Serialize, Deserialize, Debug)]
pub enum TgCommand {
    OpenMainMenu,
    ChooseChat,
    ChatSettings(ChatId),
    CancelChat,
    #[cfg(feature = "buybot-module")]
    BuybotSettings(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetToken(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetMinBuy(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetEmoji(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotLinks(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetWebsite(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetTelegram(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetTwitter(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetChart(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetMedia(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotPreview(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotFinish(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotDisable(ChatId),
    #[cfg(feature = "boost-module")]
    BoostToken,
    #[cfg(feature = "boost-module")]
    BoostSelectDuration(CoinType, BoostDuration),
    #[cfg(feature = "boost-module")]
    BoostCancel,
}

/// What the next plain message from a user means. One entry per user,
/// persisted, cleared when the input is consumed or cancelled.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub enum MessageCommand {
    None,
    Start(String),
    ChooseChat,
    #[cfg(feature = "buybot-module")]
    BuybotSetToken(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetMinBuy(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetEmoji(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetWebsite(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetTelegram(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetTwitter(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetChart(ChatId),
    #[cfg(feature = "buybot-module")]
    BuybotSetMedia(ChatId),
    #[cfg(feature = "boost-module")]
    BoostEnterToken,
    #[cfg(feature = "boost-module")]
    BoostAwaitTx,
}
