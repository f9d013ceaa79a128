pub mod bot_commands;
pub mod feed;
pub mod health;
pub mod state;
pub mod tgbot;
pub mod utils;

pub use mongodb;
pub use teloxide;
