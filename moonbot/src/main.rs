mod modules;

use std::sync::Arc;
use std::time::Duration;

use boost::BoostModule;
use buybot::BuybotModule;
use log::info;
use modules::hub::HubModule;
use moonbot_common::feed::start_feed;
use moonbot_common::health::start_health_server;
use moonbot_common::mongodb::options::ClientOptions;
use moonbot_common::mongodb::{Client, Database};
use moonbot_common::state::Moonbot;
use moonbot_common::teloxide::adaptors::throttle::Limits;
use moonbot_common::teloxide::adaptors::CacheMe;
use moonbot_common::teloxide::prelude::{Bot, RequesterExt};
use moonbot_common::tgbot::BotData;
use moonbot_common::utils::boosts::Boosts;
use reqwest::Url;

fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .with_module_level(
            "moonbot_common",
            if std::env::var("DEBUG").is_ok() {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            },
        )
        .env()
        .init()?;

    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .expect("Failed to install AWS LC provider");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(async {
            let db = get_db().await?;
            let moonbot = Moonbot::new(db.clone()).await?;

            let base: Url = std::env::var("TELEGRAM_API_URL")
                .unwrap_or_else(|_| "https://api.telegram.org".to_string())
                .parse()
                .expect("Invalid TELEGRAM_API_URL");

            let main_bot_token = std::env::var("MAIN_TOKEN").expect("MAIN_TOKEN not set");
            let main_bot = BotData::new(
                CacheMe::new(
                    Bot::with_client(
                        main_bot_token,
                        reqwest::Client::builder()
                            .timeout(Duration::from_secs(30))
                            .build()
                            .unwrap(),
                    )
                    .set_api_url(base)
                    .throttle(Limits::default()),
                ),
                moonbot.arc_clone_state(),
            )
            .await?;
            moonbot.state().add_bot(main_bot).await?;

            let boosts = Arc::new(Boosts::new(db).await?);

            moonbot.state().add_bot_module(HubModule).await;
            {
                let buybot_module = Arc::new(
                    BuybotModule::new(moonbot.arc_clone_state(), Arc::clone(&boosts)).await?,
                );
                moonbot
                    .state()
                    .add_bot_module::<BuybotModule>(Arc::clone(&buybot_module))
                    .await;
                moonbot
                    .state()
                    .add_feed_handler::<BuybotModule>(buybot_module)
                    .await;
            }
            moonbot
                .state()
                .add_bot_module(BoostModule::new(Arc::clone(&boosts)))
                .await;

            moonbot.start_tg_bots().await?;

            info!("Starting Moonbags BuyBot");

            tokio::spawn(start_health_server());
            start_feed(moonbot.arc_clone_state()).await;

            tokio::time::sleep(Duration::from_secs(u64::MAX)).await;

            Ok(())
        })
}

async fn get_db() -> Result<Database, anyhow::Error> {
    let client_uri = std::env::var("MONGODB_URI").expect("MONGODB_URI not set");
    let options = ClientOptions::parse(&client_uri).await?;
    let client = Client::with_options(options)?;
    client
        .default_database()
        .ok_or_else(|| anyhow::anyhow!("No default database specified in MONGODB_URI"))
}
