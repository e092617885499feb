use std::sync::Arc;

use dotenvy::dotenv;
use serenity::client::Client;
use serenity::framework::StandardFramework;
use serenity::prelude::GatewayIntents;
use songbird::{SerenityInit, Songbird};
use tokio::sync::mpsc;
use tracing::info;

use crate::commands::GENERAL_GROUP;
use crate::config::BotConfig;
use crate::handler::Handler;
use crate::keys::{ConfigKey, GuildStoreKey, SessionManagerKey};
use crate::music::{
    ChannelNotifier, PlayToken, SessionManager, SongbirdGateway, SongbirdSink, YtDlpResolver,
};
use crate::store::GuildStore;

mod commands;
mod config;
mod handler;
mod keys;
mod music;
mod store;

#[tokio::main]
async fn main() {
    dotenv().ok();

    tracing_subscriber::fmt::init();

    let config = Arc::new(BotConfig::from_env().expect("Invalid configuration"));

    let framework = StandardFramework::new()
        .configure(|c| c.prefix("!"))
        .group(&GENERAL_GROUP);

    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;

    let songbird = Songbird::serenity();

    let mut client = Client::builder(&config.token, intents)
        .event_handler(Handler::new())
        .framework(framework)
        .register_songbird_with(songbird.clone())
        .await
        .expect("Err creating client");

    let store = Arc::new(GuildStore::new(config.data_dir.clone()));

    let (end_tx, mut end_rx) = mpsc::unbounded_channel::<PlayToken>();

    let manager = Arc::new(SessionManager::new(
        Arc::new(YtDlpResolver::default()),
        Arc::new(SongbirdSink::new(songbird.clone(), end_tx)),
        Arc::new(SongbirdGateway::new(songbird)),
        Arc::new(ChannelNotifier::new(client.cache_and_http.http.clone())),
        store.clone(),
    ));

    {
        let mut data = client.data.write().await;
        data.insert::<SessionManagerKey>(manager.clone());
        data.insert::<GuildStoreKey>(store);
        data.insert::<ConfigKey>(config);
    }

    // Track-end events from all guilds funnel through one consumer so that
    // queue transitions happen one at a time.
    tokio::spawn(async move {
        while let Some(token) = end_rx.recv().await {
            manager.on_track_end(token).await;
        }
    });

    tokio::spawn(async move {
        let _ = client
            .start()
            .await
            .map_err(|why| info!("Client ended: {why:?}"));
    });

    tokio::signal::ctrl_c()
        .await
        .expect("Control-C interruption failed!");

    info!("Received Ctrl-C, shutting down.");
}
