use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::tracks::{PlayMode, TrackHandle};
use songbird::{Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use crate::music::track::PlayToken;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("no voice connection for guild {0}")]
    NotConnected(u64),
    #[error("could not create audio source: {0}")]
    Source(String),
    #[error("track control failed: {0}")]
    Control(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("could not join voice channel {channel}: {reason}")]
    Join { channel: u64, reason: String },
    #[error("could not leave voice channel: {0}")]
    Leave(String),
}

/// Plays one stream at a time per guild. Arming replaces whatever was
/// playing; the completion for an armed track is reported exactly once,
/// whether it ended naturally, was stopped, or errored.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    async fn arm(&self, guild: u64, stream_url: &str, token: PlayToken) -> Result<(), SinkError>;
    async fn pause(&self, guild: u64) -> Result<(), SinkError>;
    async fn resume(&self, guild: u64) -> Result<(), SinkError>;
    async fn stop(&self, guild: u64) -> Result<(), SinkError>;
    async fn is_playing(&self, guild: u64) -> bool;
    async fn is_paused(&self, guild: u64) -> bool;
}

/// One voice-transport handle per guild, owned by the client library.
/// `join` moves the existing connection when the bot is already connected
/// elsewhere in the guild.
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn current_channel(&self, guild: u64) -> Option<u64>;
    async fn join(&self, guild: u64, channel: u64) -> Result<(), GatewayError>;
    async fn leave(&self, guild: u64) -> Result<(), GatewayError>;
}

/// Songbird-backed sink. Track-end events carry the `PlayToken` of the
/// attempt that armed them back through `ends`, where a single consumer
/// feeds them to the session manager.
pub struct SongbirdSink {
    manager: Arc<Songbird>,
    ends: mpsc::UnboundedSender<PlayToken>,
    handles: Mutex<HashMap<u64, TrackHandle>>,
}

impl SongbirdSink {
    pub fn new(manager: Arc<Songbird>, ends: mpsc::UnboundedSender<PlayToken>) -> Self {
        SongbirdSink {
            manager,
            ends,
            handles: Mutex::new(HashMap::new()),
        }
    }

    async fn handle(&self, guild: u64) -> Option<TrackHandle> {
        self.handles.lock().await.get(&guild).cloned()
    }

    async fn play_mode(&self, guild: u64) -> Option<PlayMode> {
        let handle = self.handle(guild).await?;
        handle.get_info().await.ok().map(|info| info.playing)
    }
}

#[async_trait]
impl PlaybackSink for SongbirdSink {
    async fn arm(&self, guild: u64, stream_url: &str, token: PlayToken) -> Result<(), SinkError> {
        let call = self
            .manager
            .get(GuildId(guild))
            .ok_or(SinkError::NotConnected(guild))?;

        let source = songbird::ytdl(stream_url)
            .await
            .map_err(|e| SinkError::Source(e.to_string()))?;

        let mut call = call.lock().await;
        let handle = call.play_only_source(source);

        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    token,
                    ends: self.ends.clone(),
                },
            )
            .map_err(|e| SinkError::Control(format!("{e:?}")))?;

        self.handles.lock().await.insert(guild, handle);

        Ok(())
    }

    async fn pause(&self, guild: u64) -> Result<(), SinkError> {
        let handle = self
            .handle(guild)
            .await
            .ok_or(SinkError::NotConnected(guild))?;
        handle.pause().map_err(|e| SinkError::Control(format!("{e:?}")))
    }

    async fn resume(&self, guild: u64) -> Result<(), SinkError> {
        let handle = self
            .handle(guild)
            .await
            .ok_or(SinkError::NotConnected(guild))?;
        handle.play().map_err(|e| SinkError::Control(format!("{e:?}")))
    }

    async fn stop(&self, guild: u64) -> Result<(), SinkError> {
        let handle = self.handles.lock().await.remove(&guild);
        match handle {
            Some(handle) => handle
                .stop()
                .map_err(|e| SinkError::Control(format!("{e:?}"))),
            None => Ok(()),
        }
    }

    async fn is_playing(&self, guild: u64) -> bool {
        matches!(self.play_mode(guild).await, Some(PlayMode::Play))
    }

    async fn is_paused(&self, guild: u64) -> bool {
        matches!(self.play_mode(guild).await, Some(PlayMode::Pause))
    }
}

struct TrackEndNotifier {
    token: PlayToken,
    ends: mpsc::UnboundedSender<PlayToken>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        info!(
            "Track ended for guild {} (generation {})",
            self.token.guild, self.token.generation
        );
        let _ = self.ends.send(self.token);
        None
    }
}

pub struct SongbirdGateway {
    manager: Arc<Songbird>,
}

impl SongbirdGateway {
    pub fn new(manager: Arc<Songbird>) -> Self {
        SongbirdGateway { manager }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn current_channel(&self, guild: u64) -> Option<u64> {
        let call = self.manager.get(GuildId(guild))?;
        let channel = call.lock().await.current_channel()?;
        Some(channel.0)
    }

    async fn join(&self, guild: u64, channel: u64) -> Result<(), GatewayError> {
        let (call, result) = self.manager.join(GuildId(guild), ChannelId(channel)).await;
        result.map_err(|e| GatewayError::Join {
            channel,
            reason: e.to_string(),
        })?;

        let mut call = call.lock().await;
        if !call.is_deaf() {
            if let Err(e) = call.deafen(true).await {
                info!("Deafen failed due to {e:?}");
            }
        }

        Ok(())
    }

    async fn leave(&self, guild: u64) -> Result<(), GatewayError> {
        if self.manager.get(GuildId(guild)).is_none() {
            return Ok(());
        }

        self.manager
            .remove(GuildId(guild))
            .await
            .map_err(|e| GatewayError::Leave(e.to_string()))
    }
}
