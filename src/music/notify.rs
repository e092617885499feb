use std::sync::Arc;

use async_trait::async_trait;
use serenity::http::Http;
use serenity::model::channel::ReactionType::Unicode;
use serenity::model::id::{ChannelId, MessageId};
use serenity::utils::Colour;
use thiserror::Error;
use tracing::info;

use crate::music::track::{ControlCommand, Track};

pub const EMBED_FOOTER: &str = "Powered by ALPHA • !help for commands";

/// Transport reactions attached to every "Now Playing" message, in the order
/// they are added.
pub const TRANSPORT_REACTIONS: [&str; 4] = ["⏸️", "▶️", "⏭️", "⏹️"];

pub fn control_for_emoji(emoji: &str) -> Option<ControlCommand> {
    match emoji {
        "⏸️" => Some(ControlCommand::Pause),
        "▶️" => Some(ControlCommand::Resume),
        "⏭️" => Some(ControlCommand::Skip),
        "⏹️" => Some(ControlCommand::Stop),
        _ => None,
    }
}

pub fn thumbnail_url(external_id: &str) -> String {
    format!("https://img.youtube.com/vi/{external_id}/hqdefault.jpg")
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("text channel {0} no longer exists")]
    ChannelMissing(u64),
    #[error("status message {0} no longer exists")]
    MessageMissing(u64),
    #[error("could not send status message: {0}")]
    Send(String),
}

/// Posts playback status to the guild's text channel. Status messages are
/// best-effort; playback never waits on them.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Sends the "Now Playing" message with transport reactions and returns
    /// its message id.
    async fn now_playing(&self, text_channel: u64, track: &Track) -> Result<u64, NotifyError>;

    /// Tells the channel a track could not be started.
    async fn track_failed(&self, text_channel: u64, title: &str) -> Result<(), NotifyError>;

    /// Re-adds transport reactions to an existing status message after a
    /// restart.
    async fn reattach_controls(&self, text_channel: u64, message: u64)
        -> Result<(), NotifyError>;
}

pub struct ChannelNotifier {
    http: Arc<Http>,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>) -> Self {
        ChannelNotifier { http }
    }

    async fn add_transport_reactions(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), NotifyError> {
        for emoji in TRANSPORT_REACTIONS {
            channel
                .create_reaction(&self.http, message, Unicode(emoji.to_string()))
                .await
                .map_err(|e| NotifyError::Send(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn now_playing(&self, text_channel: u64, track: &Track) -> Result<u64, NotifyError> {
        let channel = ChannelId(text_channel);
        let message = channel
            .send_message(&self.http, |m| {
                m.embed(|e| {
                    e.title("Now Playing")
                        .description(format!(
                            "🎶 **{}**\nRequested by: {}",
                            track.title, track.requested_by
                        ))
                        .colour(Colour::BLUE)
                        .footer(|f| f.text(EMBED_FOOTER));
                    if let Some(id) = &track.external_id {
                        e.thumbnail(thumbnail_url(id));
                    }
                    e
                })
            })
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        self.add_transport_reactions(channel, message.id).await?;

        Ok(message.id.0)
    }

    async fn track_failed(&self, text_channel: u64, title: &str) -> Result<(), NotifyError> {
        ChannelId(text_channel)
            .send_message(&self.http, |m| {
                m.embed(|e| {
                    e.title("Cannot Play Track")
                        .description(format!("⚠️ **{title}** could not be played, skipping."))
                        .colour(Colour::RED)
                        .footer(|f| f.text(EMBED_FOOTER))
                })
            })
            .await
            .map_err(|e| NotifyError::Send(e.to_string()))?;

        Ok(())
    }

    async fn reattach_controls(
        &self,
        text_channel: u64,
        message: u64,
    ) -> Result<(), NotifyError> {
        let channel = ChannelId(text_channel);

        if channel.to_channel(&self.http).await.is_err() {
            return Err(NotifyError::ChannelMissing(text_channel));
        }

        if channel.message(&self.http, MessageId(message)).await.is_err() {
            return Err(NotifyError::MessageMissing(message));
        }

        info!("Restoring transport reactions on message {message}");
        self.add_transport_reactions(channel, MessageId(message)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_transport_reaction_maps_to_a_command() {
        for emoji in TRANSPORT_REACTIONS {
            assert!(control_for_emoji(emoji).is_some());
        }
        assert_eq!(control_for_emoji("🎉"), None);
    }
}
