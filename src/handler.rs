use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serenity::async_trait;
use serenity::client::{Context, EventHandler};
use serenity::model::channel::{Message, Reaction, ReactionType::Unicode};
use serenity::model::event::MessageUpdateEvent;
use serenity::model::gateway::{Activity, Ready};
use serenity::model::guild::Member;
use serenity::model::id::{ChannelId, GuildId, MessageId};
use serenity::model::prelude::VoiceState;
use serenity::model::user::User;
use serenity::prelude::Mentionable;
use serenity::utils::Colour;
use tracing::info;

use crate::commands::{bot_config, check_msg, session_manager};
use crate::keys::BotUserKey;
use crate::music::notify::EMBED_FOOTER;
use crate::music::{control_for_emoji, ControlCommand};

pub struct Handler {
    started: AtomicBool,
}

impl Handler {
    pub fn new() -> Self {
        Handler {
            started: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);

        {
            let mut data = ctx.data.write().await;
            data.insert::<BotUserKey>(ready.user.id.0);
        }

        // `ready` fires again on reconnects; presence rotation and session
        // recovery only run for the first one.
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let presence_ctx = ctx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(15));
            loop {
                for activity in [
                    Activity::playing("Alpha Roleplay"),
                    Activity::watching("the server"),
                    Activity::listening("music"),
                ] {
                    interval.tick().await;
                    presence_ctx.set_activity(activity).await;
                }
            }
        });

        let manager = session_manager(&ctx).await;
        tokio::spawn(async move {
            manager.recover_all().await;
        });
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.content == "!ping" {
            if let Err(why) = msg.channel_id.say(&ctx.http, "Pong!").await {
                info!("Error sending message: {why:?}");
            }
        }
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        let (Some(guild_id), Some(user_id)) = (reaction.guild_id, reaction.user_id) else {
            return;
        };

        let bot_id = {
            let data = ctx.data.read().await;
            data.get::<BotUserKey>().copied()
        };
        if bot_id == Some(user_id.0) {
            return;
        }

        let emoji = match &reaction.emoji {
            Unicode(emoji) => emoji.clone(),
            _ => return,
        };
        let Some(command) = control_for_emoji(&emoji) else {
            return;
        };

        let manager = session_manager(&ctx).await;
        let Some(token) = manager
            .controls_for_message(guild_id.0, reaction.message_id.0)
            .await
        else {
            return;
        };

        let _ = reaction.delete(&ctx.http).await;

        let actor_channel = ctx
            .cache
            .guild(guild_id)
            .and_then(|guild| {
                guild
                    .voice_states
                    .get(&user_id)
                    .and_then(|voice_state| voice_state.channel_id)
            })
            .map(|channel| channel.0);

        if manager
            .handle_control(guild_id.0, token, actor_channel, command)
            .await
        {
            let verb = match command {
                ControlCommand::Pause => "paused",
                ControlCommand::Resume => "resumed",
                ControlCommand::Skip => "skipped",
                ControlCommand::Stop => "stopped",
            };
            check_msg(
                reaction
                    .channel_id
                    .say(&ctx.http, format!("{} {verb} the music.", user_id.mention()))
                    .await,
            );
        }
    }

    async fn voice_state_update(&self, ctx: Context, _old: Option<VoiceState>, new: VoiceState) {
        if new.channel_id.is_some() {
            return;
        }

        let bot_id = {
            let data = ctx.data.read().await;
            data.get::<BotUserKey>().copied()
        };

        if let (Some(bot_id), Some(guild_id)) = (bot_id, new.guild_id) {
            if bot_id == new.user_id.0 {
                info!("Bot was disconnected from voice in guild {guild_id}, clearing session");
                session_manager(&ctx).await.stop(guild_id.0).await;
            }
        }
    }

    async fn guild_member_addition(&self, ctx: Context, member: Member) {
        let Some(channel) = bot_config(&ctx).await.welcome_channel else {
            return;
        };
        let guild_name = member
            .guild_id
            .name(&ctx.cache)
            .unwrap_or_else(|| "the server".to_string());

        check_msg(
            ChannelId(channel)
                .send_message(&ctx.http, |m| {
                    m.embed(|e| {
                        e.title(format!("Welcome to {guild_name}!"))
                            .description(format!(
                                "Thank you {} for joining the community! Don't be shy, say hello!",
                                member.mention()
                            ))
                            .colour(Colour::DARK_GREEN)
                            .thumbnail(member.user.face())
                            .footer(|f| f.text(EMBED_FOOTER))
                    })
                })
                .await,
        );
    }

    async fn guild_member_removal(
        &self,
        ctx: Context,
        guild_id: GuildId,
        user: User,
        _member: Option<Member>,
    ) {
        let Some(channel) = bot_config(&ctx).await.goodbye_channel else {
            return;
        };
        let guild_name = guild_id
            .name(&ctx.cache)
            .unwrap_or_else(|| "the server".to_string());

        check_msg(
            ChannelId(channel)
                .send_message(&ctx.http, |m| {
                    m.embed(|e| {
                        e.title(format!("Goodbye from {guild_name}!"))
                            .description(format!("See you next time, {}.", user.name))
                            .colour(Colour::RED)
                            .thumbnail(user.face())
                            .footer(|f| f.text(EMBED_FOOTER))
                    })
                })
                .await,
        );
    }

    async fn message_update(
        &self,
        ctx: Context,
        old: Option<Message>,
        new: Option<Message>,
        _event: MessageUpdateEvent,
    ) {
        let Some(log_channel) = bot_config(&ctx).await.action_log_channel else {
            return;
        };
        let Some(new) = new else { return };
        if new.author.bot {
            return;
        }

        let before = old
            .map(|m| m.content)
            .unwrap_or_else(|| "*unknown*".to_string());

        check_msg(
            ChannelId(log_channel)
                .send_message(&ctx.http, |m| {
                    m.embed(|e| {
                        e.title("📝 Message Edited")
                            .description(format!(
                                "**Author:** {}\n**Channel:** {}\n\n**Before:** {before}\n**After:** {}",
                                new.author.mention(),
                                new.channel_id.mention(),
                                new.content
                            ))
                            .colour(Colour::ORANGE)
                            .footer(|f| f.text(EMBED_FOOTER))
                    })
                })
                .await,
        );
    }

    async fn message_delete(
        &self,
        ctx: Context,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        _guild_id: Option<GuildId>,
    ) {
        let Some(log_channel) = bot_config(&ctx).await.action_log_channel else {
            return;
        };

        // Content is only known while the message is still cached.
        let cached = ctx.cache.message(channel_id, deleted_message_id);
        let (author, content) = match cached {
            Some(message) => {
                if message.author.bot {
                    return;
                }
                let content = if message.content.is_empty() {
                    "[Embed/Attachment]".to_string()
                } else {
                    message.content.clone()
                };
                (message.author.mention().to_string(), content)
            }
            None => ("*unknown*".to_string(), "*unknown*".to_string()),
        };

        check_msg(
            ChannelId(log_channel)
                .send_message(&ctx.http, |m| {
                    m.embed(|e| {
                        e.title("🗑️ Message Deleted")
                            .description(format!(
                                "**Author:** {author}\n**Channel:** {}\n**Content:** {content}",
                                channel_id.mention()
                            ))
                            .colour(Colour::RED)
                            .footer(|f| f.text(EMBED_FOOTER))
                    })
                })
                .await,
        );
    }
}
