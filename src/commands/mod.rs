use std::sync::Arc;

use serenity::client::Context;
use serenity::framework::standard::macros::{command, group};
use serenity::framework::standard::{CommandError, CommandResult};
use serenity::model::channel::Message;
use serenity::model::guild::Guild;
use serenity::model::id::GuildId;
use serenity::Result as SerenityResult;
use tracing::info;

use crate::config::BotConfig;
use crate::keys::{ConfigKey, GuildStoreKey, SessionManagerKey};
use crate::music::SessionManager;
use crate::store::GuildStore;

mod moderation;
mod music;
mod tickets;

use moderation::*;
use music::*;
use tickets::*;

#[group]
#[commands(
    play, pause, resume, skip, stop, queue, shuffle, nowplaying, warn, warnings, ticket, close,
    help
)]
pub struct General;

#[command]
#[only_in(guilds)]
async fn help(ctx: &Context, msg: &Message) -> CommandResult {
    let message = r#"
**Music:**
    **play [URL|Title]** - Plays (or adds to the queue) a track given a URL or a search query.
    **pause** / **resume** - Pauses or resumes the current track.
    **skip** - Plays the next track.
    **stop** - Stops playback, clears the queue and leaves the channel.
    **queue** - Shows the queue of tracks.
    **shuffle** - Reorders the queue randomly.
    **nowplaying** - Shows the current track with elapsed time.
**Moderation:**
    **warn @user [reason]** - Warns a user; three warnings mean a ban.
    **warnings @user** - Shows a user's warning count.
**Tickets:**
    **ticket [report|donation|suggestion]** - Opens a private ticket channel.
    **close** - Closes the current ticket channel with a transcript.
    "#;

    check_msg(msg.channel_id.say(&ctx.http, message).await);

    Ok(())
}

pub(crate) async fn session_manager(ctx: &Context) -> Arc<SessionManager> {
    ctx.data
        .read()
        .await
        .get::<SessionManagerKey>()
        .expect("Session manager placed in at initialisation.")
        .clone()
}

pub(crate) async fn guild_store(ctx: &Context) -> Arc<GuildStore> {
    ctx.data
        .read()
        .await
        .get::<GuildStoreKey>()
        .expect("Guild store placed in at initialisation.")
        .clone()
}

pub(crate) async fn bot_config(ctx: &Context) -> Arc<BotConfig> {
    ctx.data
        .read()
        .await
        .get::<ConfigKey>()
        .expect("Config placed in at initialisation.")
        .clone()
}

pub(crate) fn get_guild(ctx: &Context, msg: &Message) -> Result<Guild, CommandError> {
    msg.guild(&ctx.cache)
        .ok_or_else(|| CommandError::from("Guild not found"))
}

pub(crate) fn get_guild_id(ctx: &Context, msg: &Message) -> Result<GuildId, CommandError> {
    Ok(get_guild(ctx, msg)?.id)
}

/// Checks that a message successfully sent; if not, then logs why to stdout.
pub(crate) fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}
