use serenity::client::Context;
use serenity::framework::standard::macros::command;
use serenity::framework::standard::{Args, CommandResult};
use serenity::model::channel::Message;
use serenity::model::channel::ReactionType::Unicode;
use serenity::model::id::UserId;
use serenity::prelude::Mentionable;
use serenity::utils::Colour;

use crate::commands::{check_msg, get_guild, get_guild_id, session_manager};
use crate::keys::BotUserKey;
use crate::music::notify::EMBED_FOOTER;
use crate::music::{QueueResult, SessionError};

#[command]
#[only_in(guilds)]
#[aliases("p")]
async fn play(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let query = args.message().trim().to_string();
    if query.is_empty() {
        check_msg(msg.reply(ctx, "Give me a URL or something to search for").await);
        return Ok(());
    }

    let bot_id = {
        let data = ctx.data.read().await;
        data.get::<BotUserKey>().copied()
    };

    let loading_emoji = Unicode("⏳".to_string());
    msg.react(&ctx.http, loading_emoji.clone()).await?;

    let guild = get_guild(ctx, msg)?;
    let guild_id = guild.id;
    let voice_target = guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|voice_state| voice_state.channel_id)
        .map(|channel| channel.0);

    let manager = session_manager(ctx).await;
    let outcome = manager
        .enqueue(
            guild_id.0,
            &query,
            &msg.author.mention().to_string(),
            voice_target,
            msg.channel_id.0,
        )
        .await;

    if let Some(bot_id) = bot_id {
        let _ = msg
            .channel_id
            .delete_reaction(&ctx.http, msg.id, Some(UserId(bot_id)), loading_emoji)
            .await;
    }

    match outcome {
        Ok(QueueResult::Started { .. }) => {
            // The "Now Playing" embed is posted by the session manager.
            msg.react(&ctx.http, Unicode("👍".to_string())).await?;
        }
        Ok(QueueResult::Queued { position, title }) => {
            check_msg(
                msg.channel_id
                    .send_message(&ctx.http, |m| {
                        m.embed(|e| {
                            e.title("Added to Queue")
                                .description(format!("🎵 **{title}** is #{position} in the queue."))
                                .colour(Colour::DARK_GREEN)
                                .footer(|f| f.text(EMBED_FOOTER))
                        })
                    })
                    .await,
            );
        }
        Err(e) => {
            msg.react(&ctx.http, Unicode("💀".to_string())).await?;
            send_error(ctx, msg, &e).await;
        }
    }

    Ok(())
}

async fn send_error(ctx: &Context, msg: &Message, error: &SessionError) {
    check_msg(
        msg.channel_id
            .send_message(&ctx.http, |m| {
                m.embed(|e| {
                    e.title("Cannot Play Track")
                        .description(format!("⚠️ {error}"))
                        .colour(Colour::RED)
                        .footer(|f| f.text(EMBED_FOOTER))
                })
            })
            .await,
    );
}

#[command]
#[only_in(guilds)]
async fn pause(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    if !session_manager(ctx).await.pause(guild_id.0).await {
        check_msg(msg.channel_id.say(&ctx.http, "o_O Nothing is playing").await);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases("unpause")]
async fn resume(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    if !session_manager(ctx).await.resume(guild_id.0).await {
        check_msg(msg.channel_id.say(&ctx.http, "o_O Nothing is paused").await);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases("next")]
async fn skip(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    if session_manager(ctx).await.skip(guild_id.0).await {
        check_msg(msg.channel_id.say(&ctx.http, "⏭️ Skipped the current track").await);
    } else {
        check_msg(msg.channel_id.say(&ctx.http, "o_O Nothing to skip").await);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn stop(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    if session_manager(ctx).await.stop(guild_id.0).await {
        check_msg(
            msg.channel_id
                .say(&ctx.http, "⛔️ Stopped playback and left the voice channel")
                .await,
        );
    } else {
        check_msg(msg.channel_id.say(&ctx.http, "o_O Already stopped").await);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn queue(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let tracks = session_manager(ctx).await.queue_snapshot(guild_id.0).await;

    if tracks.is_empty() {
        check_msg(msg.channel_id.say(&ctx.http, "The queue is empty!").await);
        return Ok(());
    }

    let max_tracks = 20;
    let listing = tracks
        .iter()
        .take(max_tracks)
        .enumerate()
        .map(|(index, track)| format!("{} - {}", index + 1, track.title))
        .collect::<Vec<String>>()
        .join("\n");

    check_msg(
        msg.channel_id
            .say(&ctx.http, format!("**Queue**:\n```{listing}```"))
            .await,
    );

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn shuffle(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    if session_manager(ctx).await.shuffle(guild_id.0).await {
        msg.react(&ctx.http, Unicode("👍".to_string())).await?;
    } else {
        check_msg(msg.channel_id.say(&ctx.http, "Not enough tracks to shuffle").await);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
#[aliases("np")]
async fn nowplaying(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    let Some(now) = session_manager(ctx).await.now_playing(guild_id.0).await else {
        check_msg(msg.channel_id.say(&ctx.http, "Nothing is playing right now").await);
        return Ok(());
    };

    let track = &now.track;
    let description = format!(
        "🎶 **{}**\n\nRequested by: {}\nDuration: `{}` / `{}`\n{}",
        track.title,
        track.requested_by,
        fmt_duration(now.elapsed_secs),
        fmt_duration(track.duration_secs),
        progress_bar(now.elapsed_secs, track.duration_secs, 20),
    );

    check_msg(
        msg.channel_id
            .send_message(&ctx.http, |m| {
                m.embed(|e| {
                    e.title("Now Playing")
                        .description(description)
                        .colour(Colour::BLUE)
                        .footer(|f| f.text(EMBED_FOOTER));
                    if let Some(id) = &track.external_id {
                        e.thumbnail(crate::music::notify::thumbnail_url(id));
                    }
                    e
                })
            })
            .await,
    );

    Ok(())
}

fn fmt_duration(secs: u64) -> String {
    format!("{}:{:0>2}", secs / 60, secs % 60)
}

fn progress_bar(current: u64, total: u64, length: u64) -> String {
    if total == 0 {
        return "No duration info".to_string();
    }
    let filled = (length * current.min(total) / total) as usize;
    let empty = length as usize - filled;
    format!("{}{}", "▮".repeat(filled), "▯".repeat(empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_format_as_minutes_and_seconds() {
        assert_eq!(fmt_duration(0), "0:00");
        assert_eq!(fmt_duration(65), "1:05");
        assert_eq!(fmt_duration(600), "10:00");
    }

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(progress_bar(0, 100, 4), "▯▯▯▯");
        assert_eq!(progress_bar(50, 100, 4), "▮▮▯▯");
        assert_eq!(progress_bar(100, 100, 4), "▮▮▮▮");
        // Elapsed past the end never overflows the bar.
        assert_eq!(progress_bar(250, 100, 4), "▮▮▮▮");
        assert_eq!(progress_bar(30, 0, 4), "No duration info");
    }
}
