use serenity::client::Context;
use serenity::framework::standard::macros::command;
use serenity::framework::standard::{Args, CommandResult};
use serenity::model::channel::Message;
use serenity::model::id::{RoleId, UserId};
use serenity::prelude::Mentionable;
use serenity::utils::{parse_username, Colour};

use crate::commands::{bot_config, check_msg, get_guild_id, guild_store};
use crate::music::notify::EMBED_FOOTER;

const MAX_WARNINGS: u32 = 3;

/// Warn threshold and ban live here; the profanity scanning of the original
/// bot is intentionally not part of this command set.
#[command]
#[only_in(guilds)]
async fn warn(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    if !is_admin(ctx, msg).await {
        check_msg(msg.reply(ctx, "❌ You do not have permission to warn users").await);
        return Ok(());
    }

    let Some(target) = parse_target(&mut args) else {
        check_msg(msg.reply(ctx, "Usage: `!warn @user [reason]`").await);
        return Ok(());
    };

    let reason = args.rest().trim().to_string();
    let reason = if reason.is_empty() {
        "No reason given".to_string()
    } else {
        reason
    };

    let guild_id = get_guild_id(ctx, msg)?;
    let count = guild_store(ctx)
        .await
        .bump_warning(guild_id.0, target.0)
        .await?;

    if count >= MAX_WARNINGS {
        guild_id
            .ban_with_reason(&ctx.http, target, 0, &format!("Exceeded {MAX_WARNINGS} warnings: {reason}"))
            .await?;
        check_msg(
            msg.channel_id
                .send_message(&ctx.http, |m| {
                    m.embed(|e| {
                        e.title("User Banned")
                            .description(format!(
                                "🚫 {} has been banned after {MAX_WARNINGS} warnings.",
                                target.mention()
                            ))
                            .colour(Colour::RED)
                            .footer(|f| f.text(EMBED_FOOTER))
                    })
                })
                .await,
        );
    } else {
        check_msg(
            msg.channel_id
                .send_message(&ctx.http, |m| {
                    m.embed(|e| {
                        e.title("Warning")
                            .description(format!(
                                "⚠️ Warning {count}/{MAX_WARNINGS} for {}: {reason}",
                                target.mention()
                            ))
                            .colour(Colour::ORANGE)
                            .footer(|f| f.text(EMBED_FOOTER))
                    })
                })
                .await,
        );
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn warnings(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let Some(target) = parse_target(&mut args) else {
        check_msg(msg.reply(ctx, "Usage: `!warnings @user`").await);
        return Ok(());
    };

    let guild_id = get_guild_id(ctx, msg)?;
    let count = guild_store(ctx)
        .await
        .warning_count(guild_id.0, target.0)
        .await?;

    check_msg(
        msg.channel_id
            .say(
                &ctx.http,
                format!("{} has {count}/{MAX_WARNINGS} warnings", target.mention()),
            )
            .await,
    );

    Ok(())
}

fn parse_target(args: &mut Args) -> Option<UserId> {
    let raw = args.single::<String>().ok()?;
    parse_username(&raw).map(UserId)
}

pub(crate) async fn is_admin(ctx: &Context, msg: &Message) -> bool {
    let Some(admin_role) = bot_config(ctx).await.admin_role else {
        return false;
    };

    msg.member
        .as_ref()
        .map(|member| member.roles.contains(&RoleId(admin_role)))
        .unwrap_or(false)
}
