use serenity::client::Context;
use serenity::framework::standard::macros::command;
use serenity::framework::standard::{Args, CommandResult};
use serenity::model::channel::{
    ChannelType, GuildChannel, Message, PermissionOverwrite, PermissionOverwriteType,
};
use serenity::model::id::{ChannelId, GuildId, RoleId, UserId};
use serenity::model::permissions::Permissions;
use serenity::prelude::Mentionable;
use serenity::utils::Colour;

use crate::commands::moderation::is_admin;
use crate::commands::{bot_config, check_msg, get_guild_id, guild_store};
use crate::music::notify::EMBED_FOOTER;

const TICKET_CATEGORY: &str = "TICKETS";
const TICKET_LOG_CHANNEL: &str = "ticket-logs";
const TICKET_KINDS: [&str; 3] = ["report", "donation", "suggestion"];
const TRANSCRIPT_LIMIT: u64 = 100;

#[command]
#[only_in(guilds)]
async fn ticket(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let kind = args.single::<String>().unwrap_or_default().to_lowercase();
    if !TICKET_KINDS.contains(&kind.as_str()) {
        check_msg(
            msg.reply(ctx, format!("Usage: `!ticket [{}]`", TICKET_KINDS.join("|")))
                .await,
        );
        return Ok(());
    }

    let guild_id = get_guild_id(ctx, msg)?;
    let category = find_or_create_category(ctx, guild_id).await?;
    let number = guild_store(ctx).await.next_ticket_number(&kind).await?;
    let name = format!("{kind}-{number}");

    let mut overwrites = vec![
        // Hidden from everyone, visible to the opener.
        PermissionOverwrite {
            allow: Permissions::empty(),
            deny: Permissions::VIEW_CHANNEL,
            kind: PermissionOverwriteType::Role(RoleId(guild_id.0)),
        },
        PermissionOverwrite {
            allow: Permissions::VIEW_CHANNEL
                | Permissions::SEND_MESSAGES
                | Permissions::ATTACH_FILES
                | Permissions::EMBED_LINKS,
            deny: Permissions::empty(),
            kind: PermissionOverwriteType::Member(msg.author.id),
        },
    ];
    if let Some(admin_role) = bot_config(ctx).await.admin_role {
        overwrites.push(PermissionOverwrite {
            allow: Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES,
            deny: Permissions::empty(),
            kind: PermissionOverwriteType::Role(RoleId(admin_role)),
        });
    }

    let channel = guild_id
        .create_channel(&ctx.http, |c| {
            c.name(&name)
                .kind(ChannelType::Text)
                .category(category)
                .permissions(overwrites)
        })
        .await?;

    check_msg(
        channel
            .send_message(&ctx.http, |m| {
                m.embed(|e| {
                    e.title(format!("{} Ticket Created", capitalize(&kind)))
                        .description(format!(
                            "Hello {}! This is your {kind} ticket channel. Please describe your issue here.",
                            msg.author.mention()
                        ))
                        .colour(Colour::DARK_GREEN)
                        .footer(|f| f.text(EMBED_FOOTER))
                })
            })
            .await,
    );

    check_msg(
        msg.reply(ctx, format!("✅ Your {kind} ticket has been created: {}", channel.mention()))
            .await,
    );

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn close(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    let Some(channel) = msg.channel_id.to_channel(&ctx.http).await?.guild() else {
        return Ok(());
    };
    if !is_ticket_channel(&channel) {
        check_msg(msg.reply(ctx, "❌ This is not a ticket channel").await);
        return Ok(());
    }

    let opener = ticket_opener(&channel);
    if opener != Some(msg.author.id) && !is_admin(ctx, msg).await {
        check_msg(
            msg.reply(ctx, "❌ You don't have permission to close this ticket")
                .await,
        );
        return Ok(());
    }

    let transcript = render_transcript(ctx, msg.channel_id).await?;
    let log_channel = find_or_create_log_channel(ctx, guild_id).await?;

    check_msg(
        log_channel
            .send_message(&ctx.http, |m| {
                m.embed(|e| {
                    e.title(format!("Ticket Closed: {}", channel.name))
                        .description(format!("Ticket closed by {}", msg.author.mention()))
                        .colour(Colour::RED)
                        .footer(|f| f.text(EMBED_FOOTER))
                })
            })
            .await,
    );
    let filename = format!("transcript-{}.txt", channel.name);
    log_channel
        .send_files(&ctx.http, vec![(transcript.as_bytes(), filename.as_str())], |m| m)
        .await?;

    msg.channel_id.delete(&ctx.http).await?;

    Ok(())
}

async fn find_or_create_category(ctx: &Context, guild_id: GuildId) -> serenity::Result<ChannelId> {
    let channels = guild_id.channels(&ctx.http).await?;
    let existing = channels
        .values()
        .find(|c| c.kind == ChannelType::Category && c.name == TICKET_CATEGORY);

    match existing {
        Some(category) => Ok(category.id),
        None => {
            let category = guild_id
                .create_channel(&ctx.http, |c| {
                    c.name(TICKET_CATEGORY).kind(ChannelType::Category)
                })
                .await?;
            Ok(category.id)
        }
    }
}

async fn find_or_create_log_channel(ctx: &Context, guild_id: GuildId) -> serenity::Result<ChannelId> {
    let channels = guild_id.channels(&ctx.http).await?;
    let existing = channels
        .values()
        .find(|c| c.kind == ChannelType::Text && c.name == TICKET_LOG_CHANNEL);

    match existing {
        Some(channel) => Ok(channel.id),
        None => {
            let channel = guild_id
                .create_channel(&ctx.http, |c| {
                    c.name(TICKET_LOG_CHANNEL).kind(ChannelType::Text)
                })
                .await?;
            Ok(channel.id)
        }
    }
}

async fn render_transcript(ctx: &Context, channel: ChannelId) -> serenity::Result<String> {
    let mut messages = channel
        .messages(&ctx.http, |retriever| retriever.limit(TRANSCRIPT_LIMIT))
        .await?;
    messages.reverse(); // oldest first

    let lines = messages
        .iter()
        .map(|m| {
            let attachments = m
                .attachments
                .iter()
                .map(|a| a.url.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            format!("[{}] {}: {} {attachments}", m.timestamp, m.author.name, m.content)
        })
        .collect::<Vec<String>>();

    Ok(lines.join("\n"))
}

fn is_ticket_channel(channel: &GuildChannel) -> bool {
    TICKET_KINDS
        .iter()
        .any(|kind| channel.name.starts_with(&format!("{kind}-")))
}

/// The opener is the only member-level overwrite on a ticket channel.
fn ticket_opener(channel: &GuildChannel) -> Option<UserId> {
    channel.permission_overwrites.iter().find_map(|o| match o.kind {
        PermissionOverwriteType::Member(user) => Some(user),
        _ => None,
    })
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_channel_names_follow_kind_number() {
        assert!(TICKET_KINDS.iter().all(|k| !k.contains('-')));
        assert_eq!(capitalize("report"), "Report");
        assert_eq!(capitalize(""), "");
    }
}
