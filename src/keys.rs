use std::sync::Arc;

use serenity::prelude::TypeMapKey;

use crate::config::BotConfig;
use crate::music::SessionManager;
use crate::store::GuildStore;

pub struct SessionManagerKey;

impl TypeMapKey for SessionManagerKey {
    type Value = Arc<SessionManager>;
}

pub struct GuildStoreKey;

impl TypeMapKey for GuildStoreKey {
    type Value = Arc<GuildStore>;
}

pub struct ConfigKey;

impl TypeMapKey for ConfigKey {
    type Value = Arc<BotConfig>;
}

/// The bot's own user id, filled in on `ready`.
pub struct BotUserKey;

impl TypeMapKey for BotUserKey {
    type Value = u64;
}
