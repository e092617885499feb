use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::music::session::SessionJournal;
use crate::music::track::SessionRecord;

const WARNINGS_FILE: &str = "warnings.json";
const TICKETS_FILE: &str = "tickets.json";
const SESSIONS_FILE: &str = "sessions.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store data is unreadable: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Flat-file JSON store for the bot's small persistent bits: per-user
/// warning counts, ticket counters and the music session journal. One file
/// per concern; all writes go through one lock.
pub struct GuildStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl GuildStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        GuildStore {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    /// Increments and returns the warning count for a user in a guild.
    pub async fn bump_warning(&self, guild: u64, user: u64) -> Result<u32, StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.path(WARNINGS_FILE);
        let mut warnings: HashMap<String, u32> = read_map(&path).await?;
        let count = warnings.entry(warning_key(guild, user)).or_insert(0);
        *count += 1;
        let count = *count;
        self.write_map(&path, &warnings).await?;
        Ok(count)
    }

    pub async fn warning_count(&self, guild: u64, user: u64) -> Result<u32, StoreError> {
        let _guard = self.lock.lock().await;
        let warnings: HashMap<String, u32> = read_map(&self.path(WARNINGS_FILE)).await?;
        Ok(warnings
            .get(&warning_key(guild, user))
            .copied()
            .unwrap_or(0))
    }

    /// Allocates the next ticket number for a ticket kind ("report",
    /// "donation", ...). Numbers start at 1 and never repeat.
    pub async fn next_ticket_number(&self, kind: &str) -> Result<u64, StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.path(TICKETS_FILE);
        let mut counters: HashMap<String, u64> = read_map(&path).await?;
        let number = counters.entry(kind.to_string()).or_insert(0);
        *number += 1;
        let number = *number;
        self.write_map(&path, &counters).await?;
        Ok(number)
    }

    async fn write_map<T: Serialize>(
        &self,
        path: &Path,
        map: &HashMap<String, T>,
    ) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_vec_pretty(map)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

fn warning_key(guild: u64, user: u64) -> String {
    format!("{guild}:{user}")
}

async fn read_map<T: DeserializeOwned>(path: &Path) -> Result<HashMap<String, T>, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl SessionJournal for GuildStore {
    async fn load(&self) -> Result<Vec<(u64, SessionRecord)>, StoreError> {
        let _guard = self.lock.lock().await;
        let sessions: HashMap<String, SessionRecord> =
            read_map(&self.path(SESSIONS_FILE)).await?;
        Ok(sessions
            .into_iter()
            .filter_map(|(guild, record)| guild.parse().ok().map(|guild| (guild, record)))
            .collect())
    }

    async fn save(&self, guild: u64, record: &SessionRecord) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.path(SESSIONS_FILE);
        let mut sessions: HashMap<String, SessionRecord> = read_map(&path).await?;
        sessions.insert(guild.to_string(), record.clone());
        self.write_map(&path, &sessions).await
    }

    async fn clear(&self, guild: u64) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let path = self.path(SESSIONS_FILE);
        let mut sessions: HashMap<String, SessionRecord> = read_map(&path).await?;
        if sessions.remove(&guild.to_string()).is_some() {
            self.write_map(&path, &sessions).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use super::*;
    use crate::music::track::Track;

    fn temp_store(name: &str) -> GuildStore {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .subsec_nanos();
        let dir = std::env::temp_dir().join(format!("alpha-bot-{name}-{}-{nanos}", std::process::id()));
        GuildStore::new(dir)
    }

    fn cleanup(store: &GuildStore) {
        let _ = std::fs::remove_dir_all(&store.dir);
    }

    #[tokio::test]
    async fn warnings_count_per_guild_and_user() {
        let store = temp_store("warnings");

        assert_eq!(store.bump_warning(1, 7).await.unwrap(), 1);
        assert_eq!(store.bump_warning(1, 7).await.unwrap(), 2);
        assert_eq!(store.bump_warning(2, 7).await.unwrap(), 1);

        assert_eq!(store.warning_count(1, 7).await.unwrap(), 2);
        assert_eq!(store.warning_count(1, 8).await.unwrap(), 0);

        cleanup(&store);
    }

    #[tokio::test]
    async fn ticket_numbers_increment_per_kind() {
        let store = temp_store("tickets");

        assert_eq!(store.next_ticket_number("report").await.unwrap(), 1);
        assert_eq!(store.next_ticket_number("report").await.unwrap(), 2);
        assert_eq!(store.next_ticket_number("donation").await.unwrap(), 1);

        cleanup(&store);
    }

    #[tokio::test]
    async fn session_records_round_trip_and_clear() {
        let store = temp_store("sessions");
        let record = SessionRecord {
            track: Track {
                stream_url: "https://stream/x".to_string(),
                title: "x".to_string(),
                external_id: Some("abc".to_string()),
                duration_secs: 90,
                requested_by: "@tester".to_string(),
            },
            status_message: Some(42),
            text_channel: 1,
            voice_channel: 2,
        };

        store.save(9, &record).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, vec![(9, record)]);

        store.clear(9).await.unwrap();
        assert!(store.load().await.unwrap().is_empty());

        cleanup(&store);
    }
}
