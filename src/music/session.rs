use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use rand::thread_rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::music::notify::{Notifier, NotifyError};
use crate::music::resolver::{MediaResolver, ResolveError};
use crate::music::sink::{GatewayError, PlaybackSink, VoiceGateway};
use crate::music::track::{
    ControlCommand, NowPlaying, PlayToken, PlaybackState, QueueResult, SessionRecord, Track,
};
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("You must be in a voice channel to use this command")]
    NotInVoice,
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Durable per-guild session snapshots, read back once at startup so
/// playback can be reconnected after a restart.
#[async_trait]
pub trait SessionJournal: Send + Sync {
    async fn load(&self) -> Result<Vec<(u64, SessionRecord)>, StoreError>;
    async fn save(&self, guild: u64, record: &SessionRecord) -> Result<(), StoreError>;
    async fn clear(&self, guild: u64) -> Result<(), StoreError>;
}

/// Per-guild state. A guild absent from the store is equivalent to an empty
/// queue with nothing playing.
struct Session {
    queue: VecDeque<Track>,
    playing: Option<PlaybackState>,
    text_channel: u64,
    voice_channel: u64,
}

impl Session {
    fn new(text_channel: u64, voice_channel: u64) -> Self {
        Session {
            queue: VecDeque::new(),
            playing: None,
            text_channel,
            voice_channel,
        }
    }
}

#[derive(Default)]
struct SessionStore {
    sessions: HashMap<u64, Session>,
    /// One counter per guild, bumped once per playback attempt and never
    /// reset, so a token from a torn-down session can never match a later
    /// one. See [`PlayToken`].
    generations: HashMap<u64, u64>,
}

impl SessionStore {
    fn next_token(&mut self, guild: u64) -> PlayToken {
        let generation = self.generations.entry(guild).or_insert(0);
        *generation += 1;
        PlayToken {
            guild,
            generation: *generation,
        }
    }
}

/// Owns all per-guild music state and the playback transition logic. All
/// mutations happen under one lock and never across a suspension point, so
/// operations on a guild are totally ordered as delivered.
pub struct SessionManager {
    store: Mutex<SessionStore>,
    resolver: Arc<dyn MediaResolver>,
    sink: Arc<dyn PlaybackSink>,
    gateway: Arc<dyn VoiceGateway>,
    notifier: Arc<dyn Notifier>,
    journal: Arc<dyn SessionJournal>,
}

impl SessionManager {
    pub fn new(
        resolver: Arc<dyn MediaResolver>,
        sink: Arc<dyn PlaybackSink>,
        gateway: Arc<dyn VoiceGateway>,
        notifier: Arc<dyn Notifier>,
        journal: Arc<dyn SessionJournal>,
    ) -> Self {
        SessionManager {
            store: Mutex::new(SessionStore::default()),
            resolver,
            sink,
            gateway,
            notifier,
            journal,
        }
    }

    /// Resolves `query` and appends it to the guild's queue, starting
    /// playback when the guild is idle. `voice_target` is the channel the
    /// requester currently occupies, if any.
    pub async fn enqueue(
        &self,
        guild: u64,
        query: &str,
        requested_by: &str,
        voice_target: Option<u64>,
        text_channel: u64,
    ) -> Result<QueueResult, SessionError> {
        let voice_target = voice_target.ok_or(SessionError::NotInVoice)?;

        if self.gateway.current_channel(guild).await != Some(voice_target) {
            self.gateway.join(guild, voice_target).await?;
        }

        let resolved = self.resolver.resolve(query).await?;
        let track = Track {
            stream_url: resolved.stream_url,
            title: resolved.title,
            external_id: resolved.external_id,
            duration_secs: resolved.duration_secs,
            requested_by: requested_by.to_string(),
        };
        let title = track.title.clone();

        let (idle, position) = {
            let mut store = self.store.lock().await;
            let session = store
                .sessions
                .entry(guild)
                .or_insert_with(|| Session::new(text_channel, voice_target));
            session.text_channel = text_channel;
            session.voice_channel = voice_target;
            session.queue.push_back(track);
            (session.playing.is_none(), session.queue.len())
        };

        if idle {
            self.advance(guild).await;
            Ok(QueueResult::Started { title })
        } else {
            Ok(QueueResult::Queued { position, title })
        }
    }

    /// Moves the guild to its next track, or tears the session down when the
    /// queue is empty. Idempotent on idle guilds. Tracks whose sink fails to
    /// arm are dropped and the next one is attempted.
    pub async fn advance(&self, guild: u64) {
        self.advance_after(guild, None).await;
    }

    /// Completion callback for an armed track. The token is checked against
    /// the current attempt under the same lock acquisition that pops the
    /// queue, so a stale completion (the session was stopped or superseded
    /// while it was in flight) cannot interleave with a newer attempt.
    pub async fn on_track_end(&self, token: PlayToken) {
        self.advance_after(token.guild, Some(token)).await;
    }

    async fn advance_after(&self, guild: u64, mut completed: Option<PlayToken>) {
        loop {
            let next = {
                let mut guard = self.store.lock().await;
                let SessionStore {
                    sessions,
                    generations,
                } = &mut *guard;
                let Some(session) = sessions.get_mut(&guild) else {
                    if let Some(token) = completed {
                        debug!(
                            "Dropping stale completion for guild {} (generation {})",
                            token.guild, token.generation
                        );
                    }
                    return;
                };
                if let Some(token) = completed.take() {
                    if session.playing.as_ref().map(|state| state.token) != Some(token) {
                        debug!(
                            "Dropping stale completion for guild {} (generation {})",
                            token.guild, token.generation
                        );
                        return;
                    }
                }
                match session.queue.pop_front() {
                    None => {
                        sessions.remove(&guild);
                        None
                    }
                    Some(track) => {
                        let generation = generations.entry(guild).or_insert(0);
                        *generation += 1;
                        let token = PlayToken {
                            guild,
                            generation: *generation,
                        };
                        session.playing = Some(PlaybackState {
                            track: track.clone(),
                            started_at: Utc::now(),
                            status_message: None,
                            text_channel: session.text_channel,
                            voice_channel: session.voice_channel,
                            token,
                        });
                        Some((track, token, session.text_channel))
                    }
                }
            };

            let Some((track, token, text_channel)) = next else {
                info!("Queue for guild {guild} is empty, disconnecting");
                if let Err(e) = self.gateway.leave(guild).await {
                    warn!("Disconnect for guild {guild} failed: {e}");
                }
                if let Err(e) = self.journal.clear(guild).await {
                    warn!("Could not clear session record for guild {guild}: {e}");
                }
                return;
            };

            if let Err(e) = self.sink.arm(guild, &track.stream_url, token).await {
                warn!("Could not start `{}` in guild {guild}: {e}", track.title);
                if let Err(e) = self.notifier.track_failed(text_channel, &track.title).await {
                    debug!("Track-failure notice failed for guild {guild}: {e}");
                }
                // Same path as a finished track: drop it, try the next one.
                if !self.is_current(token).await {
                    return;
                }
                continue;
            }

            info!("Now playing `{}` in guild {guild}", track.title);

            // Playback is already running; the status message is best-effort
            // and must not gate it.
            match self.notifier.now_playing(text_channel, &track).await {
                Ok(message) => {
                    let mut store = self.store.lock().await;
                    if let Some(state) = store
                        .sessions
                        .get_mut(&guild)
                        .and_then(|session| session.playing.as_mut())
                    {
                        if state.token == token {
                            state.status_message = Some(message);
                        }
                    }
                }
                Err(e) => warn!("Now-playing notice failed for guild {guild}: {e}"),
            }

            self.persist(guild).await;
            return;
        }
    }

    /// Maps a reaction message back to the stable control token of the
    /// current playback attempt. Reactions on older messages resolve to
    /// nothing and are ignored.
    pub async fn controls_for_message(&self, guild: u64, message: u64) -> Option<PlayToken> {
        let store = self.store.lock().await;
        let state = store.sessions.get(&guild)?.playing.as_ref()?;
        (state.status_message == Some(message)).then_some(state.token)
    }

    /// Applies a transport command carried by a control token. No-op unless
    /// the token matches the current attempt and the actor shares the bot's
    /// voice channel. Returns whether the command was applied.
    pub async fn handle_control(
        &self,
        guild: u64,
        token: PlayToken,
        actor_channel: Option<u64>,
        command: ControlCommand,
    ) -> bool {
        let valid = {
            let store = self.store.lock().await;
            match store
                .sessions
                .get(&guild)
                .and_then(|session| session.playing.as_ref())
            {
                Some(state) => {
                    state.token == token && actor_channel == Some(state.voice_channel)
                }
                None => false,
            }
        };

        if !valid {
            debug!("Ignoring stale or unauthorised control for guild {guild}");
            return false;
        }

        match command {
            ControlCommand::Pause => self.pause(guild).await,
            ControlCommand::Resume => self.resume(guild).await,
            ControlCommand::Skip => self.skip(guild).await,
            ControlCommand::Stop => self.stop(guild).await,
        }
    }

    /// Pauses the sink if it is actively playing. Returns whether anything
    /// changed.
    pub async fn pause(&self, guild: u64) -> bool {
        if !self.sink.is_playing(guild).await {
            return false;
        }
        self.sink.pause(guild).await.is_ok()
    }

    /// Resumes the sink if it is paused. Returns whether anything changed.
    pub async fn resume(&self, guild: u64) -> bool {
        if !self.sink.is_paused(guild).await {
            return false;
        }
        self.sink.resume(guild).await.is_ok()
    }

    /// Stops the current track. The sink's completion callback then drives
    /// the queue forward, exactly as if the track had finished on its own.
    pub async fn skip(&self, guild: u64) -> bool {
        let playing = {
            let store = self.store.lock().await;
            store
                .sessions
                .get(&guild)
                .map(|session| session.playing.is_some())
                .unwrap_or(false)
        };
        if !playing {
            return false;
        }
        if let Err(e) = self.sink.stop(guild).await {
            warn!("Skip failed for guild {guild}: {e}");
            return false;
        }
        true
    }

    /// Clears the queue, removes the playback state and disconnects. Any
    /// in-flight completion for the stopped track finds no current token and
    /// becomes a no-op.
    pub async fn stop(&self, guild: u64) -> bool {
        let was_active = {
            let mut store = self.store.lock().await;
            store
                .sessions
                .remove(&guild)
                .map(|session| session.playing.is_some())
                .unwrap_or(false)
        };

        if let Err(e) = self.sink.stop(guild).await {
            debug!("Sink stop for guild {guild}: {e}");
        }
        if let Err(e) = self.gateway.leave(guild).await {
            warn!("Disconnect for guild {guild} failed: {e}");
        }
        if let Err(e) = self.journal.clear(guild).await {
            warn!("Could not clear session record for guild {guild}: {e}");
        }

        was_active
    }

    /// Reorders the pending queue randomly. The playing track is unaffected.
    pub async fn shuffle(&self, guild: u64) -> bool {
        let mut store = self.store.lock().await;
        match store.sessions.get_mut(&guild) {
            Some(session) if session.queue.len() > 1 => {
                session.queue.make_contiguous().shuffle(&mut thread_rng());
                true
            }
            _ => false,
        }
    }

    pub async fn queue_snapshot(&self, guild: u64) -> Vec<Track> {
        let store = self.store.lock().await;
        store
            .sessions
            .get(&guild)
            .map(|session| session.queue.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Elapsed time counts from when the track was armed and does not
    /// subtract paused time.
    pub async fn now_playing(&self, guild: u64) -> Option<NowPlaying> {
        let store = self.store.lock().await;
        let state = store.sessions.get(&guild)?.playing.as_ref()?;

        let mut elapsed = (Utc::now() - state.started_at).num_seconds().max(0) as u64;
        if state.track.duration_secs > 0 {
            elapsed = elapsed.min(state.track.duration_secs);
        }

        Some(NowPlaying {
            track: state.track.clone(),
            elapsed_secs: elapsed,
        })
    }

    /// Reconnects every guild with a journal record. Run once at startup.
    pub async fn recover_all(&self) {
        let records = match self.journal.load().await {
            Ok(records) => records,
            Err(e) => {
                warn!("Could not load persisted sessions: {e}");
                return;
            }
        };

        for (guild, record) in records {
            self.recover(guild, record).await;
        }
    }

    /// Restores one persisted session: rejoin the stored voice channel,
    /// restore the transport reactions, and restart the stored track from
    /// the beginning (exact-offset resume is out of scope). Failures abandon
    /// this guild only.
    pub async fn recover(&self, guild: u64, record: SessionRecord) {
        info!("Recovering session for guild {guild}: `{}`", record.track.title);

        if let Err(e) = self.gateway.join(guild, record.voice_channel).await {
            warn!("Abandoning recovery for guild {guild}: {e}");
            if let Err(e) = self.journal.clear(guild).await {
                warn!("Could not clear session record for guild {guild}: {e}");
            }
            return;
        }

        let mut status_message = record.status_message;
        if let Some(message) = record.status_message {
            match self.notifier.reattach_controls(record.text_channel, message).await {
                Ok(()) => {}
                Err(NotifyError::ChannelMissing(_)) => {
                    warn!("Abandoning recovery for guild {guild}: text channel is gone");
                    if let Err(e) = self.gateway.leave(guild).await {
                        debug!("Disconnect for guild {guild} failed: {e}");
                    }
                    if let Err(e) = self.journal.clear(guild).await {
                        warn!("Could not clear session record for guild {guild}: {e}");
                    }
                    return;
                }
                Err(e) => {
                    // The message is gone but the channel is alive; carry on
                    // without reaction controls.
                    warn!("Could not restore controls for guild {guild}: {e}");
                    status_message = None;
                }
            }
        }

        let token = {
            let mut store = self.store.lock().await;
            let token = store.next_token(guild);
            let session = store
                .sessions
                .entry(guild)
                .or_insert_with(|| Session::new(record.text_channel, record.voice_channel));
            session.playing = Some(PlaybackState {
                track: record.track.clone(),
                started_at: Utc::now(),
                status_message,
                text_channel: record.text_channel,
                voice_channel: record.voice_channel,
                token,
            });
            token
        };

        if let Err(e) = self.sink.arm(guild, &record.track.stream_url, token).await {
            warn!("Could not restart `{}` in guild {guild}: {e}", record.track.title);
            // The queue is empty after a restart, so this tears the session
            // down again.
            self.advance(guild).await;
            return;
        }

        self.persist(guild).await;
    }

    async fn is_current(&self, token: PlayToken) -> bool {
        let store = self.store.lock().await;
        store
            .sessions
            .get(&token.guild)
            .and_then(|session| session.playing.as_ref())
            .map(|state| state.token == token)
            .unwrap_or(false)
    }

    async fn persist(&self, guild: u64) {
        let record = {
            let store = self.store.lock().await;
            store
                .sessions
                .get(&guild)
                .and_then(|session| session.playing.as_ref())
                .map(SessionRecord::from)
        };

        if let Some(record) = record {
            if let Err(e) = self.journal.save(guild, &record).await {
                warn!("Could not persist session for guild {guild}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    use assert_matches::assert_matches;

    use super::*;
    use crate::music::resolver::ResolvedTrack;
    use crate::music::sink::SinkError;

    const GUILD: u64 = 10;
    const VOICE: u64 = 20;
    const TEXT: u64 = 30;

    struct FakeResolver {
        fail: Option<ResolveError>,
    }

    impl FakeResolver {
        fn ok() -> Self {
            FakeResolver { fail: None }
        }
    }

    #[async_trait]
    impl MediaResolver for FakeResolver {
        async fn resolve(&self, query: &str) -> Result<ResolvedTrack, ResolveError> {
            match &self.fail {
                Some(ResolveError::NotFound(_)) => Err(ResolveError::NotFound(query.to_string())),
                Some(ResolveError::Transient { .. }) => Err(ResolveError::Transient {
                    query: query.to_string(),
                    reason: "boom".to_string(),
                }),
                None => Ok(ResolvedTrack {
                    stream_url: format!("https://stream/{query}"),
                    title: query.to_string(),
                    external_id: None,
                    duration_secs: 180,
                }),
            }
        }
    }

    #[derive(Default)]
    struct FakeSink {
        armed: StdMutex<Vec<(u64, String, PlayToken)>>,
        bad_urls: StdMutex<HashSet<String>>,
        playing: StdMutex<HashSet<u64>>,
        paused: StdMutex<HashSet<u64>>,
    }

    impl FakeSink {
        fn last_token(&self) -> PlayToken {
            self.armed.lock().unwrap().last().unwrap().2
        }

        fn armed_urls(&self) -> Vec<String> {
            self.armed
                .lock()
                .unwrap()
                .iter()
                .map(|(_, url, _)| url.clone())
                .collect()
        }

        fn mark_bad(&self, url: &str) {
            self.bad_urls.lock().unwrap().insert(url.to_string());
        }
    }

    #[async_trait]
    impl PlaybackSink for FakeSink {
        async fn arm(
            &self,
            guild: u64,
            stream_url: &str,
            token: PlayToken,
        ) -> Result<(), SinkError> {
            if self.bad_urls.lock().unwrap().contains(stream_url) {
                return Err(SinkError::Source("unreachable stream".to_string()));
            }
            self.armed
                .lock()
                .unwrap()
                .push((guild, stream_url.to_string(), token));
            self.playing.lock().unwrap().insert(guild);
            self.paused.lock().unwrap().remove(&guild);
            Ok(())
        }

        async fn pause(&self, guild: u64) -> Result<(), SinkError> {
            self.playing.lock().unwrap().remove(&guild);
            self.paused.lock().unwrap().insert(guild);
            Ok(())
        }

        async fn resume(&self, guild: u64) -> Result<(), SinkError> {
            self.paused.lock().unwrap().remove(&guild);
            self.playing.lock().unwrap().insert(guild);
            Ok(())
        }

        async fn stop(&self, guild: u64) -> Result<(), SinkError> {
            self.playing.lock().unwrap().remove(&guild);
            self.paused.lock().unwrap().remove(&guild);
            Ok(())
        }

        async fn is_playing(&self, guild: u64) -> bool {
            self.playing.lock().unwrap().contains(&guild)
        }

        async fn is_paused(&self, guild: u64) -> bool {
            self.paused.lock().unwrap().contains(&guild)
        }
    }

    #[derive(Default)]
    struct FakeGateway {
        connected: StdMutex<HashMap<u64, u64>>,
        fail_join: StdMutex<bool>,
        leaves: AtomicU64,
    }

    impl FakeGateway {
        fn refuse_joins(&self) {
            *self.fail_join.lock().unwrap() = true;
        }

        fn channel(&self, guild: u64) -> Option<u64> {
            self.connected.lock().unwrap().get(&guild).copied()
        }
    }

    #[async_trait]
    impl VoiceGateway for FakeGateway {
        async fn current_channel(&self, guild: u64) -> Option<u64> {
            self.channel(guild)
        }

        async fn join(&self, guild: u64, channel: u64) -> Result<(), GatewayError> {
            if *self.fail_join.lock().unwrap() {
                return Err(GatewayError::Join {
                    channel,
                    reason: "channel deleted".to_string(),
                });
            }
            self.connected.lock().unwrap().insert(guild, channel);
            Ok(())
        }

        async fn leave(&self, guild: u64) -> Result<(), GatewayError> {
            self.connected.lock().unwrap().remove(&guild);
            self.leaves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeNotifier {
        next_message: AtomicU64,
        announced: StdMutex<Vec<String>>,
        failed: StdMutex<Vec<String>>,
        reattached: StdMutex<Vec<u64>>,
        missing_channel: StdMutex<bool>,
    }

    impl FakeNotifier {
        fn drop_text_channel(&self) {
            *self.missing_channel.lock().unwrap() = true;
        }
    }

    #[async_trait]
    impl Notifier for FakeNotifier {
        async fn now_playing(&self, _text_channel: u64, track: &Track) -> Result<u64, NotifyError> {
            self.announced.lock().unwrap().push(track.title.clone());
            Ok(self.next_message.fetch_add(1, Ordering::SeqCst) + 100)
        }

        async fn track_failed(&self, _text_channel: u64, title: &str) -> Result<(), NotifyError> {
            self.failed.lock().unwrap().push(title.to_string());
            Ok(())
        }

        async fn reattach_controls(
            &self,
            text_channel: u64,
            message: u64,
        ) -> Result<(), NotifyError> {
            if *self.missing_channel.lock().unwrap() {
                return Err(NotifyError::ChannelMissing(text_channel));
            }
            self.reattached.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[derive(Default)]
    struct MemoryJournal {
        records: StdMutex<HashMap<u64, SessionRecord>>,
    }

    impl MemoryJournal {
        fn record(&self, guild: u64) -> Option<SessionRecord> {
            self.records.lock().unwrap().get(&guild).cloned()
        }
    }

    #[async_trait]
    impl SessionJournal for MemoryJournal {
        async fn load(&self) -> Result<Vec<(u64, SessionRecord)>, StoreError> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .iter()
                .map(|(guild, record)| (*guild, record.clone()))
                .collect())
        }

        async fn save(&self, guild: u64, record: &SessionRecord) -> Result<(), StoreError> {
            self.records.lock().unwrap().insert(guild, record.clone());
            Ok(())
        }

        async fn clear(&self, guild: u64) -> Result<(), StoreError> {
            self.records.lock().unwrap().remove(&guild);
            Ok(())
        }
    }

    struct Fixture {
        manager: SessionManager,
        sink: Arc<FakeSink>,
        gateway: Arc<FakeGateway>,
        notifier: Arc<FakeNotifier>,
        journal: Arc<MemoryJournal>,
    }

    fn fixture() -> Fixture {
        fixture_with_resolver(FakeResolver::ok())
    }

    fn fixture_with_resolver(resolver: FakeResolver) -> Fixture {
        let sink = Arc::new(FakeSink::default());
        let gateway = Arc::new(FakeGateway::default());
        let notifier = Arc::new(FakeNotifier::default());
        let journal = Arc::new(MemoryJournal::default());
        let manager = SessionManager::new(
            Arc::new(resolver),
            sink.clone(),
            gateway.clone(),
            notifier.clone(),
            journal.clone(),
        );
        Fixture {
            manager,
            sink,
            gateway,
            notifier,
            journal,
        }
    }

    async fn play(f: &Fixture, query: &str) -> QueueResult {
        f.manager
            .enqueue(GUILD, query, "@tester", Some(VOICE), TEXT)
            .await
            .unwrap()
    }

    fn record(title: &str) -> SessionRecord {
        SessionRecord {
            track: Track {
                stream_url: format!("https://stream/{title}"),
                title: title.to_string(),
                external_id: None,
                duration_secs: 180,
                requested_by: "@tester".to_string(),
            },
            status_message: Some(777),
            text_channel: TEXT,
            voice_channel: VOICE,
        }
    }

    #[tokio::test]
    async fn first_enqueue_starts_playing_later_ones_append() {
        let f = fixture();

        assert_matches!(play(&f, "song A").await, QueueResult::Started { title } if title == "song A");
        let now = f.manager.now_playing(GUILD).await.unwrap();
        assert_eq!(now.track.title, "song A");
        assert!(f.manager.queue_snapshot(GUILD).await.is_empty());

        assert_matches!(
            play(&f, "song B").await,
            QueueResult::Queued { position: 1, .. }
        );
        assert_matches!(
            play(&f, "song C").await,
            QueueResult::Queued { position: 2, .. }
        );

        // Still on the first track, queue grew behind it.
        let now = f.manager.now_playing(GUILD).await.unwrap();
        assert_eq!(now.track.title, "song A");
        let titles: Vec<_> = f
            .manager
            .queue_snapshot(GUILD)
            .await
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["song B", "song C"]);
        assert_eq!(f.gateway.channel(GUILD), Some(VOICE));
    }

    #[tokio::test]
    async fn enqueue_without_voice_channel_is_rejected() {
        let f = fixture();

        let err = f
            .manager
            .enqueue(GUILD, "song A", "@tester", None, TEXT)
            .await
            .unwrap_err();
        assert_matches!(err, SessionError::NotInVoice);
        assert!(f.manager.now_playing(GUILD).await.is_none());
    }

    #[tokio::test]
    async fn resolver_failures_propagate_without_state_changes() {
        let f = fixture_with_resolver(FakeResolver {
            fail: Some(ResolveError::NotFound(String::new())),
        });

        let err = f
            .manager
            .enqueue(GUILD, "gibberish", "@tester", Some(VOICE), TEXT)
            .await
            .unwrap_err();
        assert_matches!(err, SessionError::Resolve(ResolveError::NotFound(_)));
        assert!(f.manager.queue_snapshot(GUILD).await.is_empty());
        assert!(f.sink.armed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_advances_to_the_next_track() {
        let f = fixture();
        play(&f, "song A").await;
        play(&f, "song B").await;

        let token = f.sink.last_token();
        f.manager.on_track_end(token).await;

        let now = f.manager.now_playing(GUILD).await.unwrap();
        assert_eq!(now.track.title, "song B");
        assert!(f.manager.queue_snapshot(GUILD).await.is_empty());
        assert_eq!(f.notifier.announced.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn completion_with_empty_queue_tears_the_session_down() {
        let f = fixture();
        play(&f, "song A").await;

        let token = f.sink.last_token();
        f.manager.on_track_end(token).await;

        assert!(f.manager.now_playing(GUILD).await.is_none());
        assert_eq!(f.gateway.channel(GUILD), None);
        assert!(f.journal.record(GUILD).is_none());
    }

    #[tokio::test]
    async fn advance_on_an_idle_guild_is_idempotent() {
        let f = fixture();

        f.manager.advance(GUILD).await;
        f.manager.advance(GUILD).await;

        assert!(f.manager.now_playing(GUILD).await.is_none());
        assert_eq!(f.gateway.leaves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_completion_after_stop_does_not_revive_the_session() {
        let f = fixture();
        play(&f, "song A").await;
        play(&f, "song B").await;
        let token = f.sink.last_token();

        f.manager.stop(GUILD).await;
        f.manager.on_track_end(token).await;

        assert!(f.manager.now_playing(GUILD).await.is_none());
        assert!(f.manager.queue_snapshot(GUILD).await.is_empty());
        // Only song A was ever armed.
        assert_eq!(f.sink.armed_urls(), vec!["https://stream/song A"]);
    }

    #[tokio::test]
    async fn completion_from_a_stopped_session_cannot_touch_the_next_one() {
        let f = fixture();
        play(&f, "song A").await;
        let stale = f.sink.last_token();

        f.manager.stop(GUILD).await;
        play(&f, "song B").await;

        // Generations survive the teardown, so the two attempts never share
        // a token and the late completion of song A is dropped.
        assert_ne!(f.sink.last_token(), stale);
        f.manager.on_track_end(stale).await;

        let now = f.manager.now_playing(GUILD).await.unwrap();
        assert_eq!(now.track.title, "song B");
        assert_eq!(f.gateway.channel(GUILD), Some(VOICE));
    }

    #[tokio::test]
    async fn stale_control_token_is_a_no_op_for_every_command() {
        let f = fixture();
        play(&f, "song A").await;
        let stale = PlayToken {
            guild: GUILD,
            generation: f.sink.last_token().generation + 1,
        };

        for command in [
            ControlCommand::Pause,
            ControlCommand::Resume,
            ControlCommand::Skip,
            ControlCommand::Stop,
        ] {
            f.manager
                .handle_control(GUILD, stale, Some(VOICE), command)
                .await;
        }

        let now = f.manager.now_playing(GUILD).await.unwrap();
        assert_eq!(now.track.title, "song A");
        assert!(f.sink.is_playing(GUILD).await);
    }

    #[tokio::test]
    async fn controls_require_the_actor_to_share_the_voice_channel() {
        let f = fixture();
        play(&f, "song A").await;
        let token = f.sink.last_token();

        f.manager
            .handle_control(GUILD, token, Some(VOICE + 1), ControlCommand::Pause)
            .await;
        assert!(f.sink.is_playing(GUILD).await);

        f.manager
            .handle_control(GUILD, token, Some(VOICE), ControlCommand::Pause)
            .await;
        assert!(f.sink.is_paused(GUILD).await);
    }

    #[tokio::test]
    async fn controls_map_to_the_current_status_message_only() {
        let f = fixture();
        play(&f, "song A").await;

        let state_message = {
            let store = f.manager.store.lock().await;
            store.sessions[&GUILD]
                .playing
                .as_ref()
                .unwrap()
                .status_message
                .unwrap()
        };

        assert!(f
            .manager
            .controls_for_message(GUILD, state_message)
            .await
            .is_some());
        assert!(f
            .manager
            .controls_for_message(GUILD, state_message + 1)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn pause_only_while_playing_resume_only_while_paused() {
        let f = fixture();
        play(&f, "song A").await;

        assert!(!f.manager.resume(GUILD).await);
        assert!(f.manager.pause(GUILD).await);
        assert!(!f.manager.pause(GUILD).await);
        assert!(f.manager.resume(GUILD).await);
    }

    #[tokio::test]
    async fn skip_with_a_queued_track_moves_to_it() {
        let f = fixture();
        play(&f, "song A").await;
        play(&f, "song B").await;
        let token = f.sink.last_token();

        assert!(f.manager.skip(GUILD).await);
        // The sink's completion callback fires after the stop.
        f.manager.on_track_end(token).await;

        let now = f.manager.now_playing(GUILD).await.unwrap();
        assert_eq!(now.track.title, "song B");
        assert!(f.manager.queue_snapshot(GUILD).await.is_empty());
    }

    #[tokio::test]
    async fn skip_with_an_empty_queue_disconnects() {
        let f = fixture();
        play(&f, "song A").await;
        let token = f.sink.last_token();

        assert!(f.manager.skip(GUILD).await);
        f.manager.on_track_end(token).await;

        assert!(f.manager.now_playing(GUILD).await.is_none());
        assert_eq!(f.gateway.channel(GUILD), None);
        assert!(!f.manager.skip(GUILD).await);
    }

    #[tokio::test]
    async fn a_track_that_fails_to_arm_is_dropped_for_the_next_one() {
        let f = fixture();
        f.sink.mark_bad("https://stream/song A");

        assert_matches!(play(&f, "song A").await, QueueResult::Started { .. });
        // song A never started, so the guild is idle again.
        assert!(f.manager.now_playing(GUILD).await.is_none());
        assert_eq!(f.notifier.failed.lock().unwrap().as_slice(), ["song A"]);

        play(&f, "song B").await;
        f.sink.mark_bad("https://stream/song C");
        play(&f, "song C").await;
        play(&f, "song D").await;

        let token = f.sink.last_token();
        f.manager.on_track_end(token).await;

        // C was skipped over, D is playing.
        let now = f.manager.now_playing(GUILD).await.unwrap();
        assert_eq!(now.track.title, "song D");
    }

    #[tokio::test]
    async fn sessions_are_persisted_while_playing_and_cleared_on_stop() {
        let f = fixture();
        play(&f, "song A").await;

        let saved = f.journal.record(GUILD).unwrap();
        assert_eq!(saved.track.title, "song A");
        assert_eq!(saved.voice_channel, VOICE);
        assert!(saved.status_message.is_some());

        f.manager.stop(GUILD).await;
        assert!(f.journal.record(GUILD).is_none());
    }

    #[tokio::test]
    async fn recover_restarts_the_stored_track_and_controls() {
        let f = fixture();
        f.journal.save(GUILD, &record("song A")).await.unwrap();

        f.manager.recover_all().await;

        assert_eq!(f.gateway.channel(GUILD), Some(VOICE));
        assert_eq!(f.notifier.reattached.lock().unwrap().as_slice(), [777]);
        assert_eq!(f.sink.armed_urls(), vec!["https://stream/song A"]);
        let now = f.manager.now_playing(GUILD).await.unwrap();
        assert_eq!(now.track.title, "song A");
        // No fresh now-playing message is posted; the old one keeps serving.
        assert!(f.notifier.announced.lock().unwrap().is_empty());
        assert!(f
            .manager
            .controls_for_message(GUILD, 777)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn recover_with_a_dead_voice_channel_is_abandoned_quietly() {
        let f = fixture();
        f.gateway.refuse_joins();

        f.manager.recover(GUILD, record("song A")).await;

        assert!(f.manager.now_playing(GUILD).await.is_none());
        assert!(f.sink.armed.lock().unwrap().is_empty());
        assert!(f.journal.record(GUILD).is_none());
    }

    #[tokio::test]
    async fn recover_with_a_dead_text_channel_is_abandoned_quietly() {
        let f = fixture();
        f.notifier.drop_text_channel();

        f.manager.recover(GUILD, record("song A")).await;

        assert!(f.manager.now_playing(GUILD).await.is_none());
        assert!(f.sink.armed.lock().unwrap().is_empty());
        assert_eq!(f.gateway.channel(GUILD), None);
    }

    #[tokio::test]
    async fn shuffle_reorders_only_the_pending_queue() {
        let f = fixture();
        play(&f, "song A").await;
        for i in 0..8 {
            play(&f, &format!("song {i}")).await;
        }

        assert!(f.manager.shuffle(GUILD).await);

        let now = f.manager.now_playing(GUILD).await.unwrap();
        assert_eq!(now.track.title, "song A");
        assert_eq!(f.manager.queue_snapshot(GUILD).await.len(), 8);
    }
}
