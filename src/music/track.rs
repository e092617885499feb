use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One playable item, produced by a resolver and consumed by the sink.
/// Immutable once resolved; the stream URL is time-limited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub stream_url: String,
    pub title: String,
    /// Upstream video id, used for thumbnail lookup.
    pub external_id: Option<String>,
    /// 0 means unknown.
    pub duration_secs: u64,
    /// Mention string of the user who requested the track.
    pub requested_by: String,
}

/// Identifies one playback attempt of one guild. The generation is bumped
/// every time a track is armed, so completions and transport controls from a
/// superseded attempt can be recognised and dropped.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayToken {
    pub guild: u64,
    pub generation: u64,
}

/// The currently playing (or paused) track of a guild, plus the bookkeeping
/// needed to post status updates and validate transport controls.
#[derive(Clone, Debug)]
pub struct PlaybackState {
    pub track: Track,
    /// When playback began. Paused time is not subtracted when computing
    /// elapsed time.
    pub started_at: DateTime<Utc>,
    /// The "Now Playing" message carrying the transport reactions. Set after
    /// the sink is armed; the message is best-effort and playback does not
    /// depend on it.
    pub status_message: Option<u64>,
    pub text_channel: u64,
    pub voice_channel: u64,
    pub token: PlayToken,
}

/// Durable snapshot of a session, enough to reconnect and restart the
/// current track after a process restart.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub track: Track,
    pub status_message: Option<u64>,
    pub text_channel: u64,
    pub voice_channel: u64,
}

impl From<&PlaybackState> for SessionRecord {
    fn from(state: &PlaybackState) -> Self {
        SessionRecord {
            track: state.track.clone(),
            status_message: state.status_message,
            text_channel: state.text_channel,
            voice_channel: state.voice_channel,
        }
    }
}

/// Outcome of an enqueue call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueResult {
    /// The guild was idle; playback started with this track.
    Started { title: String },
    /// Something was already playing; the track was appended at `position`
    /// (1-based).
    Queued { position: usize, title: String },
}

/// Transport commands accepted from reactions and prefix commands.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ControlCommand {
    Pause,
    Resume,
    Skip,
    Stop,
}

/// Read-only view of the current playback, for the `nowplaying` command.
#[derive(Clone, Debug)]
pub struct NowPlaying {
    pub track: Track,
    pub elapsed_secs: u64,
}
