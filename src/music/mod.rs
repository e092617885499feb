pub mod notify;
pub mod resolver;
pub mod session;
pub mod sink;
pub mod track;

pub use notify::{control_for_emoji, ChannelNotifier};
pub use resolver::YtDlpResolver;
pub use session::{SessionError, SessionManager};
pub use sink::{SongbirdGateway, SongbirdSink};
pub use track::{ControlCommand, PlayToken, QueueResult};
