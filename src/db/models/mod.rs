pub mod timeline;
pub mod watch_state;

pub use timeline::MediaTimeline;
pub use watch_state::WatchState;
