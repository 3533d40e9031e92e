pub mod timelines;
pub mod watch_states;

pub use timelines::TimelineUpsert;
