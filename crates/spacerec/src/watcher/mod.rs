//! Resource lifecycle watching.

mod config;
mod events;
mod handle;
mod lifecycle;
mod state;

pub use config::WatcherConfig;
pub use events::{WatcherEvent, WatcherEventBroadcaster, WatcherEventKind};
pub use handle::WatcherHandle;
pub use lifecycle::{LifecycleWatcher, OutputPathResolver};
pub use state::WatcherState;
