mod input;
mod watcher;

pub use input::ButtonInput;
pub use watcher::{ButtonEvent, ButtonWatcher, WatcherStats};
