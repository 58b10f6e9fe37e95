//! Daemon-side pieces: request dispatch, the serialized generation host,
//! and the folder watchers.

pub mod dispatcher;
pub mod engine;
pub mod history;
pub mod watcher;

pub use dispatcher::RequestDispatcher;
pub use engine::{EchoEngine, EngineHost, GenerationEngine, GenerationError};
pub use history::{ConversationHistory, DEFAULT_HISTORY_PAIRS, Role, Turn};
pub use watcher::{FileCategory, FolderWatcher};
