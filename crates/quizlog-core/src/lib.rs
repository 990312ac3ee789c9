// ABOUTME: Core library for quizlog, containing the log entry model and replay rules.
// ABOUTME: This crate defines the shared data model with no file I/O of its own.

pub mod dataset;
pub mod entry;
pub mod model;
pub mod state;

pub use dataset::{Dataset, DatasetName, DatasetNameError, GameStates, Players, Tokens};
pub use entry::{LogEntry, Operation, PendingEntry};
pub use model::{GameSession, PlayerStats, TokenMetadata};
pub use state::MaterializedState;
