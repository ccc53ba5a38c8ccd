//! Editor-session state that survives individual key dispatches: the undo
//! log and the kill ring. The modal overlay state itself lives with the
//! controller, which owns the transitions.

pub mod kill;
pub mod undo;

pub use kill::KillRing;
pub use undo::{UndoAction, UndoLog, DEFAULT_MAX_ACTIONS, DEFAULT_MERGE_TIMEOUT};
