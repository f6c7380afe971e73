//! Chess analysis sandbox: a game session controller that keeps a position,
//! its move history and a revision counter, and drives an external UCI
//! engine for analysis and auto-play without ever showing a stale result.

pub mod config;
pub mod persistence;
pub mod repl;
pub mod session;

pub use config::{PlayMode, SessionConfig};
pub use session::{spawn_session, SessionHandle};
