//! Game session controller.
//!
//! One actor task owns the position, history and revision counter. Every
//! successful mutation advances the revision, broadcasts a snapshot, starts
//! an analysis for the new position and, when the engine has the move,
//! asks it to play.

mod actor;
mod commands;
mod coordinator;
mod events;
mod handle;
mod opponent;
mod revision;
mod snapshot;
mod state;

use std::sync::Arc;

use chess::Position;
use engine::EngineSession;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use actor::{run_session_actor, ActorParts};
pub use commands::{Hint, Selection, SessionError};
pub use coordinator::AnalysisResult;
use coordinator::AnalysisCoordinator;
pub use events::SessionEvent;
pub use handle::SessionHandle;
use opponent::OpponentDriver;
pub use revision::Revision;
pub use snapshot::{PositionRecord, SessionSnapshot};
use state::SessionState;

use crate::config::SessionConfig;

/// Start a session actor on `start` and return a handle to it.
///
/// The actor owns `engine` from here on and shuts it down when the session
/// ends. Must be called inside a tokio runtime.
pub fn spawn_session(
    engine: Arc<dyn EngineSession>,
    start: Position,
    config: SessionConfig,
) -> SessionHandle {
    let session_id = Uuid::new_v4().to_string();

    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, _) = broadcast::channel(100);
    let (replies_tx, replies_rx) = mpsc::channel(8);

    let coordinator = AnalysisCoordinator::new(Arc::clone(&engine), config.multipv);
    let analysis_rx = coordinator.subscribe();
    let parts = ActorParts {
        opponent: OpponentDriver::new(Arc::clone(&engine), replies_tx),
        engine,
        coordinator,
        replies_rx,
        event_tx,
    };

    tracing::info!(session_id = %session_id, "Creating session");
    let state = SessionState::new(session_id.clone(), start, config);
    tokio::spawn(run_session_actor(state, parts, cmd_rx));

    SessionHandle::new(session_id, cmd_tx, analysis_rx)
}
