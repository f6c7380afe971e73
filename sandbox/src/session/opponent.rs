use std::sync::Arc;
use std::time::Duration;

use chess::{Move, Position};
use engine::{EngineError, EngineSession, GoParams};
use tokio::sync::mpsc;
use tracing::Instrument;

use super::revision::Revision;
use crate::config::PlayMode;

/// Engine answer for the position at `revision`. The actor applies it only
/// if the session is still at that revision.
#[derive(Debug)]
pub(crate) struct OpponentReply {
    pub revision: Revision,
    pub result: Result<Option<Move>, EngineError>,
}

/// Asks the engine for a move whenever it is the engine's side to play.
pub(crate) struct OpponentDriver {
    engine: Arc<dyn EngineSession>,
    replies_tx: mpsc::Sender<OpponentReply>,
}

impl OpponentDriver {
    pub fn new(engine: Arc<dyn EngineSession>, replies_tx: mpsc::Sender<OpponentReply>) -> Self {
        Self { engine, replies_tx }
    }

    /// Request an engine move if `mode` gives the side to move to the engine
    /// and the game is still going. Returns whether a request was made.
    pub fn maybe_move(
        &self,
        position: &Position,
        revision: Revision,
        mode: PlayMode,
        movetime: Duration,
    ) -> bool {
        if mode.engine_side() != Some(position.side_to_move()) {
            return false;
        }
        if !position.status().is_ongoing() {
            tracing::debug!("Game over, engine does not move");
            return false;
        }

        let engine = Arc::clone(&self.engine);
        let replies_tx = self.replies_tx.clone();
        let fen = position.to_fen();
        let params = GoParams::movetime(movetime.as_millis().max(1) as u64);

        let task = async move {
            tracing::debug!("Requesting engine move for {}", fen);
            let result = engine.best_move(&fen, params).await;
            if replies_tx
                .send(OpponentReply { revision, result })
                .await
                .is_err()
            {
                tracing::debug!("Session gone before engine move arrived");
            }
        };
        tokio::spawn(task.instrument(tracing::info_span!(
            "opponent",
            revision = revision.value()
        )));
        true
    }
}
