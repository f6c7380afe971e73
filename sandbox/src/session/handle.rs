use std::sync::Arc;

use chess::Square;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::commands::{Hint, Selection, SessionCommand, SessionError};
use super::coordinator::AnalysisResult;
use super::events::SessionEvent;
use super::snapshot::{PositionRecord, SessionSnapshot};
use crate::config::PlayMode;

/// Cheap, cloneable handle to a session actor.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    cmd_tx: mpsc::Sender<SessionCommand>,
    analysis_rx: watch::Receiver<Option<Arc<AnalysisResult>>>,
}

impl SessionHandle {
    pub(crate) fn new(
        id: String,
        cmd_tx: mpsc::Sender<SessionCommand>,
        analysis_rx: watch::Receiver<Option<Arc<AnalysisResult>>>,
    ) -> Self {
        Self {
            id,
            cmd_tx,
            analysis_rx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Play a move given as SAN or coordinate notation.
    pub async fn make_move(&self, input: &str) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::MakeMove {
            input: input.to_string(),
            reply: tx,
        })
        .await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))?
    }

    pub async fn select_square(&self, square: Square) -> Result<Selection, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::SelectSquare { square, reply: tx })
            .await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))?
    }

    /// Silent no-op (current snapshot, same revision) when nothing is played.
    pub async fn undo(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Undo { reply: tx }).await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))?
    }

    pub async fn redo(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Redo { reply: tx }).await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))?
    }

    pub async fn goto_start(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::GotoStart { reply: tx }).await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))
    }

    pub async fn reset(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Reset { reply: tx }).await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))
    }

    /// Replace the position from FEN, discarding history.
    pub async fn load(&self, fen: &str) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Load {
            fen: fen.to_string(),
            reply: tx,
        })
        .await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))?
    }

    pub async fn import_pgn(&self, pgn: &str) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::ImportPgn {
            pgn: pgn.to_string(),
            reply: tx,
        })
        .await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))?
    }

    pub async fn export_pgn(&self) -> Result<String, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::ExportPgn { reply: tx }).await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))
    }

    pub async fn set_mode(&self, mode: PlayMode) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::SetMode { mode, reply: tx })
            .await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))
    }

    pub async fn set_depth(&self, depth: u8) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::SetDepth { depth, reply: tx })
            .await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))?
    }

    /// Engine suggestion for the current position. Nothing is played.
    pub async fn hint(&self) -> Result<Hint, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Hint { reply: tx }).await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))?
    }

    pub async fn get_snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::GetSnapshot { reply: tx }).await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))
    }

    pub async fn position_record(&self) -> Result<PositionRecord, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::GetPositionRecord { reply: tx })
            .await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))
    }

    pub async fn subscribe(
        &self,
    ) -> Result<(SessionSnapshot, broadcast::Receiver<SessionEvent>), SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(SessionCommand::Subscribe { reply: tx }).await?;
        rx.await
            .map_err(|_| SessionError::Internal("Reply dropped".into()))
    }

    /// Receiver for published analysis. Only current results ever appear.
    pub fn subscribe_analysis(&self) -> watch::Receiver<Option<Arc<AnalysisResult>>> {
        self.analysis_rx.clone()
    }

    pub fn latest_analysis(&self) -> Option<Arc<AnalysisResult>> {
        self.analysis_rx.borrow().clone()
    }

    /// Stop the actor and release the engine. Returns once both are done.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCommand::Shutdown { reply: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    async fn send(&self, cmd: SessionCommand) -> Result<(), SessionError> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| SessionError::Internal("Session actor closed".into()))
    }
}
