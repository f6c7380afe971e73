use chess::{GameError, Move, Square};
use tokio::sync::{broadcast, oneshot};

use super::events::SessionEvent;
use super::snapshot::{PositionRecord, SessionSnapshot};
use crate::config::PlayMode;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Illegal move: {0}")]
    IllegalMove(String),
    #[error("Unparsable move: {0}")]
    UnparsableMove(String),
    #[error("Invalid position encoding: {0}")]
    InvalidEncoding(String),
    #[error("Analysis depth must be at least 1, got {0}")]
    InvalidDepth(u8),
    #[error("Invalid PGN: {0}")]
    InvalidPgn(String),
    #[error("Invalid selection: {0}")]
    InvalidSelection(String),
    #[error("Engine error: {0}")]
    Engine(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<GameError> for SessionError {
    fn from(e: GameError) -> Self {
        match e {
            GameError::IllegalMove(m) => Self::IllegalMove(m),
            GameError::UnparsableMove(m) => Self::UnparsableMove(m),
            GameError::InvalidEncoding(fen) => Self::InvalidEncoding(fen.to_string()),
        }
    }
}

/// Result of one click in the two-phase select/confirm protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// A piece was picked; these are its legal destination squares.
    Picked { from: Square, targets: Vec<Square> },
    /// The click completed a legal move, which has been played.
    Played(SessionSnapshot),
}

/// A suggested move that has not been played.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hint {
    pub mv: Move,
    pub san: String,
    pub uci: String,
}

/// Commands sent to the session actor. Each embeds a oneshot for the reply.
pub enum SessionCommand {
    MakeMove {
        input: String,
        reply: oneshot::Sender<Result<SessionSnapshot, SessionError>>,
    },
    SelectSquare {
        square: Square,
        reply: oneshot::Sender<Result<Selection, SessionError>>,
    },
    Undo {
        reply: oneshot::Sender<Result<SessionSnapshot, SessionError>>,
    },
    Redo {
        reply: oneshot::Sender<Result<SessionSnapshot, SessionError>>,
    },
    GotoStart {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Reset {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Load {
        fen: String,
        reply: oneshot::Sender<Result<SessionSnapshot, SessionError>>,
    },
    ImportPgn {
        pgn: String,
        reply: oneshot::Sender<Result<SessionSnapshot, SessionError>>,
    },
    ExportPgn {
        reply: oneshot::Sender<String>,
    },
    SetMode {
        mode: PlayMode,
        reply: oneshot::Sender<SessionSnapshot>,
    },
    SetDepth {
        depth: u8,
        reply: oneshot::Sender<Result<SessionSnapshot, SessionError>>,
    },
    Hint {
        reply: oneshot::Sender<Result<Hint, SessionError>>,
    },
    GetSnapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    GetPositionRecord {
        reply: oneshot::Sender<PositionRecord>,
    },
    Subscribe {
        reply: oneshot::Sender<(SessionSnapshot, broadcast::Receiver<SessionEvent>)>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
