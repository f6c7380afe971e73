use chess::{GameStatus, PieceColor};
use serde::Serialize;

use super::revision::Revision;
use crate::config::PlayMode;

/// Complete, immutable snapshot of session state.
/// Sent to subscribers on every state change and on subscribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub revision: Revision,
    pub fen: String,
    pub side_to_move: PieceColor,
    pub status: GameStatus,
    pub is_check: bool,
    /// Played moves in SAN, from the start position.
    pub moves: Vec<String>,
    pub can_undo: bool,
    pub can_redo: bool,
    /// Last played move in UCI form, castling as the king's landing square.
    pub last_move: Option<String>,
    /// Square picked by the first half of a click selection.
    pub selected: Option<String>,
    pub mode: PlayMode,
    pub depth: u8,
}

/// What a saved position captures: the current FEN and the moves played to
/// reach it, as UCI strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionRecord {
    pub fen: String,
    pub moves: Vec<String>,
}
