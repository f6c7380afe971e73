use cozy_chess::Board;

pub const STARTING_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

/// Parse a FEN string into a Board
pub fn parse_fen(fen: &str) -> Result<Board, FenError> {
    let fen = fen.trim();
    let parts: Vec<&str> = fen.split_whitespace().collect();
    if parts.is_empty() {
        return Err(FenError::Empty);
    }
    if parts.len() != 6 {
        return Err(FenError::FieldCount(parts.len()));
    }

    Board::from_fen(fen, false).map_err(|_| FenError::InvalidFormat(fen.to_string()))
}

/// Format a Board as a FEN string
pub fn format_fen(board: &Board) -> String {
    board.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FenError {
    #[error("FEN string is empty")]
    Empty,
    #[error("FEN must have 6 fields, got {0}")]
    FieldCount(usize),
    #[error("Invalid FEN: {0}")]
    InvalidFormat(String),
}
