use cozy_chess::{Board, Move, Piece};
use serde::{Deserialize, Serialize};

use crate::fen::{format_fen, parse_fen, FenError};
use crate::pgn::san::{format_san, parse_san, SanError};
use crate::types::PieceColor;
use crate::uci::{convert_uci_castling_to_cozy, format_uci_move, parse_uci_move};

/// One immutable board configuration. Moves produce a new `Position`;
/// nothing mutates an existing one.
#[derive(Debug, Clone)]
pub struct Position {
    board: Board,
}

/// Terminal classification of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameStatus {
    Ongoing,
    Checkmate { winner: PieceColor },
    Stalemate,
    DrawInsufficientMaterial,
    DrawFiftyMove,
}

impl GameStatus {
    pub fn is_ongoing(self) -> bool {
        matches!(self, Self::Ongoing)
    }

    /// PGN result token for this status.
    pub fn result_token(self) -> &'static str {
        match self {
            Self::Ongoing => "*",
            Self::Checkmate {
                winner: PieceColor::White,
            } => "1-0",
            Self::Checkmate {
                winner: PieceColor::Black,
            } => "0-1",
            Self::Stalemate | Self::DrawInsufficientMaterial | Self::DrawFiftyMove => "1/2-1/2",
        }
    }
}

impl std::fmt::Display for GameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ongoing => write!(f, "ongoing"),
            Self::Checkmate { winner } => write!(f, "checkmate, {} wins", winner),
            Self::Stalemate => write!(f, "stalemate"),
            Self::DrawInsufficientMaterial => write!(f, "draw by insufficient material"),
            Self::DrawFiftyMove => write!(f, "draw by the fifty-move rule"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("Illegal move: {0}")]
    IllegalMove(String),
    #[error("Unparsable move: {0}")]
    UnparsableMove(String),
    #[error("Invalid position encoding: {0}")]
    InvalidEncoding(#[from] FenError),
}

impl Position {
    /// The standard starting position.
    pub fn initial() -> Self {
        Self {
            board: Board::default(),
        }
    }

    /// Parse a FEN string.
    pub fn from_fen(fen: &str) -> Result<Self, GameError> {
        Ok(Self {
            board: parse_fen(fen)?,
        })
    }

    pub fn to_fen(&self) -> String {
        format_fen(&self.board)
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn side_to_move(&self) -> PieceColor {
        self.board.side_to_move().into()
    }

    pub fn fullmove_number(&self) -> u16 {
        self.board.fullmove_number()
    }

    pub fn is_check(&self) -> bool {
        !self.board.checkers().is_empty()
    }

    /// All legal moves, castling in king-takes-rook form.
    pub fn legal_moves(&self) -> Vec<Move> {
        let mut moves = Vec::new();
        self.board.generate_moves(|mvs| {
            moves.extend(mvs);
            false
        });
        moves
    }

    /// Apply a move, producing the next position.
    pub fn apply(&self, mv: Move) -> Result<Position, GameError> {
        let mut board = self.board.clone();
        board
            .try_play(mv)
            .map_err(|_| GameError::IllegalMove(format_uci_move(mv)))?;
        Ok(Self { board })
    }

    /// Parse move text typed by a user: SAN ("Nf3", "O-O", "e8=Q")
    /// or coordinate notation ("g1f3", "e1g1", "e7e8q").
    ///
    /// Well-formed text that does not name exactly one legal move is an
    /// `IllegalMove`; it is never coerced to some other move.
    pub fn parse_move(&self, text: &str) -> Result<Move, GameError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(GameError::UnparsableMove(String::new()));
        }

        if let Some(mv) = parse_uci_move(text) {
            return self
                .resolve_uci_move(mv)
                .ok_or_else(|| GameError::IllegalMove(text.to_string()));
        }

        parse_san(&self.board, text).map_err(|e| match e {
            SanError::InvalidFormat(_) => GameError::UnparsableMove(text.to_string()),
            SanError::NoLegalMove(_) => GameError::IllegalMove(text.to_string()),
            SanError::AmbiguousMove(_) => GameError::IllegalMove(format!("{} is ambiguous", text)),
        })
    }

    /// Map a move in standard UCI form (as engines send it) onto the
    /// matching legal move, or None if there is none.
    pub fn resolve_uci_move(&self, mv: Move) -> Option<Move> {
        let legal = self.legal_moves();
        let converted = convert_uci_castling_to_cozy(mv, &legal);
        legal.contains(&converted).then_some(converted)
    }

    /// SAN for a legal move in this position.
    pub fn san(&self, mv: Move) -> String {
        format_san(&self.board, mv)
    }

    pub fn status(&self) -> GameStatus {
        let has_moves = self
            .board
            .generate_moves(|mvs| mvs.into_iter().next().is_some());
        if !has_moves {
            if self.is_check() {
                return GameStatus::Checkmate {
                    winner: self.side_to_move().opposite(),
                };
            }
            return GameStatus::Stalemate;
        }
        if self.has_insufficient_material() {
            return GameStatus::DrawInsufficientMaterial;
        }
        if self.board.halfmove_clock() >= 100 {
            return GameStatus::DrawFiftyMove;
        }
        GameStatus::Ongoing
    }

    /// Neither side can ever deliver mate: bare kings, a single minor piece,
    /// or bishops that all stand on one square color.
    fn has_insufficient_material(&self) -> bool {
        let board = &self.board;
        let heavy =
            board.pieces(Piece::Pawn) | board.pieces(Piece::Rook) | board.pieces(Piece::Queen);
        if !heavy.is_empty() {
            return false;
        }
        let knights = board.pieces(Piece::Knight);
        let bishops = board.pieces(Piece::Bishop);
        if knights.len() + bishops.len() <= 1 {
            return true;
        }
        if !knights.is_empty() {
            return false;
        }
        let mut shades = bishops
            .into_iter()
            .map(|sq| (sq.file() as u8 + sq.rank() as u8) % 2);
        match shades.next() {
            Some(first) => shades.all(|shade| shade == first),
            None => true,
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Self::initial()
    }
}

impl PartialEq for Position {
    fn eq(&self, other: &Self) -> bool {
        self.to_fen() == other.to_fen()
    }
}

impl Eq for Position {}

#[cfg(test)]
mod tests {
    use super::*;

    fn play(pos: &Position, text: &str) -> Position {
        let mv = pos.parse_move(text).unwrap();
        pos.apply(mv).unwrap()
    }

    #[test]
    fn test_initial_position() {
        let pos = Position::initial();
        assert_eq!(pos.side_to_move(), PieceColor::White);
        assert_eq!(pos.legal_moves().len(), 20);
        assert_eq!(pos.status(), GameStatus::Ongoing);
        assert_eq!(pos.to_fen(), crate::fen::STARTING_FEN);
    }

    #[test]
    fn test_apply_returns_new_position() {
        let pos = Position::initial();
        let after = play(&pos, "e4");
        assert_eq!(after.side_to_move(), PieceColor::Black);
        // original untouched
        assert_eq!(pos, Position::initial());
    }

    #[test]
    fn test_apply_illegal_move_fails() {
        let pos = Position::initial();
        let mv = parse_uci_move("e2e5").unwrap();
        assert!(matches!(pos.apply(mv), Err(GameError::IllegalMove(_))));
    }

    #[test]
    fn test_parse_move_errors() {
        let pos = Position::initial();
        assert!(matches!(
            pos.parse_move("hello"),
            Err(GameError::UnparsableMove(_))
        ));
        assert!(matches!(pos.parse_move(""), Err(GameError::UnparsableMove(_))));
        // well-formed but illegal here
        assert!(matches!(pos.parse_move("e5"), Err(GameError::IllegalMove(_))));
        assert!(matches!(pos.parse_move("Nf6"), Err(GameError::IllegalMove(_))));
        assert!(matches!(
            pos.parse_move("e2e5"),
            Err(GameError::IllegalMove(_))
        ));
    }

    #[test]
    fn test_parse_move_accepts_san_and_uci() {
        let pos = Position::initial();
        assert_eq!(pos.parse_move("Nf3").unwrap(), pos.parse_move("g1f3").unwrap());
        assert_eq!(pos.parse_move(" e4 ").unwrap(), pos.parse_move("e2e4").unwrap());
    }

    #[test]
    fn test_uci_castling_is_resolved() {
        let pos = Position::from_fen("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1").unwrap();
        let castle = pos.parse_move("e1g1").unwrap();
        assert_eq!(castle, pos.parse_move("O-O").unwrap());
        assert_eq!(format_uci_move(castle), "e1h1");
    }

    #[test]
    fn test_fools_mate_is_checkmate() {
        let mut pos = Position::initial();
        for mv in ["f3", "e5", "g4", "Qh4#"] {
            pos = play(&pos, mv);
        }
        assert_eq!(
            pos.status(),
            GameStatus::Checkmate {
                winner: PieceColor::Black
            }
        );
        assert_eq!(pos.status().result_token(), "0-1");
        assert!(pos.legal_moves().is_empty());
    }

    #[test]
    fn test_stalemate() {
        let pos = Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        assert_eq!(pos.status(), GameStatus::Stalemate);
    }

    #[test]
    fn test_insufficient_material() {
        let bare = Position::from_fen("8/8/4k3/8/8/3K4/8/8 w - - 0 1").unwrap();
        assert_eq!(bare.status(), GameStatus::DrawInsufficientMaterial);

        let knight = Position::from_fen("8/8/4k3/8/8/3K4/5N2/8 w - - 0 1").unwrap();
        assert_eq!(knight.status(), GameStatus::DrawInsufficientMaterial);

        // bishops on c1 and f8 are both dark squares
        let same_shade = Position::from_fen("5b2/8/4k3/8/8/3K4/8/2B5 w - - 0 1").unwrap();
        assert_eq!(same_shade.status(), GameStatus::DrawInsufficientMaterial);

        let rook = Position::from_fen("8/8/4k3/8/8/3K4/8/R7 w - - 0 1").unwrap();
        assert_eq!(rook.status(), GameStatus::Ongoing);
    }

    #[test]
    fn test_fifty_move_rule() {
        let pos = Position::from_fen("8/8/4k3/8/8/3K4/8/R7 w - - 100 80").unwrap();
        assert_eq!(pos.status(), GameStatus::DrawFiftyMove);
    }

    #[test]
    fn test_invalid_fen() {
        assert!(matches!(
            Position::from_fen("not a fen"),
            Err(GameError::InvalidEncoding(_))
        ));
    }
}
