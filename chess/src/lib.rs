//! Rules boundary for the sandbox.
//!
//! Everything that needs to know how chess works (legal moves, SAN, FEN,
//! terminal status) lives here, on top of cozy-chess. The session layer only
//! sees `Position`, `Move` and the error types below.

pub mod analysis;
pub mod converters;
pub mod fen;
pub mod history;
pub mod pgn;
pub mod position;
pub mod types;
pub mod uci;

pub use analysis::{AnalysisScore, PrincipalVariation};
pub use converters::*;
pub use fen::{FenError, STARTING_FEN};
pub use history::HistoryStack;
pub use position::{GameError, GameStatus, Position};
pub use types::PieceColor;
pub use uci::{convert_uci_castling_to_cozy, format_uci_move, parse_uci_move, to_standard_uci};

pub use cozy_chess::{Move, Square};
