//! Engine evaluation values and their display forms.

use cozy_chess::Move;
use serde::{Deserialize, Serialize};

use crate::position::Position;
use crate::types::PieceColor;

/// Engine evaluation score.
///
/// Always relative to the side to move in the analysed position.
/// Centipawns: positive = side-to-move is better.
/// Mate: positive N = side-to-move mates in N moves,
/// negative N = side-to-move gets mated in N moves, 0 = side-to-move is mated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnalysisScore {
    Centipawns(i32),
    Mate(i32),
}

/// How many plies of each candidate line are rendered.
pub const DISPLAY_PLIES: usize = 5;

impl AnalysisScore {
    pub fn display(&self) -> String {
        match self {
            Self::Centipawns(cp) => format!("{:+.2}", *cp as f64 / 100.0),
            Self::Mate(m) => {
                if *m > 0 {
                    format!("+M{}", m)
                } else {
                    format!("-M{}", m.abs())
                }
            }
        }
    }

    /// Negate the score (flip perspective).
    pub fn negate(&self) -> Self {
        match self {
            Self::Centipawns(cp) => Self::Centipawns(-cp),
            Self::Mate(m) => Self::Mate(-m),
        }
    }

    /// The same evaluation from White's point of view, given who was to move
    /// in the analysed position.
    pub fn for_white(&self, side_to_move: PieceColor) -> Self {
        match side_to_move {
            PieceColor::White => *self,
            PieceColor::Black => self.negate(),
        }
    }

    /// Evaluation bar fill in percent (0..=100), for whichever perspective
    /// this score is already in. Centipawns saturate at ±10 pawns.
    pub fn bar_fill(&self) -> f64 {
        match self {
            Self::Mate(m) if *m > 0 => 100.0,
            Self::Mate(_) => 0.0,
            Self::Centipawns(cp) => 50.0 + (*cp as f64 / 100.0).clamp(-10.0, 10.0) * 5.0,
        }
    }
}

impl std::fmt::Display for AnalysisScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

/// One ranked candidate line from a multi-line search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalVariation {
    /// 1-based, best first.
    pub rank: u8,
    pub score: AnalysisScore,
    pub depth: u32,
    /// Moves in the rules library's encoding, legal in sequence.
    pub moves: Vec<Move>,
    /// Numbered SAN for the first [`DISPLAY_PLIES`] moves, e.g. "1. e4 e5 2. Nf3".
    pub san: String,
}

impl PrincipalVariation {
    /// Build a line from engine moves, keeping only the legal prefix.
    pub fn new(
        position: &Position,
        rank: u8,
        score: AnalysisScore,
        depth: u32,
        engine_moves: &[Move],
    ) -> Self {
        let mut current = position.clone();
        let mut moves = Vec::with_capacity(engine_moves.len());
        let mut tokens = Vec::new();

        for mv in engine_moves {
            let Some(resolved) = current.resolve_uci_move(*mv) else {
                break;
            };
            let Ok(next) = current.apply(resolved) else {
                break;
            };
            if moves.len() < DISPLAY_PLIES {
                match current.side_to_move() {
                    PieceColor::White => tokens.push(format!("{}.", current.fullmove_number())),
                    PieceColor::Black if moves.is_empty() => {
                        tokens.push(format!("{}...", current.fullmove_number()))
                    }
                    PieceColor::Black => {}
                }
                tokens.push(current.san(resolved));
            }
            moves.push(resolved);
            current = next;
        }

        Self {
            rank,
            score,
            depth,
            moves,
            san: tokens.join(" "),
        }
    }

    pub fn best_move(&self) -> Option<Move> {
        self.moves.first().copied()
    }

    /// `1. [+0.35] 1. e4 e5 2. Nf3`
    pub fn display_line(&self) -> String {
        format!("{}. [{}] {}", self.rank, self.score.display(), self.san)
    }
}
