//! Engine collaborator: a long-lived UCI engine session shared by analysis
//! and auto-play.

#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod stockfish;
pub mod uci;

pub use stockfish::{find_stockfish_path, EngineConfig, StockfishEngine};
pub use uci::{UciError, UciMessage};

use async_trait::async_trait;
use chess::AnalysisScore;
use cozy_chess::Move;

/// One engine session. Requests on a session never interleave; concurrent
/// callers are served one after another.
///
/// Moves are in standard UCI form (castling as `e1g1`), and scores are
/// relative to the side to move in the requested position.
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Human-readable name, e.g. "Stockfish 16".
    fn name(&self) -> &str;

    /// Best move under a time or depth budget. `Ok(None)` when the position
    /// has no legal move.
    async fn best_move(&self, fen: &str, params: GoParams) -> Result<Option<Move>, EngineError>;

    /// Top `multipv` lines at a fixed search depth.
    async fn analyse(&self, fen: &str, depth: u8, multipv: u8)
        -> Result<AnalysisReport, EngineError>;

    /// Release the engine. Later requests fail with `Unavailable`.
    async fn shutdown(&self);
}

/// Parameters for the "go" command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GoParams {
    pub movetime: Option<u64>, // Move time in milliseconds
    pub depth: Option<u8>,     // Search depth
}

impl GoParams {
    pub fn movetime(ms: u64) -> Self {
        Self {
            movetime: Some(ms),
            depth: None,
        }
    }

    pub fn depth(depth: u8) -> Self {
        Self {
            movetime: None,
            depth: Some(depth),
        }
    }

    /// `go ...\n`, falling back to one second when no budget is set.
    pub fn to_command(self) -> String {
        match (self.movetime, self.depth) {
            (Some(ms), _) => format!("go movetime {}\n", ms),
            (None, Some(depth)) => format!("go depth {}\n", depth),
            (None, None) => "go movetime 1000\n".to_string(),
        }
    }
}

/// Engine analysis information
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineInfo {
    pub depth: Option<u32>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub score: Option<AnalysisScore>,
    /// Score is only a lower or upper bound from an aspiration window.
    pub bound: bool,
    pub pv: Vec<Move>, // Principal variation
    pub multipv: Option<u8>,
}

/// One ranked line of a multi-line search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineLine {
    /// 1-based, best first.
    pub rank: u8,
    pub depth: u32,
    pub score: AnalysisScore,
    pub pv: Vec<Move>,
}

/// Result of `analyse`: lines ordered best-first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnalysisReport {
    pub lines: Vec<EngineLine>,
    /// Search totals from the last info line that carried them.
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
}

impl AnalysisReport {
    pub fn best(&self) -> Option<&EngineLine> {
        self.lines.first()
    }

    /// Fold one info line into the report, keeping the newest exact score
    /// per rank.
    pub fn absorb(&mut self, info: &EngineInfo) {
        self.nodes = info.nodes.or(self.nodes);
        self.nps = info.nps.or(self.nps);
        let (Some(score), false) = (info.score, info.bound) else {
            return;
        };
        if info.pv.is_empty() {
            return;
        }
        let rank = info.multipv.unwrap_or(1);
        let line = EngineLine {
            rank,
            depth: info.depth.unwrap_or(0),
            score,
            pv: info.pv.clone(),
        };
        match self.lines.iter_mut().find(|l| l.rank == rank) {
            Some(existing) => *existing = line,
            None => {
                self.lines.push(line);
                self.lines.sort_by_key(|l| l.rank);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Engine unavailable: {0}")]
    Unavailable(String),
    #[error("Engine protocol error: {0}")]
    Protocol(String),
}

impl From<UciError> for EngineError {
    fn from(e: UciError) -> Self {
        Self::Protocol(e.to_string())
    }
}
