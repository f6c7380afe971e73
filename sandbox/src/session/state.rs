use chess::pgn::{export_pgn, parse_pgn, PgnHeaders};
use chess::{
    format_square, format_uci_move, to_standard_uci, HistoryStack, Move, Position, Square,
};
use cozy_chess::Piece;

use super::commands::{Selection, SessionError};
use super::revision::Revision;
use super::snapshot::{PositionRecord, SessionSnapshot};
use crate::config::{PlayMode, SessionConfig};

/// Internal mutable state, owned entirely by the session actor. No locks.
///
/// Every method here is synchronous; the engine is never awaited while the
/// position changes.
pub(crate) struct SessionState {
    pub session_id: String,
    /// Position `history.played()` replays from.
    start: Position,
    position: Position,
    history: HistoryStack,
    revision: Revision,
    config: SessionConfig,
    selection: Option<PendingSelection>,
}

/// First half of a click move: the picked square and its precomputed
/// destinations.
struct PendingSelection {
    from: Square,
    targets: Vec<(Square, Move)>,
}

impl SessionState {
    pub fn new(session_id: String, start: Position, config: SessionConfig) -> Self {
        Self {
            session_id,
            position: start.clone(),
            start,
            history: HistoryStack::new(),
            revision: Revision::INITIAL,
            config,
            selection: None,
        }
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn revision(&self) -> Revision {
        self.revision
    }

    #[cfg(test)]
    pub fn history(&self) -> &HistoryStack {
        &self.history
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Parse user input and play it.
    pub fn make_move(&mut self, input: &str) -> Result<Move, SessionError> {
        let mv = self.position.parse_move(input)?;
        self.apply_move(mv)?;
        Ok(mv)
    }

    /// Play a move already in the rules library's encoding.
    pub fn apply_move(&mut self, mv: Move) -> Result<(), SessionError> {
        let next = self.position.apply(mv)?;
        self.position = next;
        self.history.append(mv);
        self.bump();
        Ok(())
    }

    /// Take back the last move. `Ok(None)` (and no revision change) when
    /// nothing has been played.
    pub fn undo(&mut self) -> Result<Option<Move>, SessionError> {
        let Some(mv) = self.history.undo() else {
            return Ok(None);
        };
        match replay(&self.start, self.history.played()) {
            Ok(position) => {
                self.position = position;
                self.bump();
                Ok(Some(mv))
            }
            Err(e) => {
                self.history.redo();
                Err(e)
            }
        }
    }

    pub fn redo(&mut self) -> Result<Option<Move>, SessionError> {
        let Some(mv) = self.history.redo() else {
            return Ok(None);
        };
        match self.position.apply(mv) {
            Ok(next) => {
                self.position = next;
                self.bump();
                Ok(Some(mv))
            }
            Err(e) => {
                self.history.undo();
                Err(SessionError::Internal(format!("redo buffer out of sync: {}", e)))
            }
        }
    }

    /// Undo every played move at once. Returns false when nothing was played.
    pub fn goto_start(&mut self) -> bool {
        if self.history.rewind() == 0 {
            return false;
        }
        self.position = self.start.clone();
        self.bump();
        true
    }

    /// Back to the standard initial position with an empty history.
    pub fn reset(&mut self) {
        self.start = Position::initial();
        self.position = self.start.clone();
        self.history.reset();
        self.bump();
    }

    /// Replace the position from a FEN string. History is discarded.
    pub fn load(&mut self, fen: &str) -> Result<(), SessionError> {
        let position = Position::from_fen(fen)?;
        self.start = position.clone();
        self.position = position;
        self.history.reset();
        self.bump();
        Ok(())
    }

    /// Load a PGN game rewound to its first move, with the whole game
    /// queued for redo. Returns the number of queued moves.
    pub fn import_pgn(&mut self, pgn: &str) -> Result<usize, SessionError> {
        let game = parse_pgn(pgn).map_err(|e| SessionError::InvalidPgn(e.to_string()))?;
        let count = game.moves.len();
        self.start = game.start;
        self.position = self.start.clone();
        self.history.load_future(game.moves);
        self.bump();
        Ok(count)
    }

    /// Render the played moves as PGN, dated `date` (`YYYY.MM.DD`).
    pub fn export_pgn(&self, date: &str) -> String {
        let headers = PgnHeaders {
            date: date.to_string(),
            ..PgnHeaders::default()
        };
        export_pgn(&headers, &self.start, self.history.played())
    }

    /// One click of the two-phase select/confirm protocol.
    pub fn select_square(&mut self, square: Square) -> Result<Selection, SessionError> {
        match self.selection.take() {
            None => self.pick(square),
            Some(pending) => {
                let Some(&(_, mv)) = pending.targets.iter().find(|(to, _)| *to == square) else {
                    return Err(SessionError::InvalidSelection(format!(
                        "{} is not a legal destination from {}",
                        format_square(square),
                        format_square(pending.from)
                    )));
                };
                self.apply_move(mv)?;
                Ok(Selection::Played(self.snapshot()))
            }
        }
    }

    fn pick(&mut self, square: Square) -> Result<Selection, SessionError> {
        let board = self.position.board();
        if board.color_on(square) != Some(board.side_to_move()) {
            return Err(SessionError::InvalidSelection(format!(
                "no {} piece on {}",
                self.position.side_to_move(),
                format_square(square)
            )));
        }

        let mut targets: Vec<(Square, Move)> = Vec::new();
        for mv in self.position.legal_moves() {
            if mv.from != square || matches!(mv.promotion, Some(p) if p != Piece::Queen) {
                continue;
            }
            let shown = to_standard_uci(board, mv).to;
            if !targets.iter().any(|(to, _)| *to == shown) {
                targets.push((shown, mv));
            }
        }

        let picked = Selection::Picked {
            from: square,
            targets: targets.iter().map(|(to, _)| *to).collect(),
        };
        self.selection = Some(PendingSelection {
            from: square,
            targets,
        });
        Ok(picked)
    }

    /// Takes effect on the next mutation.
    pub fn set_mode(&mut self, mode: PlayMode) {
        self.config.mode = mode;
    }

    /// Takes effect on the next mutation.
    pub fn set_depth(&mut self, depth: u8) -> Result<(), SessionError> {
        if depth == 0 {
            return Err(SessionError::InvalidDepth(depth));
        }
        self.config.depth = depth;
        Ok(())
    }

    pub fn position_record(&self) -> PositionRecord {
        PositionRecord {
            fen: self.position.to_fen(),
            moves: self
                .history
                .played()
                .iter()
                .map(|mv| format_uci_move(*mv))
                .collect(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut sans = Vec::with_capacity(self.history.played().len());
        let mut cursor = self.start.clone();
        let mut last_move = None;
        for mv in self.history.played() {
            sans.push(cursor.san(*mv));
            last_move = Some(format_uci_move(to_standard_uci(cursor.board(), *mv)));
            match cursor.apply(*mv) {
                Ok(next) => cursor = next,
                Err(_) => break,
            }
        }

        SessionSnapshot {
            session_id: self.session_id.clone(),
            revision: self.revision,
            fen: self.position.to_fen(),
            side_to_move: self.position.side_to_move(),
            status: self.position.status(),
            is_check: self.position.is_check(),
            moves: sans,
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
            last_move,
            selected: self.selection.as_ref().map(|s| format_square(s.from)),
            mode: self.config.mode,
            depth: self.config.depth,
        }
    }

    /// Every successful mutation advances the revision and drops any
    /// half-finished click selection.
    fn bump(&mut self) {
        self.revision = self.revision.next();
        self.selection = None;
    }
}

/// Position reached by playing `moves` from `start`.
pub(crate) fn replay(start: &Position, moves: &[Move]) -> Result<Position, SessionError> {
    moves.iter().try_fold(start.clone(), |position, mv| {
        position
            .apply(*mv)
            .map_err(|e| SessionError::Internal(format!("history does not replay: {}", e)))
    })
}
