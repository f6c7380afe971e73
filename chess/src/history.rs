use cozy_chess::Move;

/// Played moves plus a redo buffer of moves taken back but not yet discarded.
///
/// `undone` is kept most-recently-undone last, so `redo` always restores the
/// move that was taken back most recently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryStack {
    played: Vec<Move>,
    undone: Vec<Move>,
}

impl HistoryStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly applied move. Any redo buffer is discarded.
    pub fn append(&mut self, mv: Move) {
        self.played.push(mv);
        self.undone.clear();
    }

    pub fn undo(&mut self) -> Option<Move> {
        let mv = self.played.pop()?;
        self.undone.push(mv);
        Some(mv)
    }

    pub fn redo(&mut self) -> Option<Move> {
        let mv = self.undone.pop()?;
        self.played.push(mv);
        Some(mv)
    }

    pub fn reset(&mut self) {
        self.played.clear();
        self.undone.clear();
    }

    /// Undo every played move at once. Returns how many moves were taken back.
    pub fn rewind(&mut self) -> usize {
        let count = self.played.len();
        while self.undo().is_some() {}
        count
    }

    /// Replace the whole history with `moves` queued for redo, first move
    /// first.
    pub fn load_future(&mut self, moves: impl IntoIterator<Item = Move>) {
        self.played.clear();
        self.undone = moves.into_iter().collect();
        self.undone.reverse();
    }

    pub fn played(&self) -> &[Move] {
        &self.played
    }

    /// Redo buffer, most-recently-undone last.
    pub fn undone(&self) -> &[Move] {
        &self.undone
    }

    pub fn can_undo(&self) -> bool {
        !self.played.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.undone.is_empty()
    }
}
