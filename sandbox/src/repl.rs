//! Line-oriented front end: parse one command per line, run it against the
//! session, and render the reply as text.

use std::path::PathBuf;

use chess::{
    format_piece_upper, format_square, parse_square, AnalysisScore, GameStatus, Position, Square,
};
use cozy_chess::{Color, File, Rank};

use crate::config::PlayMode;
use crate::persistence::{PersistenceError, PositionStore};
use crate::session::{AnalysisResult, Selection, SessionError, SessionHandle, SessionSnapshot};

pub const HELP: &str = "\
Commands:
  move <san|uci>      play a move (bare move text works too)
  undo | redo         step back / forward through history
  start               go back to the first move (redo steps forward)
  new                 standard starting position, history cleared
  fen <FEN>           load a position, history cleared
  select <square>     click a square: pick a piece, then its destination
  hint                ask the engine for a move without playing it
  mode <mode>         manual | engine-as-black | engine-as-white
  depth <n>           analysis depth (>= 1)
  pgn export [path]   print or write the game as PGN
  pgn import <path>   load a PGN game, rewound to its first move
  save <name>         save the current position
  positions           list saved positions
  open <id>           load a saved position
  status              show the board and game state
  help                this text
  quit                exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Move(String),
    Undo,
    Redo,
    Start,
    New,
    Fen(String),
    Select(Square),
    Hint,
    Mode(PlayMode),
    Depth(u8),
    PgnExport(Option<PathBuf>),
    PgnImport(PathBuf),
    Save(String),
    Positions,
    Open(String),
    Status,
    Help,
    Quit,
}

#[derive(Debug, thiserror::Error)]
pub enum ReplError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No saved position with id '{0}'")]
    UnknownPosition(String),
}

fn usage(text: &str) -> ReplError {
    ReplError::Usage(format!("usage: {}", text))
}

/// Parse one input line. `Ok(None)` for blank lines and `#` comments.
pub fn parse_command(line: &str) -> Result<Option<ReplCommand>, ReplError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let cmd = match word.to_ascii_lowercase().as_str() {
        "move" | "m" if !rest.is_empty() => ReplCommand::Move(rest.to_string()),
        "move" | "m" => return Err(usage("move <san|uci>")),
        "undo" | "u" => ReplCommand::Undo,
        "redo" | "r" => ReplCommand::Redo,
        "start" => ReplCommand::Start,
        "new" | "reset" => ReplCommand::New,
        "fen" | "load" if !rest.is_empty() => ReplCommand::Fen(rest.to_string()),
        "fen" | "load" => return Err(usage("fen <FEN>")),
        "select" | "click" => {
            let square = parse_square(&rest.to_ascii_lowercase())
                .ok_or_else(|| usage("select <square>, e.g. select e2"))?;
            ReplCommand::Select(square)
        }
        "hint" => ReplCommand::Hint,
        "mode" => ReplCommand::Mode(rest.parse().map_err(ReplError::Usage)?),
        "depth" => {
            let depth = rest
                .parse::<u8>()
                .map_err(|_| usage("depth <n>, 1 to 255"))?;
            ReplCommand::Depth(depth)
        }
        "pgn" => {
            let (sub, path) = match rest.split_once(char::is_whitespace) {
                Some((sub, path)) => (sub, path.trim()),
                None => (rest, ""),
            };
            match (sub, path) {
                ("export", "") => ReplCommand::PgnExport(None),
                ("export", path) => ReplCommand::PgnExport(Some(PathBuf::from(path))),
                ("import", path) if !path.is_empty() => ReplCommand::PgnImport(PathBuf::from(path)),
                _ => return Err(usage("pgn export [path] | pgn import <path>")),
            }
        }
        "save" if !rest.is_empty() => ReplCommand::Save(rest.to_string()),
        "save" => return Err(usage("save <name>")),
        "positions" | "list" => ReplCommand::Positions,
        "open" if !rest.is_empty() => ReplCommand::Open(rest.to_string()),
        "open" => return Err(usage("open <id>")),
        "status" | "board" => ReplCommand::Status,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        // Anything else is tried as move text.
        _ => ReplCommand::Move(line.to_string()),
    };
    Ok(Some(cmd))
}

/// What the caller should do after a command.
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue(String),
    Quit,
}

pub struct Repl {
    handle: SessionHandle,
    store: PositionStore,
}

impl Repl {
    pub fn new(handle: SessionHandle, store: PositionStore) -> Self {
        Self { handle, store }
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    pub async fn execute(&self, cmd: ReplCommand) -> Result<Flow, ReplError> {
        let text = match cmd {
            ReplCommand::Move(input) => format_snapshot(&self.handle.make_move(&input).await?),
            ReplCommand::Undo => format_snapshot(&self.handle.undo().await?),
            ReplCommand::Redo => format_snapshot(&self.handle.redo().await?),
            ReplCommand::Start => format_snapshot(&self.handle.goto_start().await?),
            ReplCommand::New => format_snapshot(&self.handle.reset().await?),
            ReplCommand::Fen(fen) => format_snapshot(&self.handle.load(&fen).await?),
            ReplCommand::Select(square) => match self.handle.select_square(square).await? {
                Selection::Picked { from, targets } => {
                    let targets: Vec<String> = targets.into_iter().map(format_square).collect();
                    format!("Picked {}: {}", format_square(from), targets.join(" "))
                }
                Selection::Played(snapshot) => format_snapshot(&snapshot),
            },
            ReplCommand::Hint => {
                let hint = self.handle.hint().await?;
                format!("Hint: {} ({})", hint.san, hint.uci)
            }
            ReplCommand::Mode(mode) => {
                let snapshot = self.handle.set_mode(mode).await?;
                format!("Mode: {} (applies from the next move)", snapshot.mode)
            }
            ReplCommand::Depth(depth) => {
                let snapshot = self.handle.set_depth(depth).await?;
                format!("Depth: {} (applies from the next move)", snapshot.depth)
            }
            ReplCommand::PgnExport(None) => self.handle.export_pgn().await?,
            ReplCommand::PgnExport(Some(path)) => {
                let pgn = self.handle.export_pgn().await?;
                std::fs::write(&path, pgn)?;
                format!("Wrote {}", path.display())
            }
            ReplCommand::PgnImport(path) => {
                let pgn = std::fs::read_to_string(&path)?;
                let snapshot = self.handle.import_pgn(&pgn).await?;
                format!(
                    "Imported {} ({} moves to redo)\n{}",
                    path.display(),
                    snapshot_redo_hint(&snapshot),
                    format_snapshot(&snapshot)
                )
            }
            ReplCommand::Save(name) => {
                let record = self.handle.position_record().await?;
                let saved = self.store.save(&name, &record)?;
                format!("Saved '{}' as {}", saved.name, saved.position_id)
            }
            ReplCommand::Positions => {
                let positions = self.store.list()?;
                if positions.is_empty() {
                    "No saved positions".to_string()
                } else {
                    positions
                        .iter()
                        .map(|p| format!("{}  {}  {}", p.position_id, p.name, p.fen))
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            ReplCommand::Open(id) => {
                let saved = self
                    .store
                    .load(&id)?
                    .ok_or_else(|| ReplError::UnknownPosition(id.clone()))?;
                format_snapshot(&self.handle.load(&saved.fen).await?)
            }
            ReplCommand::Status => {
                let snapshot = self.handle.get_snapshot().await?;
                let mut text = format_snapshot(&snapshot);
                let current = self
                    .handle
                    .latest_analysis()
                    .filter(|a| a.revision == snapshot.revision);
                if let Some(analysis) = current {
                    text.push('\n');
                    text.push_str(&format_analysis(&analysis));
                }
                text
            }
            ReplCommand::Help => HELP.to_string(),
            ReplCommand::Quit => return Ok(Flow::Quit),
        };
        Ok(Flow::Continue(text))
    }
}

fn snapshot_redo_hint(snapshot: &SessionSnapshot) -> &'static str {
    if snapshot.can_redo {
        "use redo"
    } else {
        "none"
    }
}

pub fn status_text(status: GameStatus) -> String {
    match status {
        GameStatus::Ongoing => "ongoing".to_string(),
        GameStatus::Checkmate { winner } => format!("checkmate, {} wins", winner),
        GameStatus::Stalemate => "draw by stalemate".to_string(),
        GameStatus::DrawInsufficientMaterial => "draw by insufficient material".to_string(),
        GameStatus::DrawFiftyMove => "draw by fifty-move rule".to_string(),
    }
}

/// ASCII board, White at the bottom. Uppercase is White.
pub fn render_board(fen: &str) -> Option<String> {
    let position = Position::from_fen(fen).ok()?;
    let board = position.board();
    let mut out = String::new();
    for rank in Rank::ALL.iter().rev() {
        out.push_str(&format!("{} ", *rank as u8 + 1));
        for file in File::ALL {
            let square = Square::new(file, *rank);
            let c = match (board.piece_on(square), board.color_on(square)) {
                (Some(piece), Some(Color::White)) => format_piece_upper(piece),
                (Some(piece), Some(Color::Black)) => format_piece_upper(piece).to_ascii_lowercase(),
                _ => '.',
            };
            out.push(' ');
            out.push(c);
        }
        out.push('\n');
    }
    out.push_str("   a b c d e f g h");
    Some(out)
}

pub fn format_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut lines = Vec::new();
    if let Some(board) = render_board(&snapshot.fen) {
        lines.push(board);
    }
    let mut state = format!(
        "Revision {} | {} to move | {}",
        snapshot.revision,
        snapshot.side_to_move,
        status_text(snapshot.status)
    );
    if snapshot.is_check && snapshot.status.is_ongoing() {
        state.push_str(" | check");
    }
    if let Some(ref last) = snapshot.last_move {
        state.push_str(&format!(" | last {}", last));
    }
    lines.push(state);
    if !snapshot.moves.is_empty() {
        lines.push(format!("Moves: {}", snapshot.moves.join(" ")));
    }
    if snapshot.can_redo {
        lines.push("Redo available".to_string());
    }
    lines.push(format!("FEN: {}", snapshot.fen));
    lines.join("\n")
}

/// Published analysis. The score is shown relative to the side to move,
/// followed by White's view.
/// Twenty-cell bar, filled from White's side.
fn eval_bar(white: AnalysisScore) -> String {
    const CELLS: usize = 20;
    let filled = ((white.bar_fill() / 100.0) * CELLS as f64).round() as usize;
    let filled = filled.min(CELLS);
    format!("[{}{}]", "#".repeat(filled), ".".repeat(CELLS - filled))
}

pub fn format_analysis(result: &AnalysisResult) -> String {
    if !result.status.is_ongoing() {
        return format!(
            "[analysis r{}] {} ({})",
            result.revision,
            status_text(result.status),
            result.score
        );
    }
    let white = result.white_score();
    let mut out = format!(
        "[analysis r{}] depth {} | {} for {} | White {} {}",
        result.revision,
        result.depth,
        result.score,
        result.side_to_move,
        white,
        eval_bar(white)
    );
    if let Some(nodes) = result.nodes {
        out.push_str(&format!(" | {} nodes", nodes));
    }
    if let Some(nps) = result.nps {
        out.push_str(&format!(" | {} kn/s", nps / 1000));
    }
    for line in &result.lines {
        out.push_str("\n  ");
        out.push_str(&line.display_line());
    }
    out
}
