use cozy_chess::Move;

use crate::position::Position;

/// Seven-tag-roster values that are not derived from the game itself.
#[derive(Debug, Clone)]
pub struct PgnHeaders {
    pub event: String,
    pub site: String,
    /// `YYYY.MM.DD`
    pub date: String,
    pub white: String,
    pub black: String,
}

impl Default for PgnHeaders {
    fn default() -> Self {
        Self {
            event: "Chess Sandbox".to_string(),
            site: "?".to_string(),
            date: "????.??.??".to_string(),
            white: "Player 1".to_string(),
            black: "Player 2".to_string(),
        }
    }
}

const LINE_WIDTH: usize = 80;

/// Render a game as PGN.
///
/// `moves` must be legal in sequence from `start`; rendering stops at the
/// first move that is not. The Result tag comes from the final position.
pub fn export_pgn(headers: &PgnHeaders, start: &Position, moves: &[Move]) -> String {
    let mut tokens = Vec::with_capacity(moves.len() * 3 / 2 + 1);
    let mut position = start.clone();

    for (i, mv) in moves.iter().enumerate() {
        let white_to_move = position.side_to_move() == crate::PieceColor::White;
        if white_to_move {
            tokens.push(format!("{}.", position.fullmove_number()));
        } else if i == 0 {
            tokens.push(format!("{}...", position.fullmove_number()));
        }
        let san = position.san(*mv);
        match position.apply(*mv) {
            Ok(next) => {
                tokens.push(san);
                position = next;
            }
            Err(_) => break,
        }
    }

    let result = position.status().result_token();
    tokens.push(result.to_string());

    let mut out = String::new();
    for (name, value) in [
        ("Event", headers.event.as_str()),
        ("Site", headers.site.as_str()),
        ("Date", headers.date.as_str()),
        ("White", headers.white.as_str()),
        ("Black", headers.black.as_str()),
        ("Result", result),
    ] {
        push_tag(&mut out, name, value);
    }
    if *start != Position::initial() {
        push_tag(&mut out, "SetUp", "1");
        push_tag(&mut out, "FEN", &start.to_fen());
    }
    out.push('\n');

    let mut line_len = 0;
    for token in tokens {
        if line_len > 0 && line_len + 1 + token.len() > LINE_WIDTH {
            out.push('\n');
            line_len = 0;
        } else if line_len > 0 {
            out.push(' ');
            line_len += 1;
        }
        out.push_str(&token);
        line_len += token.len();
    }
    out.push('\n');
    out
}

fn push_tag(out: &mut String, name: &str, value: &str) {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    out.push_str(&format!("[{} \"{}\"]\n", name, escaped));
}
