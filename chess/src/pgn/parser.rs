use cozy_chess::Move;

use crate::fen::FenError;
use crate::position::Position;

use super::san::{parse_san, SanError};

/// A parsed PGN game: its tag pairs, starting position and mainline.
#[derive(Debug, Clone)]
pub struct PgnGame {
    /// Tag pairs in file order.
    pub tags: Vec<(String, String)>,
    pub start: Position,
    pub moves: Vec<Move>,
    /// Result token from the movetext, if any.
    pub result: Option<String>,
}

impl PgnGame {
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PgnError {
    #[error("PGN contains no game")]
    Empty,
    #[error("Invalid tag: {0}")]
    InvalidTag(String),
    #[error("Unterminated {0}")]
    Unterminated(&'static str),
    #[error("Invalid FEN tag: {0}")]
    InvalidFen(#[from] FenError),
    #[error("Move {ply} ({san}): {source}")]
    BadMove {
        ply: usize,
        san: String,
        #[source]
        source: SanError,
    },
}

const RESULT_TOKENS: [&str; 4] = ["1-0", "0-1", "1/2-1/2", "*"];

/// Parse the first game of a PGN text.
///
/// Comments, NAGs and variations are skipped; only the mainline is kept.
/// Each SAN move is resolved against the running position, so the returned
/// moves are all legal in sequence.
pub fn parse_pgn(input: &str) -> Result<PgnGame, PgnError> {
    let mut tags = Vec::new();
    let mut movetext = String::new();

    for line in input.lines() {
        let line = line.trim();
        if line.starts_with('[') && movetext.trim().is_empty() {
            tags.push(parse_tag(line)?);
        } else if !line.starts_with('%') {
            movetext.push_str(line);
            movetext.push('\n');
        }
    }

    let start = match tags.iter().find(|(key, _)| key == "FEN") {
        Some((_, fen)) => Position::from_fen(fen).map_err(|e| match e {
            crate::GameError::InvalidEncoding(fen_err) => PgnError::InvalidFen(fen_err),
            other => PgnError::InvalidTag(other.to_string()),
        })?,
        None => Position::initial(),
    };

    let tokens = tokenize_movetext(&movetext)?;
    if tags.is_empty() && tokens.is_empty() {
        return Err(PgnError::Empty);
    }

    let mut position = start.clone();
    let mut moves = Vec::new();
    let mut result = None;

    for token in tokens {
        if RESULT_TOKENS.contains(&token.as_str()) {
            result = Some(token);
            break;
        }
        let mv = parse_san(position.board(), &token).map_err(|source| PgnError::BadMove {
            ply: moves.len() + 1,
            san: token.clone(),
            source,
        })?;
        position = position
            .apply(mv)
            .map_err(|_| PgnError::BadMove {
                ply: moves.len() + 1,
                san: token.clone(),
                source: SanError::NoLegalMove(token.clone()),
            })?;
        moves.push(mv);
    }

    Ok(PgnGame {
        tags,
        start,
        moves,
        result,
    })
}

/// `[Name "Value"]` with `\"` and `\\` escapes in the value.
fn parse_tag(line: &str) -> Result<(String, String), PgnError> {
    let invalid = || PgnError::InvalidTag(line.to_string());

    let inner = line
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(invalid)?
        .trim();
    let (name, rest) = inner.split_once(char::is_whitespace).ok_or_else(invalid)?;
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(invalid());
    }

    let quoted = rest
        .trim()
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .ok_or_else(invalid)?;

    let mut value = String::with_capacity(quoted.len());
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(escaped @ ('"' | '\\')) => value.push(escaped),
                _ => return Err(invalid()),
            }
        } else {
            value.push(c);
        }
    }

    Ok((name.to_string(), value))
}

/// Split movetext into SAN and result tokens, dropping move numbers,
/// comments, NAGs and (possibly nested) variations.
fn tokenize_movetext(text: &str) -> Result<Vec<String>, PgnError> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut variation_depth = 0usize;
    let mut chars = text.chars();

    let flush = |current: &mut String, tokens: &mut Vec<String>, in_variation: bool| {
        if !in_variation {
            if let Some(token) = clean_token(current) {
                tokens.push(token);
            }
        }
        current.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '{' => {
                flush(&mut current, &mut tokens, variation_depth > 0);
                if !chars.by_ref().any(|c| c == '}') {
                    return Err(PgnError::Unterminated("comment"));
                }
            }
            ';' => {
                flush(&mut current, &mut tokens, variation_depth > 0);
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '(' => {
                flush(&mut current, &mut tokens, variation_depth > 0);
                variation_depth += 1;
            }
            ')' => {
                flush(&mut current, &mut tokens, variation_depth > 0);
                variation_depth = variation_depth.saturating_sub(1);
            }
            c if c.is_whitespace() => flush(&mut current, &mut tokens, variation_depth > 0),
            c => current.push(c),
        }
    }
    flush(&mut current, &mut tokens, variation_depth > 0);

    if variation_depth > 0 {
        return Err(PgnError::Unterminated("variation"));
    }
    Ok(tokens)
}

/// Strip a leading move number ("12." / "12...") and drop NAGs.
fn clean_token(raw: &str) -> Option<String> {
    if raw.is_empty() || raw.starts_with('$') {
        return None;
    }
    if RESULT_TOKENS.contains(&raw) {
        return Some(raw.to_string());
    }
    let without_number = raw.trim_start_matches(|c: char| c.is_ascii_digit());
    let san = if without_number.len() < raw.len() && without_number.starts_with('.') {
        without_number.trim_start_matches('.')
    } else {
        raw
    };
    (!san.is_empty()).then(|| san.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uci::format_uci_move;

    fn uci_moves(game: &PgnGame) -> Vec<String> {
        game.moves.iter().map(|mv| format_uci_move(*mv)).collect()
    }

    #[test]
    fn test_parse_simple_game() {
        let pgn = r#"[Event "Casual"]
[White "A"]
[Black "B"]
[Result "1-0"]

1. e4 e5 2. Nf3 Nc6 3. Bb5 a6 1-0
"#;
        let game = parse_pgn(pgn).unwrap();
        assert_eq!(game.tag("Event"), Some("Casual"));
        assert_eq!(game.tags.len(), 4);
        assert_eq!(
            uci_moves(&game),
            vec!["e2e4", "e7e5", "g1f3", "b8c6", "f1b5", "a7a6"]
        );
        assert_eq!(game.result.as_deref(), Some("1-0"));
        assert_eq!(game.start, Position::initial());
    }

    #[test]
    fn test_skips_comments_nags_and_variations() {
        let pgn = "1.e4 {best by test} e5 $1 2. Nf3 (2. f4 exf4 (2... d5)) 2... Nc6 ; rest\n3. Bc4 *";
        let game = parse_pgn(pgn).unwrap();
        assert_eq!(
            uci_moves(&game),
            vec!["e2e4", "e7e5", "g1f3", "b8c6", "f1c4"]
        );
        assert_eq!(game.result.as_deref(), Some("*"));
    }

    #[test]
    fn test_fen_tag_sets_start_position() {
        let pgn = r#"[SetUp "1"]
[FEN "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1"]

1. e4 Kd7 *"#;
        let game = parse_pgn(pgn).unwrap();
        assert_eq!(game.start.to_fen(), "4k3/8/8/8/8/8/4P3/4K3 w - - 0 1");
        assert_eq!(uci_moves(&game), vec!["e2e4", "e8d7"]);
    }

    #[test]
    fn test_escaped_tag_value() {
        let (name, value) = parse_tag(r#"[Annotator "A \"quoted\" name \\ x"]"#).unwrap();
        assert_eq!(name, "Annotator");
        assert_eq!(value, r#"A "quoted" name \ x"#);
    }

    #[test]
    fn test_illegal_move_reports_ply() {
        let err = parse_pgn("1. e4 e5 2. Ke3 *").unwrap_err();
        match err {
            PgnError::BadMove { ply, san, .. } => {
                assert_eq!(ply, 3);
                assert_eq!(san, "Ke3");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_input() {
        assert_eq!(parse_pgn("   \n  ").unwrap_err(), PgnError::Empty);
        assert!(matches!(
            parse_pgn("[Event Casual]\n1. e4"),
            Err(PgnError::InvalidTag(_))
        ));
        assert_eq!(
            parse_pgn("1. e4 {never closed").unwrap_err(),
            PgnError::Unterminated("comment")
        );
        assert!(matches!(
            parse_pgn("[FEN \"garbage\"]\n*"),
            Err(PgnError::InvalidFen(_))
        ));
    }
}
