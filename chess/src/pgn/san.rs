use cozy_chess::{Board, File, Move, Piece, Rank, Square};

use crate::converters::{
    format_file, format_piece_upper, format_rank, format_square, parse_file, parse_piece,
    parse_rank, parse_square,
};

/// Parse Standard Algebraic Notation (SAN) move
///
/// The text must name exactly one legal move. Check and annotation suffixes
/// (`+`, `#`, `!`, `?`) are ignored; `0-0` is accepted for `O-O`.
pub fn parse_san(board: &Board, san: &str) -> Result<Move, SanError> {
    let text = san
        .trim()
        .trim_end_matches(|c| matches!(c, '+' | '#' | '!' | '?'));
    if text.is_empty() {
        return Err(SanError::InvalidFormat(san.to_string()));
    }

    let legal = legal_moves(board);

    match text {
        "O-O" | "0-0" => return find_castle(board, &legal, true, san),
        "O-O-O" | "0-0-0" => return find_castle(board, &legal, false, san),
        _ => {}
    }

    let pattern = SanPattern::parse(text).ok_or_else(|| SanError::InvalidFormat(san.to_string()))?;

    let mut candidates = legal
        .iter()
        .copied()
        .filter(|mv| !is_castle(board, *mv) && pattern.matches(board, *mv));

    match (candidates.next(), candidates.next()) {
        (None, _) => Err(SanError::NoLegalMove(san.to_string())),
        (Some(mv), None) => Ok(mv),
        (Some(_), Some(_)) => Err(SanError::AmbiguousMove(san.to_string())),
    }
}

/// Format a legal move as SAN, including the check or mate suffix.
pub fn format_san(board: &Board, mv: Move) -> String {
    let mut san = String::new();

    if is_castle(board, mv) {
        if mv.to.file() as u8 > mv.from.file() as u8 {
            san.push_str("O-O");
        } else {
            san.push_str("O-O-O");
        }
    } else {
        let piece = board.piece_on(mv.from).unwrap_or(Piece::Pawn);
        let capture = is_capture(board, mv, piece);

        if piece == Piece::Pawn {
            if capture {
                san.push(format_file(mv.from.file()));
            }
        } else {
            san.push(format_piece_upper(piece));
            san.push_str(&disambiguation(board, mv, piece));
        }

        if capture {
            san.push('x');
        }
        san.push_str(&format_square(mv.to));

        if let Some(promo) = mv.promotion {
            san.push('=');
            san.push(format_piece_upper(promo));
        }
    }

    let mut after = board.clone();
    if after.try_play(mv).is_ok() && !after.checkers().is_empty() {
        let has_reply = after.generate_moves(|mvs| mvs.into_iter().next().is_some());
        san.push(if has_reply { '+' } else { '#' });
    }

    san
}

/// The pieces of a non-castling SAN move, e.g. "Nbxd2" or "exd8=Q".
#[derive(Debug, PartialEq)]
struct SanPattern {
    piece: Piece,
    from_file: Option<File>,
    from_rank: Option<Rank>,
    capture: bool,
    to: Square,
    promotion: Option<Piece>,
}

impl SanPattern {
    fn parse(text: &str) -> Option<Self> {
        if !text.is_ascii() {
            return None;
        }

        let (body, promotion) = match text.split_once('=') {
            Some((body, promo)) => (body, Some(parse_promotion(promo)?)),
            None => {
                // "e8Q" without the '='
                let last = text.chars().last()?;
                if last.is_ascii_uppercase() && text.len() > 2 {
                    (&text[..text.len() - 1], Some(parse_promotion(&text[text.len() - 1..])?))
                } else {
                    (text, None)
                }
            }
        };

        if body.len() < 2 {
            return None;
        }
        let to = parse_square(&body[body.len() - 2..])?;
        let mut prefix = &body[..body.len() - 2];

        let piece = match prefix.chars().next() {
            Some(c) if c.is_ascii_uppercase() => {
                prefix = &prefix[1..];
                match parse_piece(c)? {
                    Piece::Pawn => return None,
                    p => p,
                }
            }
            _ => Piece::Pawn,
        };

        let capture = prefix.ends_with('x');
        if capture {
            prefix = &prefix[..prefix.len() - 1];
        }

        let mut from_file = None;
        let mut from_rank = None;
        for c in prefix.chars() {
            if let Some(file) = parse_file(c) {
                if from_file.is_some() || from_rank.is_some() {
                    return None;
                }
                from_file = Some(file);
            } else if let Some(rank) = parse_rank(c) {
                if from_rank.is_some() {
                    return None;
                }
                from_rank = Some(rank);
            } else {
                return None;
            }
        }

        if piece == Piece::Pawn
            && (from_rank.is_some()
                || (capture && from_file.is_none())
                || (capture && from_file == Some(to.file())))
        {
            return None;
        }
        if promotion.is_some() && piece != Piece::Pawn {
            return None;
        }

        Some(Self {
            piece,
            from_file,
            from_rank,
            capture,
            to,
            promotion,
        })
    }

    fn matches(&self, board: &Board, mv: Move) -> bool {
        board.piece_on(mv.from) == Some(self.piece)
            && mv.to == self.to
            && mv.promotion == self.promotion
            && self.from_file.map_or(true, |f| mv.from.file() == f)
            && self.from_rank.map_or(true, |r| mv.from.rank() == r)
            && (!self.capture || is_capture(board, mv, self.piece))
    }
}

fn parse_promotion(s: &str) -> Option<Piece> {
    let mut chars = s.chars();
    let piece = parse_piece(chars.next()?)?;
    if chars.next().is_some() {
        return None;
    }
    match piece {
        Piece::Pawn | Piece::King => None,
        p => Some(p),
    }
}

fn find_castle(board: &Board, legal: &[Move], kingside: bool, san: &str) -> Result<Move, SanError> {
    legal
        .iter()
        .copied()
        .find(|mv| {
            is_castle(board, *mv) && ((mv.to.file() as u8 > mv.from.file() as u8) == kingside)
        })
        .ok_or_else(|| SanError::NoLegalMove(san.to_string()))
}

fn is_castle(board: &Board, mv: Move) -> bool {
    board.piece_on(mv.from) == Some(Piece::King)
        && board.color_on(mv.to) == Some(board.side_to_move())
}

fn is_capture(board: &Board, mv: Move, piece: Piece) -> bool {
    let enemy = !board.side_to_move();
    board.color_on(mv.to) == Some(enemy)
        || (piece == Piece::Pawn && mv.from.file() != mv.to.file())
}

/// File, rank or full square needed to tell `mv` apart from other moves of
/// the same piece type to the same square.
fn disambiguation(board: &Board, mv: Move, piece: Piece) -> String {
    let others: Vec<Square> = legal_moves(board)
        .into_iter()
        .filter(|other| {
            other.to == mv.to
                && other.from != mv.from
                && board.piece_on(other.from) == Some(piece)
                && !is_castle(board, *other)
        })
        .map(|other| other.from)
        .collect();

    if others.is_empty() {
        String::new()
    } else if others.iter().all(|sq| sq.file() != mv.from.file()) {
        format_file(mv.from.file()).to_string()
    } else if others.iter().all(|sq| sq.rank() != mv.from.rank()) {
        format_rank(mv.from.rank()).to_string()
    } else {
        format_square(mv.from)
    }
}

fn legal_moves(board: &Board) -> Vec<Move> {
    let mut moves = Vec::new();
    board.generate_moves(|mvs| {
        moves.extend(mvs);
        false
    });
    moves
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SanError {
    #[error("No legal move found for: {0}")]
    NoLegalMove(String),
    #[error("Ambiguous move: {0}")]
    AmbiguousMove(String),
    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uci::format_uci_move;
    use proptest::prelude::*;

    fn board(fen: &str) -> Board {
        fen.parse().unwrap()
    }

    fn uci(board: &Board, san: &str) -> String {
        format_uci_move(parse_san(board, san).unwrap())
    }

    #[test]
    fn test_pawn_and_piece_moves() {
        let b = Board::default();
        assert_eq!(uci(&b, "e4"), "e2e4");
        assert_eq!(uci(&b, "Nf3"), "g1f3");
        assert_eq!(uci(&b, "Nc3!?"), "b1c3");
    }

    #[test]
    fn test_format_initial_moves() {
        let b = Board::default();
        let e4 = parse_san(&b, "e4").unwrap();
        assert_eq!(format_san(&b, e4), "e4");
        let nf3 = parse_san(&b, "Nf3").unwrap();
        assert_eq!(format_san(&b, nf3), "Nf3");
    }

    #[test]
    fn test_ambiguous_knight_move() {
        // knights on b1 and f3 can both reach d2
        let b = board("4k3/8/8/8/8/5N2/8/1N2K3 w - - 0 1");
        assert!(matches!(parse_san(&b, "Nd2"), Err(SanError::AmbiguousMove(_))));
        assert_eq!(uci(&b, "Nbd2"), "b1d2");
        assert_eq!(uci(&b, "Nfd2"), "f3d2");

        let mv = parse_san(&b, "Nbd2").unwrap();
        assert_eq!(format_san(&b, mv), "Nbd2");
    }

    #[test]
    fn test_rank_disambiguation() {
        // rooks on a1 and a5 can both reach a3
        let b = board("4k3/8/8/R7/8/8/8/R3K3 w - - 0 1");
        let mv = parse_san(&b, "R1a3").unwrap();
        assert_eq!(format_uci_move(mv), "a1a3");
        assert_eq!(format_san(&b, mv), "R1a3");
    }

    #[test]
    fn test_captures_and_en_passant() {
        let b = board("rnbqkbnr/ppp1pppp/8/3p4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq d6 0 2");
        let mv = parse_san(&b, "exd5").unwrap();
        assert_eq!(format_uci_move(mv), "e4d5");
        assert_eq!(format_san(&b, mv), "exd5");

        let ep = board("rnbqkbnr/ppp1p1pp/8/3pPp2/8/8/PPPP1PPP/RNBQKBNR w KQkq f6 0 3");
        let mv = parse_san(&ep, "exf6").unwrap();
        assert_eq!(format_uci_move(mv), "e5f6");
        assert_eq!(format_san(&ep, mv), "exf6");
    }

    #[test]
    fn test_capture_marker_must_be_a_capture() {
        let b = Board::default();
        assert!(matches!(parse_san(&b, "Nxf3"), Err(SanError::NoLegalMove(_))));
    }

    #[test]
    fn test_castling() {
        let b = board("r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1");
        let short = parse_san(&b, "O-O").unwrap();
        assert_eq!(format_uci_move(short), "e1h1");
        assert_eq!(format_san(&b, short), "O-O");
        let long = parse_san(&b, "0-0-0").unwrap();
        assert_eq!(format_san(&b, long), "O-O-O");
    }

    #[test]
    fn test_promotion() {
        let b = board("8/4P3/8/8/8/8/k7/4K3 w - - 0 1");
        let mv = parse_san(&b, "e8=Q").unwrap();
        assert_eq!(format_uci_move(mv), "e7e8q");
        assert_eq!(uci(&b, "e8N"), "e7e8n");
        assert!(matches!(parse_san(&b, "e8"), Err(SanError::NoLegalMove(_))));
        assert!(matches!(parse_san(&b, "e8=K"), Err(SanError::InvalidFormat(_))));
    }

    #[test]
    fn test_check_and_mate_suffix() {
        let b = board("rnbqkbnr/pppp1ppp/8/4p3/6P1/5P2/PPPPP2P/RNBQKBNR b KQkq - 0 2");
        let mate = parse_san(&b, "Qh4").unwrap();
        assert_eq!(format_san(&b, mate), "Qh4#");

        let c = board("4k3/8/8/8/8/8/8/R3K3 w - - 0 1");
        let check = parse_san(&c, "Ra8+").unwrap();
        assert_eq!(format_san(&c, check), "Ra8+");
    }

    #[test]
    fn test_garbage_is_invalid_format() {
        let b = Board::default();
        for text in ["hello", "Z4", "e", "Nf", "exe4", "e2-e4", "♞f3"] {
            assert!(
                matches!(parse_san(&b, text), Err(SanError::InvalidFormat(_))),
                "{} should be unparsable",
                text
            );
        }
    }

    proptest! {
        /// Every legal move along a random game prints to SAN that parses
        /// back to the same move.
        #[test]
        fn prop_san_identifies_each_legal_move(choices in prop::collection::vec(any::<prop::sample::Index>(), 0..40)) {
            let mut b = Board::default();
            for choice in choices {
                let moves = legal_moves(&b);
                if moves.is_empty() {
                    break;
                }
                for mv in &moves {
                    let san = format_san(&b, *mv);
                    prop_assert_eq!(parse_san(&b, &san), Ok(*mv));
                }
                b.play(*choice.get(&moves));
            }
        }
    }
}
