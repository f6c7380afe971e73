//! String conversions for squares and pieces.

use cozy_chess::{File, Piece, Rank, Square};

pub fn format_square(sq: Square) -> String {
    let file = (b'a' + sq.file() as u8) as char;
    let rank = (b'1' + sq.rank() as u8) as char;
    format!("{}{}", file, rank)
}

/// Parse a square like "e4". Returns None for anything else.
pub fn parse_square(s: &str) -> Option<Square> {
    let mut chars = s.chars();
    let file = parse_file(chars.next()?)?;
    let rank = parse_rank(chars.next()?)?;
    if chars.next().is_some() {
        return None;
    }
    Some(Square::new(file, rank))
}

pub fn parse_file(c: char) -> Option<File> {
    match c {
        'a'..='h' => File::ALL.get((c as u8 - b'a') as usize).copied(),
        _ => None,
    }
}

pub fn parse_rank(c: char) -> Option<Rank> {
    match c {
        '1'..='8' => Rank::ALL.get((c as u8 - b'1') as usize).copied(),
        _ => None,
    }
}

pub fn format_file(file: File) -> char {
    (b'a' + file as u8) as char
}

pub fn format_rank(rank: Rank) -> char {
    (b'1' + rank as u8) as char
}

/// Lowercase piece letter, as used in UCI promotions.
pub fn format_piece(p: Piece) -> char {
    format_piece_upper(p).to_ascii_lowercase()
}

/// Uppercase piece letter, as used in SAN.
pub fn format_piece_upper(p: Piece) -> char {
    match p {
        Piece::Pawn => 'P',
        Piece::Knight => 'N',
        Piece::Bishop => 'B',
        Piece::Rook => 'R',
        Piece::Queen => 'Q',
        Piece::King => 'K',
    }
}

/// Parse a piece letter in either case.
pub fn parse_piece(c: char) -> Option<Piece> {
    match c.to_ascii_lowercase() {
        'p' => Some(Piece::Pawn),
        'n' => Some(Piece::Knight),
        'b' => Some(Piece::Bishop),
        'r' => Some(Piece::Rook),
        'q' => Some(Piece::Queen),
        'k' => Some(Piece::King),
        _ => None,
    }
}
