//! Portable Game Notation: SAN moves plus whole-game import and export.

pub mod parser;
pub mod san;
pub mod writer;

pub use parser::{parse_pgn, PgnError, PgnGame};
pub use san::{format_san, parse_san, SanError};
pub use writer::{export_pgn, PgnHeaders};
