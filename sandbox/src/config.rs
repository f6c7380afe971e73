//! Configuration for the chess sandbox
//!
//! Data directory precedence:
//! 1. CHESS_SANDBOX_DATA_DIR environment variable
//! 2. ~/.config/chess-sandbox/data (production default)
//! 3. ./data (fallback for development)
//!
//! Engine executable precedence:
//! 1. `--engine` on the command line
//! 2. CHESS_SANDBOX_ENGINE environment variable
//! 3. common install locations (see [`engine::find_stockfish_path`])

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chess::PieceColor;
use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_DIR: &str = ".config/chess-sandbox/data";
const DEV_DATA_DIR: &str = "./data";

pub const DATA_DIR_ENV: &str = "CHESS_SANDBOX_DATA_DIR";
pub const ENGINE_ENV: &str = "CHESS_SANDBOX_ENGINE";

pub const DEFAULT_DEPTH: u8 = 15;
pub const DEFAULT_MULTIPV: u8 = 5;

/// Which side, if any, the engine plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlayMode {
    #[default]
    Manual,
    EngineAsBlack,
    EngineAsWhite,
}

impl PlayMode {
    pub fn engine_side(self) -> Option<PieceColor> {
        match self {
            Self::Manual => None,
            Self::EngineAsBlack => Some(PieceColor::Black),
            Self::EngineAsWhite => Some(PieceColor::White),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::EngineAsBlack => "engine-as-black",
            Self::EngineAsWhite => "engine-as-white",
        }
    }
}

impl std::fmt::Display for PlayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "manual" => Ok(Self::Manual),
            "engine-as-black" | "black" => Ok(Self::EngineAsBlack),
            "engine-as-white" | "white" => Ok(Self::EngineAsWhite),
            other => Err(format!(
                "unknown play mode '{}' (expected manual, engine-as-black or engine-as-white)",
                other
            )),
        }
    }
}

/// Runtime-adjustable session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub mode: PlayMode,
    /// Fixed analysis depth, always at least 1.
    pub depth: u8,
    /// Candidate lines per analysis.
    pub multipv: u8,
    /// Think time for engine auto-play.
    pub engine_movetime: Duration,
    pub hint_movetime: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: PlayMode::Manual,
            depth: DEFAULT_DEPTH,
            multipv: DEFAULT_MULTIPV,
            engine_movetime: Duration::from_millis(1000),
            hint_movetime: Duration::from_millis(500),
        }
    }
}

/// Get the data directory for persistence.
pub fn get_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(DEFAULT_CONFIG_DIR);
    }

    PathBuf::from(DEV_DATA_DIR)
}

/// Resolve the engine executable. None means "search common locations".
pub fn resolve_engine_path(cli: Option<PathBuf>) -> Option<PathBuf> {
    cli.or_else(|| {
        std::env::var(ENGINE_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_mode_parsing() {
        assert_eq!("manual".parse::<PlayMode>(), Ok(PlayMode::Manual));
        assert_eq!(
            "engine-as-black".parse::<PlayMode>(),
            Ok(PlayMode::EngineAsBlack)
        );
        assert_eq!(
            "Engine_As_White".parse::<PlayMode>(),
            Ok(PlayMode::EngineAsWhite)
        );
        assert!("both".parse::<PlayMode>().is_err());
    }

    #[test]
    fn test_play_mode_roundtrips_through_display() {
        for mode in [
            PlayMode::Manual,
            PlayMode::EngineAsBlack,
            PlayMode::EngineAsWhite,
        ] {
            assert_eq!(mode.to_string().parse::<PlayMode>(), Ok(mode));
        }
    }

    #[test]
    fn test_engine_side() {
        assert_eq!(PlayMode::Manual.engine_side(), None);
        assert_eq!(
            PlayMode::EngineAsBlack.engine_side(),
            Some(PieceColor::Black)
        );
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.depth, 15);
        assert_eq!(config.multipv, 5);
        assert_eq!(config.mode, PlayMode::Manual);
    }

    #[test]
    fn test_cli_engine_path_wins() {
        let path = PathBuf::from("/opt/engines/sf");
        assert_eq!(resolve_engine_path(Some(path.clone())), Some(path));
    }

    #[test]
    fn test_get_data_dir_fallback() {
        // Depends on the environment; only check it resolves to something.
        let dir = get_data_dir();
        assert!(!dir.as_os_str().is_empty());
    }
}
