use crate::uci::{format_position_command, parse_uci_message, UciMessage};
use crate::{AnalysisReport, EngineError, EngineSession, GoParams};
use async_trait::async_trait;
use cozy_chess::Move;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, Mutex};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// A Stockfish process driven over UCI.
///
/// Requests are served strictly one at a time: each takes the I/O lock,
/// drains anything left over from an earlier request, synchronises with
/// `isready`, and only then sends `position`/`go`. An engine that does not
/// answer `stop` after a timed-out search is not used again.
pub struct StockfishEngine {
    label: String,
    search_timeout: Duration,
    io: Mutex<Option<UciIo>>,
    process: Mutex<Option<Child>>,
}

struct UciIo {
    stdin: ChildStdin,
    lines: mpsc::Receiver<UciMessage>,
    multipv: u8,
}

/// Configuration for engine performance tuning.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Executable; searched for with [`find_stockfish_path`] when unset.
    pub path: Option<PathBuf>,
    pub skill_level: Option<u8>,
    pub threads: Option<u32>,
    pub hash_mb: Option<u32>,
    pub label: String,
    /// Upper bound on a single search before it is stopped.
    pub search_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: None,
            skill_level: None,
            threads: None,
            hash_mb: None,
            label: "stockfish".to_string(),
            search_timeout: Duration::from_secs(120),
        }
    }
}

impl StockfishEngine {
    /// Spawn a new Stockfish instance and complete the UCI handshake.
    #[tracing::instrument(level = "info", skip(config), fields(label = %config.label))]
    pub async fn spawn(config: EngineConfig) -> Result<Self, EngineError> {
        tracing::info!("Starting engine spawn (config: {:?})", config);
        let path = match config.path.clone() {
            Some(path) => path,
            None => find_stockfish_path()
                .ok_or_else(|| EngineError::Unavailable("Stockfish not found".to_string()))?,
        };
        tracing::info!("Using engine at: {:?}", path);

        let mut process = tokio::process::Command::new(&path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!("Failed to spawn engine: {}", e);
                EngineError::Unavailable(format!("failed to spawn {}: {}", path.display(), e))
            })?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine has no stdin".to_string()))?;
        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine has no stdout".to_string()))?;

        let (line_tx, line_rx) = mpsc::channel::<UciMessage>(256);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        tracing::trace!("UCI << {}", trimmed);
                        match parse_uci_message(trimmed) {
                            Ok(msg) => {
                                if line_tx.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => tracing::trace!("Ignoring engine output: {}", e),
                        }
                    }
                    Ok(None) => {
                        tracing::warn!("Engine stdout EOF - engine closed");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("Error reading from engine stdout: {}", e);
                        break;
                    }
                }
            }
            tracing::debug!("Output reader task exiting");
        });

        let mut io = UciIo {
            stdin,
            lines: line_rx,
            multipv: 1,
        };

        io.send("uci\n").await?;
        io.wait_for(HANDSHAKE_TIMEOUT, |msg| match msg {
            UciMessage::Id { name, value } => {
                tracing::info!("Engine id {}: {}", name, value);
                None
            }
            UciMessage::UciOk => Some(()),
            _ => None,
        })
        .await?;

        if let Some(level) = config.skill_level {
            tracing::info!("Setting skill level to {}", level);
            io.send(&format!("setoption name Skill Level value {}\n", level.min(20)))
                .await?;
        }
        if let Some(threads) = config.threads {
            let threads = threads.clamp(1, 16);
            tracing::info!("Setting Threads to {}", threads);
            io.send(&format!("setoption name Threads value {}\n", threads))
                .await?;
        }
        if let Some(hash_mb) = config.hash_mb {
            let hash_mb = hash_mb.clamp(1, 2048);
            tracing::info!("Setting Hash to {} MB", hash_mb);
            io.send(&format!("setoption name Hash value {}\n", hash_mb))
                .await?;
        }
        io.sync().await?;

        tracing::info!("Engine spawned and initialized successfully");
        Ok(Self {
            label: config.label,
            search_timeout: config.search_timeout,
            io: Mutex::new(Some(io)),
            process: Mutex::new(Some(process)),
        })
    }

    /// Run one `position` + `go` exchange under the I/O lock, feeding every
    /// info line to `on_info`. Returns the `bestmove` payload.
    async fn search(
        &self,
        fen: &str,
        go: GoParams,
        multipv: u8,
        mut on_info: impl FnMut(&crate::EngineInfo) + Send,
    ) -> Result<Option<Move>, EngineError> {
        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or_else(|| {
            EngineError::Unavailable("engine has been shut down or stopped responding".to_string())
        })?;

        io.drain();
        if io.multipv != multipv {
            io.send(&format!("setoption name MultiPV value {}\n", multipv))
                .await?;
            io.multipv = multipv;
        }
        io.sync().await?;

        io.send(&format_position_command(fen, &[])).await?;
        io.send(&go.to_command()).await?;

        let result = io
            .wait_for(self.search_timeout, |msg| match msg {
                UciMessage::Info(info) => {
                    on_info(&info);
                    None
                }
                UciMessage::BestMove { mv, .. } => Some(mv),
                _ => None,
            })
            .await;

        if let Err(WaitError::TimedOut(limit)) = result {
            tracing::warn!("Search timed out after {:?}, stopping", limit);
            // isready does not wait for a running search; a late bestmove
            // would answer the next request.
            let stopped = match io.send("stop\n").await {
                Ok(()) => io
                    .wait_for(SHUTDOWN_GRACE, |msg| {
                        matches!(msg, UciMessage::BestMove { .. }).then_some(())
                    })
                    .await
                    .is_ok(),
                Err(_) => false,
            };
            if !stopped {
                tracing::error!("Engine did not answer stop, dropping its I/O");
                *guard = None;
            }
        }
        Ok(result?)
    }
}

impl UciIo {
    async fn send(&mut self, cmd: &str) -> Result<(), EngineError> {
        tracing::trace!("UCI >> {}", cmd.trim());
        self.stdin
            .write_all(cmd.as_bytes())
            .await
            .map_err(|e| EngineError::Unavailable(format!("failed to write to engine: {}", e)))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| EngineError::Unavailable(format!("failed to flush engine stdin: {}", e)))
    }

    /// Throw away output left over from an earlier, abandoned request.
    fn drain(&mut self) {
        let mut dropped = 0usize;
        while self.lines.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!("Drained {} stale engine messages", dropped);
        }
    }

    /// `isready` / `readyok` round trip.
    async fn sync(&mut self) -> Result<(), EngineError> {
        self.send("isready\n").await?;
        self.wait_for(HANDSHAKE_TIMEOUT, |msg| {
            matches!(msg, UciMessage::ReadyOk).then_some(())
        })
        .await?;
        Ok(())
    }

    /// Read messages until `pick` returns a value.
    async fn wait_for<T>(
        &mut self,
        limit: Duration,
        mut pick: impl FnMut(UciMessage) -> Option<T>,
    ) -> Result<T, WaitError> {
        let lines = &mut self.lines;
        let waited = tokio::time::timeout(limit, async {
            while let Some(msg) = lines.recv().await {
                if let Some(value) = pick(msg) {
                    return Ok(value);
                }
            }
            Err(WaitError::Closed)
        })
        .await;

        waited.unwrap_or(Err(WaitError::TimedOut(limit)))
    }
}

#[derive(Debug)]
enum WaitError {
    Closed,
    TimedOut(Duration),
}

impl From<WaitError> for EngineError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::Closed => Self::Unavailable("engine process exited".to_string()),
            WaitError::TimedOut(limit) => {
                Self::Unavailable(format!("no answer from engine within {:?}", limit))
            }
        }
    }
}

#[async_trait]
impl EngineSession for StockfishEngine {
    fn name(&self) -> &str {
        &self.label
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn best_move(&self, fen: &str, params: GoParams) -> Result<Option<Move>, EngineError> {
        let mv = self.search(fen, params, 1, |_| {}).await?;
        tracing::debug!("Received bestmove: {:?}", mv);
        Ok(mv)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn analyse(
        &self,
        fen: &str,
        depth: u8,
        multipv: u8,
    ) -> Result<AnalysisReport, EngineError> {
        let mut report = AnalysisReport::default();
        let best = self
            .search(fen, GoParams::depth(depth.max(1)), multipv.max(1), |info| {
                report.absorb(info)
            })
            .await?;

        if best.is_some() && report.lines.is_empty() {
            return Err(EngineError::Protocol(
                "search finished without a scored line".to_string(),
            ));
        }
        tracing::debug!("Analysis finished with {} lines", report.lines.len());
        Ok(report)
    }

    async fn shutdown(&self) {
        if let Some(mut io) = self.io.lock().await.take() {
            if let Err(e) = io.send("quit\n").await {
                tracing::debug!("Engine already gone: {}", e);
            }
        }
        if let Some(mut process) = self.process.lock().await.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, process.wait())
                .await
                .is_err()
            {
                tracing::warn!("Engine did not exit after quit, killing it");
                if let Err(e) = process.kill().await {
                    tracing::error!("Failed to kill engine: {}", e);
                }
            }
        }
        tracing::info!("Engine shut down");
    }
}

/// Find Stockfish executable in common locations
pub fn find_stockfish_path() -> Option<PathBuf> {
    let paths = [
        "/usr/local/bin/stockfish",
        "/usr/bin/stockfish",
        "/opt/homebrew/bin/stockfish",
        "/usr/games/stockfish",
        "stockfish", // In PATH
    ];

    paths.into_iter().find_map(|path_str| {
        let path = Path::new(path_str);
        let candidate = path.exists() || path_str == "stockfish";
        // stockfish runs the arguments as commands and exits
        let runs = candidate
            && std::process::Command::new(path_str)
                .arg("quit")
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .status()
                .is_ok();
        runs.then(|| PathBuf::from(path_str))
    })
}
