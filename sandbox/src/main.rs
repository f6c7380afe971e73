use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chess::Position;
use clap::Parser;
use engine::{EngineConfig, StockfishEngine};
use sandbox::config::{self, PlayMode, SessionConfig, DEFAULT_DEPTH};
use sandbox::persistence::PositionStore;
use sandbox::repl::{format_analysis, format_snapshot, parse_command, Flow, Repl, HELP};
use sandbox::session::{Revision, SessionEvent, SessionHandle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Interactive chess analysis sandbox backed by a UCI engine.
#[derive(Parser, Debug)]
#[command(name = "chess-sandbox", version, about)]
struct Cli {
    /// Engine executable (else $CHESS_SANDBOX_ENGINE, else common locations)
    #[arg(long)]
    engine: Option<PathBuf>,

    /// Analysis depth
    #[arg(long, default_value_t = DEFAULT_DEPTH, value_parser = clap::value_parser!(u8).range(1..))]
    depth: u8,

    /// manual, engine-as-black or engine-as-white
    #[arg(long, default_value_t = PlayMode::Manual)]
    mode: PlayMode,

    /// Engine think time per auto-played move
    #[arg(long, default_value_t = 1000)]
    movetime_ms: u64,

    #[arg(long)]
    threads: Option<u32>,

    #[arg(long)]
    hash_mb: Option<u32>,

    /// Start from this position instead of the standard one
    #[arg(long)]
    fen: Option<String>,

    /// Write logs to daily rolling files here instead of stderr
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_dir.as_deref());

    tracing::info!("Chess sandbox starting up");

    let start = match cli.fen.as_deref() {
        Some(fen) => Position::from_fen(fen).context("invalid --fen")?,
        None => Position::initial(),
    };

    let engine = StockfishEngine::spawn(EngineConfig {
        path: config::resolve_engine_path(cli.engine),
        threads: cli.threads,
        hash_mb: cli.hash_mb,
        ..EngineConfig::default()
    })
    .await
    .context("failed to start the engine")?;

    let session_config = SessionConfig {
        mode: cli.mode,
        depth: cli.depth,
        engine_movetime: Duration::from_millis(cli.movetime_ms.max(1)),
        ..SessionConfig::default()
    };
    let handle = sandbox::spawn_session(Arc::new(engine), start, session_config);

    let data_dir = config::get_data_dir();
    tracing::info!("Using data directory: {}", data_dir.display());
    let repl = Repl::new(handle.clone(), PositionStore::new(data_dir));

    spawn_printers(&handle).await?;

    println!("{}", HELP);
    println!("{}", format_snapshot(&handle.get_snapshot().await?));

    run(&repl).await?;

    repl.handle().shutdown().await;
    tracing::info!("Chess sandbox exited");
    Ok(())
}

/// Read commands from stdin until `quit`, EOF or Ctrl-C.
async fn run(repl: &Repl) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };

        let cmd = match parse_command(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        match repl.execute(cmd).await {
            Ok(Flow::Continue(text)) => println!("{}", text),
            Ok(Flow::Quit) => return Ok(()),
            Err(e) => println!("Error: {}", e),
        }
    }
}

/// Print published analysis and engine activity as it arrives.
async fn spawn_printers(handle: &SessionHandle) -> anyhow::Result<()> {
    let mut analysis = handle.subscribe_analysis();
    tokio::spawn(async move {
        while analysis.changed().await.is_ok() {
            let latest = analysis.borrow_and_update().clone();
            if let Some(result) = latest {
                println!("{}", format_analysis(&result));
            }
        }
    });

    let (_, mut events) = handle.subscribe().await?;
    tokio::spawn(async move {
        let mut engine_pending = None;
        loop {
            match events.recv().await {
                Ok(SessionEvent::EngineThinking(revision)) => {
                    println!("Engine is thinking...");
                    engine_pending = Some(revision);
                }
                Ok(SessionEvent::StateChanged(snapshot)) => {
                    // Command replies are printed by the REPL; only show
                    // the position the engine's own move produced.
                    let after_engine_move = engine_pending
                        .is_some_and(|r: Revision| snapshot.revision.value() == r.value() + 1)
                        && snapshot.mode.engine_side() != Some(snapshot.side_to_move);
                    if after_engine_move {
                        println!("Engine played {}", snapshot.moves.last().map_or("?", |m| m));
                        println!("{}", format_snapshot(&snapshot));
                    }
                    engine_pending = None;
                }
                Ok(SessionEvent::Error(message)) => println!("Engine error: {}", message),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Event printer lagged by {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    Ok(())
}

/// Stderr by default; daily rolling files under `log_dir` when given.
fn init_tracing(log_dir: Option<&std::path::Path>) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "chess-sandbox");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::registry()
                .with(
                    fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true)
                        .with_line_number(true),
                )
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}
