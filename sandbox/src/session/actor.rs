use std::sync::Arc;

use chess::{format_uci_move, to_standard_uci};
use engine::{EngineSession, GoParams};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::Instrument;

use super::commands::{Hint, SessionCommand, SessionError};
use super::coordinator::AnalysisCoordinator;
use super::events::SessionEvent;
use super::opponent::{OpponentDriver, OpponentReply};
use super::snapshot::SessionSnapshot;
use super::state::SessionState;

/// Everything the actor loop owns besides the session state itself.
pub(crate) struct ActorParts {
    pub engine: Arc<dyn EngineSession>,
    pub coordinator: AnalysisCoordinator,
    pub opponent: OpponentDriver,
    pub replies_rx: mpsc::Receiver<OpponentReply>,
    pub event_tx: broadcast::Sender<SessionEvent>,
}

/// The main session actor loop.
/// Owns all mutable state. Processes commands and engine moves sequentially.
pub(crate) async fn run_session_actor(
    state: SessionState,
    parts: ActorParts,
    cmd_rx: mpsc::Receiver<SessionCommand>,
) {
    let session_id = state.session_id.clone();
    run_session_actor_inner(state, parts, cmd_rx)
        .instrument(tracing::info_span!("session", id = %session_id))
        .await;
}

async fn run_session_actor_inner(
    mut state: SessionState,
    mut parts: ActorParts,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
) {
    tracing::info!("Session actor started");

    // Analyse the starting position, and let the engine open if it plays White.
    trigger_background(&state, &parts);

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Shutdown { reply }) => {
                        tracing::info!("Session actor shutting down");
                        parts.engine.shutdown().await;
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        tracing::info!("All handles dropped, shutting down");
                        parts.engine.shutdown().await;
                        break;
                    }
                    Some(cmd) => handle_command(&mut state, &parts, cmd),
                }
            }

            Some(reply) = parts.replies_rx.recv() => {
                handle_opponent_reply(&mut state, &parts, reply);
            }
        }
    }

    tracing::info!("Session actor exited");
}

fn handle_command(state: &mut SessionState, parts: &ActorParts, cmd: SessionCommand) {
    match cmd {
        SessionCommand::MakeMove { input, reply } => {
            let result = state.make_move(&input).map(|mv| {
                tracing::debug!("Played {}", format_uci_move(mv));
                after_mutation(state, parts)
            });
            if let Err(ref e) = result {
                tracing::debug!("Rejected move '{}': {}", input, e);
            }
            let _ = reply.send(result);
        }
        SessionCommand::SelectSquare { square, reply } => {
            let result = state.select_square(square);
            if let Ok(super::commands::Selection::Played(_)) = result {
                after_mutation(state, parts);
            }
            let _ = reply.send(result);
        }
        SessionCommand::Undo { reply } => {
            let result = state
                .undo()
                .map(|undone| mutated_or_current(state, parts, undone.is_some()));
            let _ = reply.send(result);
        }
        SessionCommand::Redo { reply } => {
            let result = state
                .redo()
                .map(|redone| mutated_or_current(state, parts, redone.is_some()));
            let _ = reply.send(result);
        }
        SessionCommand::GotoStart { reply } => {
            let changed = state.goto_start();
            let _ = reply.send(mutated_or_current(state, parts, changed));
        }
        SessionCommand::Reset { reply } => {
            state.reset();
            let _ = reply.send(after_mutation(state, parts));
        }
        SessionCommand::Load { fen, reply } => {
            let result = state.load(&fen).map(|()| after_mutation(state, parts));
            let _ = reply.send(result);
        }
        SessionCommand::ImportPgn { pgn, reply } => {
            let result = state.import_pgn(&pgn).map(|count| {
                tracing::info!("Imported PGN with {} moves", count);
                after_mutation(state, parts)
            });
            let _ = reply.send(result);
        }
        SessionCommand::ExportPgn { reply } => {
            let date = chrono::Local::now().format("%Y.%m.%d").to_string();
            let _ = reply.send(state.export_pgn(&date));
        }
        SessionCommand::SetMode { mode, reply } => {
            tracing::info!("Play mode set to {}", mode);
            state.set_mode(mode);
            let snapshot = state.snapshot();
            let _ = parts
                .event_tx
                .send(SessionEvent::StateChanged(snapshot.clone()));
            let _ = reply.send(snapshot);
        }
        SessionCommand::SetDepth { depth, reply } => {
            let result = state.set_depth(depth).map(|()| {
                tracing::info!("Analysis depth set to {}", depth);
                let snapshot = state.snapshot();
                let _ = parts
                    .event_tx
                    .send(SessionEvent::StateChanged(snapshot.clone()));
                snapshot
            });
            let _ = reply.send(result);
        }
        SessionCommand::Hint { reply } => request_hint(state, parts, reply),
        SessionCommand::GetSnapshot { reply } => {
            let _ = reply.send(state.snapshot());
        }
        SessionCommand::GetPositionRecord { reply } => {
            let _ = reply.send(state.position_record());
        }
        SessionCommand::Subscribe { reply } => {
            let snapshot = state.snapshot();
            let rx = parts.event_tx.subscribe();
            let _ = reply.send((snapshot, rx));
        }
        SessionCommand::Shutdown { .. } => unreachable!("handled by the actor loop"),
    }
}

/// Broadcast the new state and fire the background work for it.
fn after_mutation(state: &SessionState, parts: &ActorParts) -> SessionSnapshot {
    let snapshot = state.snapshot();
    let _ = parts
        .event_tx
        .send(SessionEvent::StateChanged(snapshot.clone()));
    trigger_background(state, parts);
    snapshot
}

fn mutated_or_current(state: &SessionState, parts: &ActorParts, changed: bool) -> SessionSnapshot {
    if changed {
        after_mutation(state, parts)
    } else {
        state.snapshot()
    }
}

/// The engine move goes first: engine requests are served in arrival order.
fn trigger_background(state: &SessionState, parts: &ActorParts) {
    let config = state.config();
    if parts.opponent.maybe_move(
        state.position(),
        state.revision(),
        config.mode,
        config.engine_movetime,
    ) {
        let _ = parts
            .event_tx
            .send(SessionEvent::EngineThinking(state.revision()));
    }

    parts
        .coordinator
        .request_analysis(state.position(), state.revision(), config.depth);
}

fn handle_opponent_reply(state: &mut SessionState, parts: &ActorParts, reply: OpponentReply) {
    if reply.revision != state.revision() {
        tracing::debug!(
            "Discarding engine move for revision {} (now at {})",
            reply.revision,
            state.revision()
        );
        return;
    }

    let mv = match reply.result {
        Ok(Some(mv)) => mv,
        Ok(None) => {
            tracing::debug!("Engine reported no legal move");
            return;
        }
        Err(e) => {
            tracing::warn!("Engine move failed: {}", e);
            let _ = parts
                .event_tx
                .send(SessionEvent::Error(format!("Engine move failed: {}", e)));
            return;
        }
    };

    let Some(resolved) = state.position().resolve_uci_move(mv) else {
        tracing::error!("Engine suggested illegal move: {}", format_uci_move(mv));
        let _ = parts.event_tx.send(SessionEvent::Error(format!(
            "Engine suggested illegal move: {}",
            format_uci_move(mv)
        )));
        return;
    };

    match state.apply_move(resolved) {
        Ok(()) => {
            tracing::debug!("Engine played {}", format_uci_move(mv));
            after_mutation(state, parts);
        }
        Err(e) => {
            tracing::error!("Failed to apply engine move: {}", e);
            let _ = parts.event_tx.send(SessionEvent::Error(e.to_string()));
        }
    }
}

/// Ask the engine for a move in a background task; the reply goes straight
/// to the caller and the position is left alone.
fn request_hint(
    state: &SessionState,
    parts: &ActorParts,
    reply: oneshot::Sender<Result<Hint, SessionError>>,
) {
    let position = state.position().clone();
    if !position.status().is_ongoing() {
        let _ = reply.send(Err(SessionError::Engine("game is over".to_string())));
        return;
    }

    let engine = Arc::clone(&parts.engine);
    let movetime = state.config().hint_movetime.as_millis().max(1) as u64;
    let revision = state.revision();

    let task = async move {
        let fen = position.to_fen();
        let result = match engine.best_move(&fen, GoParams::movetime(movetime)).await {
            Ok(Some(mv)) => position
                .resolve_uci_move(mv)
                .map(|resolved| Hint {
                    mv: resolved,
                    san: position.san(resolved),
                    uci: format_uci_move(to_standard_uci(position.board(), resolved)),
                })
                .ok_or_else(|| {
                    SessionError::Engine(format!(
                        "engine suggested illegal move {}",
                        format_uci_move(mv)
                    ))
                }),
            Ok(None) => Err(SessionError::Engine("no legal move".to_string())),
            Err(e) => {
                tracing::warn!("Hint failed: {}", e);
                Err(SessionError::Engine(e.to_string()))
            }
        };
        let _ = reply.send(result);
    };
    tokio::spawn(task.instrument(tracing::info_span!("hint", revision = revision.value())));
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chess::{parse_square, parse_uci_move, GameStatus, Position, STARTING_FEN};
    use engine::mock::{EngineCall, ScriptedEngine};
    use engine::{AnalysisReport, EngineError};
    use tokio::sync::watch;

    use super::super::coordinator::AnalysisResult;
    use super::super::revision::Revision;
    use super::super::{spawn_session, SessionHandle};
    use super::*;
    use crate::config::{PlayMode, SessionConfig};

    const FOOLS_MATE: &str = "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3";

    fn after_e4() -> String {
        Position::initial()
            .apply(parse_uci_move("e2e4").unwrap())
            .unwrap()
            .to_fen()
    }

    fn config(mode: PlayMode) -> SessionConfig {
        SessionConfig {
            mode,
            depth: 4,
            multipv: 2,
            engine_movetime: Duration::from_millis(50),
            hint_movetime: Duration::from_millis(20),
        }
    }

    /// Spawn a session and wait until the starting position has been analysed.
    async fn spawn(engine: &ScriptedEngine, mode: PlayMode) -> SessionHandle {
        let handle = spawn_session(Arc::new(engine.clone()), Position::initial(), config(mode));
        let mut analysis = handle.subscribe_analysis();
        wait_for_revision(&mut analysis, 0).await;
        handle
    }

    async fn next_state(events: &mut broadcast::Receiver<SessionEvent>) -> SessionSnapshot {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("timed out waiting for state change")
                .unwrap();
            if let SessionEvent::StateChanged(snapshot) = event {
                return snapshot;
            }
        }
    }

    async fn next_error(events: &mut broadcast::Receiver<SessionEvent>) -> String {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("timed out waiting for error")
                .unwrap();
            if let SessionEvent::Error(message) = event {
                return message;
            }
        }
    }

    async fn wait_for_revision(
        rx: &mut watch::Receiver<Option<Arc<AnalysisResult>>>,
        revision: u64,
    ) -> Arc<AnalysisResult> {
        let waited = tokio::time::timeout(
            Duration::from_secs(2),
            rx.wait_for(|r| r.as_ref().is_some_and(|r| r.revision.value() >= revision)),
        )
        .await
        .expect("timed out waiting for analysis")
        .unwrap();
        waited.clone().unwrap()
    }

    #[tokio::test]
    async fn test_make_move_via_actor() {
        let engine = ScriptedEngine::new();
        let handle = spawn(&engine, PlayMode::Manual).await;
        let (initial, mut events) = handle.subscribe().await.unwrap();
        assert_eq!(initial.revision, Revision::INITIAL);

        let snap = handle.make_move("e4").await.unwrap();
        assert_eq!(snap.revision, Revision::from(1));
        assert_eq!(snap.moves, vec!["e4"]);
        assert_eq!(snap.fen, after_e4());

        let event_snap = next_state(&mut events).await;
        assert_eq!(event_snap, snap);
    }

    #[tokio::test]
    async fn test_rejected_move_is_returned_to_caller() {
        let engine = ScriptedEngine::new();
        let handle = spawn(&engine, PlayMode::Manual).await;

        assert!(matches!(
            handle.make_move("Qh5").await,
            Err(SessionError::IllegalMove(_))
        ));
        assert!(matches!(
            handle.make_move("zz9").await,
            Err(SessionError::UnparsableMove(_))
        ));
        assert!(matches!(
            handle.load("8/8/8").await,
            Err(SessionError::InvalidEncoding(_))
        ));
        let snap = handle.get_snapshot().await.unwrap();
        assert_eq!(snap.revision, Revision::INITIAL);
        assert_eq!(engine.analyse_calls(), vec![STARTING_FEN.to_string()]);
    }

    #[tokio::test]
    async fn test_each_mutation_requests_one_analysis() {
        let engine = ScriptedEngine::new();
        let handle = spawn(&engine, PlayMode::Manual).await;
        let mut analysis = handle.subscribe_analysis();

        handle.make_move("e4").await.unwrap();
        wait_for_revision(&mut analysis, 1).await;
        handle.undo().await.unwrap();
        wait_for_revision(&mut analysis, 2).await;
        handle.redo().await.unwrap();
        let result = wait_for_revision(&mut analysis, 3).await;
        // Nothing left to redo: no revision, no analysis.
        let snap = handle.redo().await.unwrap();
        assert_eq!(snap.revision, Revision::from(3));

        assert_eq!(result.revision, Revision::from(3));
        assert_eq!(result.fen, after_e4());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(
            engine.analyse_calls(),
            vec![
                STARTING_FEN.to_string(),
                after_e4(),
                STARTING_FEN.to_string(),
                after_e4()
            ]
        );
        assert!(engine.best_move_calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_analysis_never_published() {
        let engine = ScriptedEngine::new();
        let slow = engine.gate_analysis(&after_e4());
        let handle = spawn(&engine, PlayMode::Manual).await;
        let mut analysis = handle.subscribe_analysis();

        handle.make_move("e4").await.unwrap();
        assert!(engine.wait_for_calls(2).await);
        // The search for revision 1 is in progress when the user undoes.
        assert_eq!(
            engine.analyse_calls(),
            vec![STARTING_FEN.to_string(), after_e4()]
        );
        handle.undo().await.unwrap();

        slow.release(AnalysisReport::default());
        let latest = wait_for_revision(&mut analysis, 1).await;
        assert_eq!(latest.revision, Revision::from(2));
        assert_eq!(latest.fen, STARTING_FEN);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let current = handle.latest_analysis().unwrap();
        assert_eq!(current.revision, Revision::from(2));
        assert_eq!(current.fen, STARTING_FEN);
    }

    #[tokio::test]
    async fn test_checkmate_load_does_not_ask_engine_to_move() {
        let engine = ScriptedEngine::new();
        let handle = spawn(&engine, PlayMode::EngineAsWhite).await;
        // The engine opens as White on startup.
        assert!(engine.wait_for_calls(2).await);

        let snap = handle.load(FOOLS_MATE).await.unwrap();
        assert_eq!(
            snap.status,
            GameStatus::Checkmate {
                winner: chess::PieceColor::Black
            }
        );
        let mut analysis = handle.subscribe_analysis();
        let result = wait_for_revision(&mut analysis, snap.revision.value()).await;
        assert_eq!(result.score, chess::AnalysisScore::Mate(0));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.best_move_calls(), vec![STARTING_FEN.to_string()]);
    }

    #[tokio::test]
    async fn test_engine_replies_as_black() {
        let e5 = parse_uci_move("e7e5").unwrap();
        let engine = ScriptedEngine::new().with_best_move(&after_e4(), Some(e5));
        let handle = spawn(&engine, PlayMode::EngineAsBlack).await;
        let (_, mut events) = handle.subscribe().await.unwrap();

        let user = handle.make_move("e4").await.unwrap();
        assert_eq!(user.revision, Revision::from(1));
        assert_eq!(next_state(&mut events).await.revision, Revision::from(1));

        let engine_move = next_state(&mut events).await;
        assert_eq!(engine_move.revision, Revision::from(2));
        assert_eq!(engine_move.moves, vec!["e4", "e5"]);
        assert_eq!(engine.best_move_calls(), vec![after_e4()]);
        assert!(engine.get_calls().contains(&EngineCall::BestMove {
            fen: after_e4(),
            params: GoParams::movetime(50)
        }));
    }

    #[tokio::test]
    async fn test_engine_move_requested_before_analysis() {
        let engine = ScriptedEngine::new()
            .with_best_move(&after_e4(), Some(parse_uci_move("c7c5").unwrap()));
        let handle = spawn(&engine, PlayMode::EngineAsBlack).await;

        handle.make_move("e4").await.unwrap();
        assert!(engine.wait_for_calls(3).await);
        let calls = engine.get_calls();
        assert!(matches!(calls[1], EngineCall::BestMove { .. }));
        assert!(matches!(calls[2], EngineCall::Analyse { .. }));
    }

    #[tokio::test]
    async fn test_engine_move_discarded_after_undo() {
        let engine = ScriptedEngine::new();
        let gate = engine.gate_best_move(&after_e4());
        let handle = spawn(&engine, PlayMode::EngineAsBlack).await;

        handle.make_move("e4").await.unwrap();
        assert!(engine.wait_for_calls(3).await);
        // The engine is thinking on the position after 1. e4.
        assert_eq!(engine.best_move_calls(), vec![after_e4()]);
        let undone = handle.undo().await.unwrap();
        assert_eq!(undone.revision, Revision::from(2));

        gate.release(Some(parse_uci_move("e7e5").unwrap()));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snap = handle.get_snapshot().await.unwrap();
        assert_eq!(snap.revision, Revision::from(2));
        assert!(snap.moves.is_empty());
        assert_eq!(snap.fen, STARTING_FEN);
    }

    #[tokio::test]
    async fn test_engine_failure_keeps_session_usable() {
        let engine = ScriptedEngine::new()
            .with_best_move_error(&after_e4(), EngineError::Unavailable("crashed".to_string()))
            .with_analysis_error(&after_e4(), EngineError::Protocol("garbage".to_string()));
        let handle = spawn(&engine, PlayMode::EngineAsBlack).await;
        let (_, mut events) = handle.subscribe().await.unwrap();

        handle.make_move("e4").await.unwrap();
        assert!(next_error(&mut events).await.contains("crashed"));

        // Manual play continues, and analysis resumes for the new position.
        handle.set_mode(PlayMode::Manual).await.unwrap();
        let snap = handle.make_move("c5").await.unwrap();
        assert_eq!(snap.revision, Revision::from(2));
        let mut analysis = handle.subscribe_analysis();
        let result = wait_for_revision(&mut analysis, 2).await;
        assert_eq!(result.fen, snap.fen);
    }

    #[tokio::test]
    async fn test_illegal_engine_move_is_reported() {
        let engine = ScriptedEngine::new()
            .with_best_move(&after_e4(), Some(parse_uci_move("e2e4").unwrap()));
        let handle = spawn(&engine, PlayMode::EngineAsBlack).await;
        let (_, mut events) = handle.subscribe().await.unwrap();

        handle.make_move("e4").await.unwrap();
        assert!(next_error(&mut events).await.contains("illegal"));
        assert_eq!(handle.get_snapshot().await.unwrap().revision, Revision::from(1));
    }

    #[tokio::test]
    async fn test_mode_change_waits_for_next_mutation() {
        let e5 = parse_uci_move("e7e5").unwrap();
        let engine = ScriptedEngine::new().with_best_move(&after_e4(), Some(e5));
        let handle = spawn(&engine, PlayMode::Manual).await;

        handle.make_move("e4").await.unwrap();
        let snap = handle.set_mode(PlayMode::EngineAsBlack).await.unwrap();
        assert_eq!(snap.mode, PlayMode::EngineAsBlack);
        assert_eq!(snap.revision, Revision::from(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(engine.best_move_calls().is_empty());

        // Undo + redo lands on Black to move again, now under the new mode.
        let (_, mut events) = handle.subscribe().await.unwrap();
        handle.undo().await.unwrap();
        handle.redo().await.unwrap();
        let mut last = next_state(&mut events).await;
        while last.revision < Revision::from(4) {
            last = next_state(&mut events).await;
        }
        assert_eq!(last.moves, vec!["e4", "e5"]);
    }

    #[tokio::test]
    async fn test_select_square_plays_through_actor() {
        let engine = ScriptedEngine::new();
        let handle = spawn(&engine, PlayMode::Manual).await;
        let e2 = parse_square("e2").unwrap();
        let e4 = parse_square("e4").unwrap();

        let picked = handle.select_square(e2).await.unwrap();
        assert!(matches!(
            picked,
            super::super::Selection::Picked { ref targets, .. } if targets.contains(&e4)
        ));
        let played = handle.select_square(e4).await.unwrap();
        let super::super::Selection::Played(snap) = played else {
            panic!("expected the move to be played");
        };
        assert_eq!(snap.fen, after_e4());
    }

    #[tokio::test]
    async fn test_hint_does_not_change_position() {
        let engine = ScriptedEngine::new()
            .with_best_move(STARTING_FEN, Some(parse_uci_move("g1f3").unwrap()));
        let handle = spawn(&engine, PlayMode::Manual).await;

        let hint = handle.hint().await.unwrap();
        assert_eq!(hint.san, "Nf3");
        assert_eq!(hint.uci, "g1f3");
        let snap = handle.get_snapshot().await.unwrap();
        assert_eq!(snap.revision, Revision::INITIAL);
        assert!(snap.moves.is_empty());
    }

    #[tokio::test]
    async fn test_hint_in_finished_game_fails() {
        let engine = ScriptedEngine::new();
        let handle = spawn(&engine, PlayMode::Manual).await;
        handle.load(FOOLS_MATE).await.unwrap();
        assert!(matches!(handle.hint().await, Err(SessionError::Engine(_))));
    }

    #[tokio::test]
    async fn test_shutdown_releases_engine() {
        let engine = ScriptedEngine::new();
        let handle = spawn(&engine, PlayMode::Manual).await;
        handle.shutdown().await;
        assert!(engine.is_shut_down());
        assert!(handle.get_snapshot().await.is_err());
    }
}
