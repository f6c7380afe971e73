//! Background analysis with stale-result suppression.
//!
//! Each request is tagged with the session revision it was made for. A
//! result is published only if no newer revision has been requested since
//! and nothing newer has already been published, so observers never see
//! analysis for a position the session has moved past.
//!
//! Requests run one at a time. A request that has been superseded by the
//! time its turn comes is skipped without touching the engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chess::{AnalysisScore, GameStatus, PieceColor, Position, PrincipalVariation};
use engine::{AnalysisReport, EngineSession};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::Instrument;

use super::revision::Revision;

/// Evaluation of one position, stamped with the revision it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisResult {
    pub revision: Revision,
    pub fen: String,
    pub side_to_move: PieceColor,
    pub status: GameStatus,
    /// Depth actually reached by the best line.
    pub depth: u32,
    /// Relative to the side to move; see [`AnalysisScore::for_white`].
    pub score: AnalysisScore,
    /// Candidate lines, best first. Empty for finished games.
    pub lines: Vec<PrincipalVariation>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
}

impl AnalysisResult {
    /// Result for a finished game, produced without asking the engine.
    fn terminal(position: &Position, revision: Revision) -> Self {
        let status = position.status();
        let score = match status {
            GameStatus::Checkmate { .. } => AnalysisScore::Mate(0),
            _ => AnalysisScore::Centipawns(0),
        };
        Self {
            revision,
            fen: position.to_fen(),
            side_to_move: position.side_to_move(),
            status,
            depth: 0,
            score,
            lines: Vec::new(),
            nodes: None,
            nps: None,
        }
    }

    fn from_report(position: &Position, revision: Revision, report: &AnalysisReport) -> Self {
        let lines: Vec<PrincipalVariation> = report
            .lines
            .iter()
            .map(|line| PrincipalVariation::new(position, line.rank, line.score, line.depth, &line.pv))
            .collect();
        let (score, depth) = report
            .best()
            .map(|line| (line.score, line.depth))
            .unwrap_or((AnalysisScore::Centipawns(0), 0));
        Self {
            revision,
            fen: position.to_fen(),
            side_to_move: position.side_to_move(),
            status: position.status(),
            depth,
            score,
            lines,
            nodes: report.nodes,
            nps: report.nps,
        }
    }

    pub fn white_score(&self) -> AnalysisScore {
        self.score.for_white(self.side_to_move)
    }
}

pub(crate) struct AnalysisCoordinator {
    engine: Arc<dyn EngineSession>,
    latest_requested: Arc<AtomicU64>,
    published: Arc<watch::Sender<Option<Arc<AnalysisResult>>>>,
    /// Held for the duration of one engine search.
    in_flight: Arc<Mutex<()>>,
    multipv: u8,
}

impl AnalysisCoordinator {
    pub fn new(engine: Arc<dyn EngineSession>, multipv: u8) -> Self {
        let (published, _) = watch::channel(None);
        Self {
            engine,
            latest_requested: Arc::new(AtomicU64::new(0)),
            published: Arc::new(published),
            in_flight: Arc::new(Mutex::new(())),
            multipv: multipv.max(1),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<AnalysisResult>>> {
        self.published.subscribe()
    }

    #[cfg(test)]
    pub fn latest(&self) -> Option<Arc<AnalysisResult>> {
        self.published.borrow().clone()
    }

    /// Start analysing `position` as of `revision`.
    ///
    /// Finished games are published immediately and return None; otherwise
    /// the spawned task is returned so callers may await it.
    pub fn request_analysis(
        &self,
        position: &Position,
        revision: Revision,
        depth: u8,
    ) -> Option<JoinHandle<()>> {
        self.latest_requested
            .fetch_max(revision.value(), Ordering::SeqCst);

        if !position.status().is_ongoing() {
            publish(
                &self.published,
                &self.latest_requested,
                AnalysisResult::terminal(position, revision),
            );
            return None;
        }

        let engine = Arc::clone(&self.engine);
        let latest_requested = Arc::clone(&self.latest_requested);
        let published = Arc::clone(&self.published);
        let in_flight = Arc::clone(&self.in_flight);
        let position = position.clone();
        let multipv = self.multipv;
        let depth = depth.max(1);

        let task = async move {
            let _slot = in_flight.lock().await;
            if revision.value() < latest_requested.load(Ordering::SeqCst) {
                tracing::debug!("Skipping analysis for stale revision {}", revision);
                return;
            }
            let fen = position.to_fen();
            tracing::debug!("Analysing {} at depth {}", fen, depth);
            match engine.analyse(&fen, depth, multipv).await {
                Ok(report) => {
                    let result = AnalysisResult::from_report(&position, revision, &report);
                    publish(&published, &latest_requested, result);
                }
                Err(e) => tracing::warn!("Analysis failed: {}", e),
            }
        };
        Some(tokio::spawn(task.instrument(tracing::info_span!(
            "analysis",
            revision = revision.value()
        ))))
    }
}

/// Publish `result` unless a newer revision was requested or published.
fn publish(
    published: &watch::Sender<Option<Arc<AnalysisResult>>>,
    latest_requested: &AtomicU64,
    result: AnalysisResult,
) {
    let revision = result.revision;
    if revision.value() < latest_requested.load(Ordering::SeqCst) {
        tracing::debug!("Dropping stale analysis for revision {}", revision);
        return;
    }
    let mut result = Some(Arc::new(result));
    let sent = published.send_if_modified(|current| {
        let newer = current
            .as_ref()
            .map_or(true, |existing| existing.revision < revision);
        if newer {
            *current = result.take();
        }
        newer
    });
    if !sent {
        tracing::debug!("Analysis for revision {} already superseded", revision);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::{parse_uci_move, STARTING_FEN};
    use engine::mock::ScriptedEngine;
    use engine::{EngineError, EngineLine};

    fn report(score: AnalysisScore, depth: u32, pv: &[&str]) -> AnalysisReport {
        AnalysisReport {
            lines: vec![EngineLine {
                rank: 1,
                depth,
                score,
                pv: pv.iter().map(|m| parse_uci_move(m).unwrap()).collect(),
            }],
            ..Default::default()
        }
    }

    fn coordinator(engine: &ScriptedEngine) -> AnalysisCoordinator {
        AnalysisCoordinator::new(Arc::new(engine.clone()), 3)
    }

    #[tokio::test]
    async fn test_publishes_result_with_revision() {
        let engine = ScriptedEngine::new().with_analysis(
            STARTING_FEN,
            report(AnalysisScore::Centipawns(35), 12, &["e2e4", "e7e5", "g1f3"]),
        );
        let coordinator = coordinator(&engine);

        let task = coordinator
            .request_analysis(&Position::initial(), Revision::from(1), 12)
            .unwrap();
        task.await.unwrap();

        let result = coordinator.latest().unwrap();
        assert_eq!(result.revision, Revision::from(1));
        assert_eq!(result.score, AnalysisScore::Centipawns(35));
        assert_eq!(result.depth, 12);
        assert_eq!(result.lines[0].san, "1. e4 e5 2. Nf3");
        assert_eq!(
            engine.get_calls(),
            vec![engine::mock::EngineCall::Analyse {
                fen: STARTING_FEN.to_string(),
                depth: 12,
                multipv: 3
            }]
        );
    }

    #[tokio::test]
    async fn test_late_result_for_old_revision_is_dropped() {
        let engine = ScriptedEngine::new();
        let after_e4 = Position::initial()
            .apply(parse_uci_move("e2e4").unwrap())
            .unwrap();
        let old_gate = engine.gate_analysis(STARTING_FEN);
        let new_gate = engine.gate_analysis(&after_e4.to_fen());
        let coordinator = coordinator(&engine);

        let old = coordinator
            .request_analysis(&Position::initial(), Revision::from(1), 10)
            .unwrap();
        assert!(engine.wait_for_calls(1).await);
        let new = coordinator
            .request_analysis(&after_e4, Revision::from(2), 10)
            .unwrap();

        // The old search finishes after the newer request was made.
        old_gate.release(report(AnalysisScore::Centipawns(40), 10, &["e2e4"]));
        old.await.unwrap();
        assert!(coordinator.latest().is_none());

        assert!(engine.wait_for_calls(2).await);
        new_gate.release(report(AnalysisScore::Centipawns(-20), 10, &["e7e5"]));
        new.await.unwrap();

        let result = coordinator.latest().unwrap();
        assert_eq!(result.revision, Revision::from(2));
        assert_eq!(result.score, AnalysisScore::Centipawns(-20));
    }

    #[tokio::test]
    async fn test_result_dropped_when_newer_revision_requested_first() {
        let engine = ScriptedEngine::new();
        let old_gate = engine.gate_analysis(STARTING_FEN);
        let coordinator = coordinator(&engine);
        let mut rx = coordinator.subscribe();

        let old = coordinator
            .request_analysis(&Position::initial(), Revision::from(1), 10)
            .unwrap();
        assert!(engine.wait_for_calls(1).await);
        // A newer revision arrives before the old analysis completes.
        let checkmate =
            Position::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")
                .unwrap();
        assert!(coordinator
            .request_analysis(&checkmate, Revision::from(2), 10)
            .is_none());
        assert!(rx.has_changed().unwrap());
        rx.borrow_and_update();

        old_gate.release(report(AnalysisScore::Centipawns(40), 10, &["e2e4"]));
        old.await.unwrap();

        assert!(!rx.has_changed().unwrap());
        assert_eq!(coordinator.latest().unwrap().revision, Revision::from(2));
    }

    #[tokio::test]
    async fn test_superseded_request_never_reaches_engine() {
        let engine = ScriptedEngine::new();
        let coordinator = coordinator(&engine);
        let after_e4 = Position::initial()
            .apply(parse_uci_move("e2e4").unwrap())
            .unwrap();

        // Neither task has run yet when the second request arrives.
        let old = coordinator
            .request_analysis(&Position::initial(), Revision::from(1), 10)
            .unwrap();
        let new = coordinator
            .request_analysis(&after_e4, Revision::from(2), 10)
            .unwrap();
        old.await.unwrap();
        new.await.unwrap();

        assert_eq!(engine.analyse_calls(), vec![after_e4.to_fen()]);
        assert_eq!(coordinator.latest().unwrap().revision, Revision::from(2));
    }

    #[tokio::test]
    async fn test_terminal_positions_skip_engine() {
        let engine = ScriptedEngine::new();
        let coordinator = coordinator(&engine);

        let mated =
            Position::from_fen("rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3")
                .unwrap();
        assert!(coordinator
            .request_analysis(&mated, Revision::from(4), 15)
            .is_none());
        let result = coordinator.latest().unwrap();
        assert_eq!(result.score, AnalysisScore::Mate(0));
        assert!(result.lines.is_empty());

        let stalemate = Position::from_fen("7k/5Q2/6K1/8/8/8/8/8 b - - 0 1").unwrap();
        coordinator.request_analysis(&stalemate, Revision::from(5), 15);
        let result = coordinator.latest().unwrap();
        assert_eq!(result.status, GameStatus::Stalemate);
        assert_eq!(result.score, AnalysisScore::Centipawns(0));

        assert!(engine.get_calls().is_empty());
    }

    #[tokio::test]
    async fn test_engine_error_publishes_nothing() {
        let engine = ScriptedEngine::new()
            .with_analysis_error(STARTING_FEN, EngineError::Unavailable("gone".to_string()));
        let coordinator = coordinator(&engine);

        coordinator
            .request_analysis(&Position::initial(), Revision::from(1), 5)
            .unwrap()
            .await
            .unwrap();
        assert!(coordinator.latest().is_none());
    }

    #[tokio::test]
    async fn test_white_score_flips_for_black_to_move() {
        let after_e4 = Position::initial()
            .apply(parse_uci_move("e2e4").unwrap())
            .unwrap();
        let engine = ScriptedEngine::new().with_analysis(
            &after_e4.to_fen(),
            report(AnalysisScore::Centipawns(-30), 8, &["c7c5"]),
        );
        let coordinator = coordinator(&engine);
        coordinator
            .request_analysis(&after_e4, Revision::from(1), 8)
            .unwrap()
            .await
            .unwrap();

        let result = coordinator.latest().unwrap();
        assert_eq!(result.side_to_move, PieceColor::Black);
        assert_eq!(result.white_score(), AnalysisScore::Centipawns(30));
    }
}
