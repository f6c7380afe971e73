//! Scripted engine for tests - only compiled in test mode or with mock feature

use crate::{AnalysisReport, EngineError, EngineLine, EngineSession, GoParams};
use async_trait::async_trait;
use chess::AnalysisScore;
use cozy_chess::Move;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{oneshot, Notify};

/// Engine double whose answers are scripted per FEN.
///
/// A scripted answer is either ready immediately or gated: the call blocks
/// until the test releases it through the returned [`Gate`]. Every call is
/// recorded, in arrival order.
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    state: Arc<Mutex<ScriptState>>,
    calls_changed: Arc<Notify>,
}

#[derive(Default)]
struct ScriptState {
    best_moves: HashMap<String, VecDeque<Scripted<Option<Move>>>>,
    analyses: HashMap<String, VecDeque<Scripted<AnalysisReport>>>,
    calls: Vec<EngineCall>,
    shut_down: bool,
}

enum Scripted<T> {
    Ready(Result<T, EngineError>),
    Gated(oneshot::Receiver<Result<T, EngineError>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    BestMove {
        fen: String,
        params: GoParams,
    },
    Analyse {
        fen: String,
        depth: u8,
        multipv: u8,
    },
}

/// Release handle for a gated answer.
pub struct Gate<T> {
    tx: oneshot::Sender<Result<T, EngineError>>,
}

impl<T> Gate<T> {
    pub fn release(self, value: T) {
        let _ = self.tx.send(Ok(value));
    }

    pub fn fail(self, error: EngineError) {
        let _ = self.tx.send(Err(error));
    }
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScriptState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Answer the next best-move request for `fen` with `mv`.
    pub fn with_best_move(self, fen: &str, mv: Option<Move>) -> Self {
        self.push_best_move(fen, Scripted::Ready(Ok(mv)));
        self
    }

    pub fn with_best_move_error(self, fen: &str, error: EngineError) -> Self {
        self.push_best_move(fen, Scripted::Ready(Err(error)));
        self
    }

    /// Answer the next analysis request for `fen` with `report`.
    pub fn with_analysis(self, fen: &str, report: AnalysisReport) -> Self {
        self.push_analysis(fen, Scripted::Ready(Ok(report)));
        self
    }

    pub fn with_analysis_error(self, fen: &str, error: EngineError) -> Self {
        self.push_analysis(fen, Scripted::Ready(Err(error)));
        self
    }

    /// Hold the next best-move request for `fen` until the gate is released.
    pub fn gate_best_move(&self, fen: &str) -> Gate<Option<Move>> {
        let (tx, rx) = oneshot::channel();
        self.push_best_move(fen, Scripted::Gated(rx));
        Gate { tx }
    }

    /// Hold the next analysis request for `fen` until the gate is released.
    pub fn gate_analysis(&self, fen: &str) -> Gate<AnalysisReport> {
        let (tx, rx) = oneshot::channel();
        self.push_analysis(fen, Scripted::Gated(rx));
        Gate { tx }
    }

    fn push_best_move(&self, fen: &str, answer: Scripted<Option<Move>>) {
        self.state()
            .best_moves
            .entry(fen.to_string())
            .or_default()
            .push_back(answer);
    }

    fn push_analysis(&self, fen: &str, answer: Scripted<AnalysisReport>) {
        self.state()
            .analyses
            .entry(fen.to_string())
            .or_default()
            .push_back(answer);
    }

    /// Get recorded calls for verification
    pub fn get_calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    pub fn best_move_calls(&self) -> Vec<String> {
        self.get_calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::BestMove { fen, .. } => Some(fen),
                EngineCall::Analyse { .. } => None,
            })
            .collect()
    }

    pub fn analyse_calls(&self) -> Vec<String> {
        self.get_calls()
            .into_iter()
            .filter_map(|call| match call {
                EngineCall::Analyse { fen, .. } => Some(fen),
                EngineCall::BestMove { .. } => None,
            })
            .collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state().shut_down
    }

    /// Wait until at least `count` calls have been recorded. Returns false
    /// if that does not happen within two seconds.
    pub async fn wait_for_calls(&self, count: usize) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let changed = self.calls_changed.notified();
            if self.state().calls.len() >= count {
                return true;
            }
            if tokio::time::timeout_at(deadline, changed).await.is_err() {
                return self.state().calls.len() >= count;
            }
        }
    }

    fn record(&self, call: EngineCall) -> Result<(), EngineError> {
        let mut state = self.state();
        if state.shut_down {
            return Err(EngineError::Unavailable("engine has been shut down".to_string()));
        }
        state.calls.push(call);
        drop(state);
        self.calls_changed.notify_waiters();
        Ok(())
    }
}

async fn resolve<T>(answer: Scripted<T>) -> Result<T, EngineError> {
    match answer {
        Scripted::Ready(result) => result,
        Scripted::Gated(rx) => rx
            .await
            .unwrap_or_else(|_| Err(EngineError::Unavailable("gate dropped".to_string()))),
    }
}

/// Single even line at the requested depth.
fn default_report(depth: u8) -> AnalysisReport {
    AnalysisReport {
        lines: vec![EngineLine {
            rank: 1,
            depth: depth as u32,
            score: AnalysisScore::Centipawns(0),
            pv: Vec::new(),
        }],
        ..Default::default()
    }
}

#[async_trait]
impl EngineSession for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn best_move(&self, fen: &str, params: GoParams) -> Result<Option<Move>, EngineError> {
        self.record(EngineCall::BestMove {
            fen: fen.to_string(),
            params,
        })?;
        let answer = self
            .state()
            .best_moves
            .get_mut(fen)
            .and_then(|queue| queue.pop_front());
        match answer {
            Some(answer) => resolve(answer).await,
            None => Err(EngineError::Unavailable(format!(
                "no scripted best move for {}",
                fen
            ))),
        }
    }

    async fn analyse(
        &self,
        fen: &str,
        depth: u8,
        multipv: u8,
    ) -> Result<AnalysisReport, EngineError> {
        self.record(EngineCall::Analyse {
            fen: fen.to_string(),
            depth,
            multipv,
        })?;
        let answer = self
            .state()
            .analyses
            .get_mut(fen)
            .and_then(|queue| queue.pop_front());
        match answer {
            Some(answer) => resolve(answer).await,
            None => Ok(default_report(depth)),
        }
    }

    async fn shutdown(&self) {
        self.state().shut_down = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chess::{parse_uci_move, STARTING_FEN};

    #[tokio::test]
    async fn test_scripted_answers_in_order() {
        let e4 = parse_uci_move("e2e4").unwrap();
        let d4 = parse_uci_move("d2d4").unwrap();
        let engine = ScriptedEngine::new()
            .with_best_move(STARTING_FEN, Some(e4))
            .with_best_move(STARTING_FEN, Some(d4));

        let params = GoParams::movetime(10);
        assert_eq!(engine.best_move(STARTING_FEN, params).await, Ok(Some(e4)));
        assert_eq!(engine.best_move(STARTING_FEN, params).await, Ok(Some(d4)));
        assert!(matches!(
            engine.best_move(STARTING_FEN, params).await,
            Err(EngineError::Unavailable(_))
        ));
        assert_eq!(engine.best_move_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_default_analysis_is_even() {
        let engine = ScriptedEngine::new();
        let report = engine.analyse(STARTING_FEN, 7, 5).await.unwrap();
        assert_eq!(report.lines.len(), 1);
        assert_eq!(report.lines[0].depth, 7);
        assert_eq!(report.lines[0].score, AnalysisScore::Centipawns(0));
        assert_eq!(
            engine.get_calls(),
            vec![EngineCall::Analyse {
                fen: STARTING_FEN.to_string(),
                depth: 7,
                multipv: 5
            }]
        );
    }

    #[tokio::test]
    async fn test_gated_answer_waits_for_release() {
        let engine = ScriptedEngine::new();
        let gate = engine.gate_analysis(STARTING_FEN);

        let task = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.analyse(STARTING_FEN, 3, 1).await })
        };
        assert!(engine.wait_for_calls(1).await);
        assert!(!task.is_finished());

        gate.release(AnalysisReport::default());
        let report = task.await.unwrap().unwrap();
        assert!(report.lines.is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_rejects_requests() {
        let engine = ScriptedEngine::new();
        engine.shutdown().await;
        assert!(engine.is_shut_down());
        assert!(engine.analyse(STARTING_FEN, 1, 1).await.is_err());
        assert!(engine.get_calls().is_empty());
    }
}
