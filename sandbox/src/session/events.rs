use super::revision::Revision;
use super::snapshot::SessionSnapshot;

/// Events broadcast from the session actor to all subscribers.
///
/// Analysis results are not events; they are published on the coordinator's
/// watch channel so a slow subscriber only ever sees the newest one.
#[derive(Debug, Clone)]
#[allow(clippy::large_enum_variant)]
pub enum SessionEvent {
    /// Full state snapshot after any mutation.
    StateChanged(SessionSnapshot),
    /// The engine was asked for a move at this revision.
    EngineThinking(Revision),
    /// Background failure (engine error, rejected engine move).
    Error(String),
}
