use crate::image::ContentDigest;
use std::fmt;

/// Stage of a pull operation
///
/// A pull moves forward through these in declaration order, ending in
/// [PullState::Done]. `Cancelling` can interrupt any stage before that and is
/// always followed by `Cancelled`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum PullState {
    Idle,
    Authenticating,
    ResolvingManifest,
    FetchingConfig,
    FetchingLayers,
    BuildingChain,
    Assembling,
    Done,
    Cancelling,
    Cancelled,
}

impl PullState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PullState::Done | PullState::Cancelled)
    }
}

impl fmt::Display for PullState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PullState::Idle => "idle",
            PullState::Authenticating => "authenticating",
            PullState::ResolvingManifest => "resolving manifest",
            PullState::FetchingConfig => "fetching config",
            PullState::FetchingLayers => "fetching layers",
            PullState::BuildingChain => "building layer chain",
            PullState::Assembling => "assembling archive",
            PullState::Done => "done",
            PullState::Cancelling => "cancelling",
            PullState::Cancelled => "cancelled",
        })
    }
}

/// Receives progress from a pull
///
/// Every method has an empty default, so implement only what you display.
/// Calls may arrive from several tasks at once; per-layer progress for
/// different layers can interleave, while overall progress never decreases.
pub trait PullObserver: Send + Sync {
    /// A message meant for the user
    fn log(&self, _level: log::Level, _message: &str) {}

    /// Download progress of one layer blob, 0 to 100
    fn layer_progress(&self, _digest: &ContentDigest, _percent: u8) {}

    /// Progress of the whole pull, 0 to 100
    fn overall_progress(&self, _percent: u8) {}

    fn state_changed(&self, _state: PullState) {}
}

/// Observer that ignores everything
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl PullObserver for NoopObserver {}
