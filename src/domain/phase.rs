use image::DynamicImage;
use serde_json::Value;

use crate::domain::stats::PhaseMetrics;
use crate::error::{GameError, ImageError, LobbyError};
use crate::imaging::{codec, transfer};
use crate::state::events::{Outbound, SessionId};

/// Difficulty signal handed from one phase to the next. `None` means the
/// finished phase does not score (yet) and the next phase uses its defaults.
pub type Difficulty = Option<f64>;

/// Player as seen by a phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhasePlayer {
    pub session: SessionId,
    pub nickname: String,
}

impl PhasePlayer {
    pub fn new(session: SessionId, nickname: impl Into<String>) -> Self {
        Self {
            session,
            nickname: nickname.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseState {
    Pending,
    Running,
    Finished,
}

/// Decoded phase-scoped payload
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseInput {
    /// Single-channel drawing submitted for the drawing phase
    Drawing(DynamicImage),
    /// Drawing already scored against the sender's reference patch
    ScoredDrawing {
        drawing: DynamicImage,
        metric: Result<f64, ImageError>,
    },
    /// Target to clear in the target phase
    Target { id: u32 },
}

impl PhaseInput {
    /// Decode `data` of a `phase_*` message. Image decoding happens here so
    /// callers can do it before taking any lobby lock.
    pub fn parse(kind: &str, data: &Value) -> Result<Self, LobbyError> {
        match kind {
            "phase_1" => {
                let payload = data
                    .get("image")
                    .and_then(Value::as_str)
                    .ok_or_else(|| LobbyError::MissingField("image".to_string()))?;
                let image = transfer::decode_base64_image(payload)?;
                Ok(PhaseInput::Drawing(codec::to_single_channel(&image)))
            }
            "phase_2" => {
                let id = data
                    .get("id")
                    .and_then(Value::as_u64)
                    .and_then(|id| u32::try_from(id).ok())
                    .ok_or_else(|| LobbyError::MissingField("id".to_string()))?;
                Ok(PhaseInput::Target { id })
            }
            other => Err(LobbyError::UnknownMessageType(other.to_string())),
        }
    }
}

/// An input ready to apply, or work to run on it first
pub enum Prepared {
    Ready(PhaseInput),
    Deferred(Box<dyn FnOnce() -> PhaseInput + Send>),
}

impl Prepared {
    /// Run any deferred work. Callers hold no lobby lock here.
    pub fn resolve(self) -> PhaseInput {
        match self {
            Prepared::Ready(input) => input,
            Prepared::Deferred(job) => job(),
        }
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Prepared::Deferred(_))
    }
}

/// One sub-game of a running game. The orchestrator owns an ordered list of
/// these and never inspects which variant it is holding.
pub trait Phase: Send + Sync {
    /// 1-based number used on the wire
    fn number(&self) -> usize;

    fn state(&self) -> PhaseState;

    fn start(&mut self, difficulty: Difficulty) -> Result<Vec<Outbound>, GameError>;

    /// Split the costly part of handling `input` off into a job that reads
    /// nothing from the phase. The result is applied later with `receive`.
    fn prepare(&self, _player: SessionId, input: PhaseInput) -> Prepared {
        Prepared::Ready(input)
    }

    /// Apply one player's input. Inputs meant for another phase are ignored.
    fn receive(&mut self, player: SessionId, input: PhaseInput) -> Vec<Outbound>;

    fn is_finished(&self) -> bool {
        self.state() == PhaseState::Finished
    }

    /// Only meaningful once finished
    fn next_difficulty(&self) -> Difficulty;

    /// Drop a departed player's bookkeeping
    fn remove_player(&mut self, player: SessionId);

    fn metrics(&self) -> PhaseMetrics;
}
