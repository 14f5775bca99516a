use thiserror::Error;

use crate::state::events::Envelope;

/// Failures from the image patch codec and the wire/asset image helpers
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ImageError {
    #[error("patch count must be greater than 0, got {0}")]
    InvalidPatchCount(usize),

    #[error("a {width}x{height} image cannot be split into {patches} patches")]
    ImageTooSmall {
        patches: usize,
        width: u32,
        height: u32,
    },

    #[error("image format is not supported: {0}")]
    UnsupportedImageFormat(String),

    #[error("could not decode image: {0}")]
    Decode(String),

    #[error("could not encode image: {0}")]
    Encode(String),

    #[error("image asset unavailable: {0}")]
    Asset(String),
}

/// Failures raised by the game orchestrator and its phases
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GameError {
    #[error("phase {phase} is not finished")]
    NotFinished { phase: usize },

    #[error("game is already complete")]
    Terminal,

    #[error("could not place targets after {attempts} attempts")]
    TargetPlacement { attempts: u32 },

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Connection-scoped failures. Every variant maps to one offending field of
/// the inbound message and is reported back to the sender only.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LobbyError {
    #[error("already exists")]
    DuplicateLobbyName,

    #[error("not found")]
    LobbyNotFound { field: &'static str },

    #[error("{reason}")]
    LobbyFull { reason: &'static str },

    #[error("already exists")]
    DuplicateNickname,

    #[error("no active game")]
    NoActiveGame,

    #[error("invalid status")]
    InvalidReadyStatus,

    #[error("unimplemented/bad request")]
    UnknownMessageType(String),

    #[error("missing")]
    MissingField(String),

    #[error("already in a lobby")]
    AlreadyInLobby,

    #[error("not in a lobby")]
    NotInLobby,

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Game(#[from] GameError),
}

impl LobbyError {
    /// Name of the inbound field the error is reported against
    pub fn field(&self) -> &str {
        match self {
            LobbyError::DuplicateLobbyName => "lobby_name",
            LobbyError::LobbyNotFound { field } => *field,
            LobbyError::LobbyFull { .. } => "lobby_name",
            LobbyError::DuplicateNickname => "nickname",
            LobbyError::NoActiveGame => "game",
            LobbyError::InvalidReadyStatus => "status",
            LobbyError::UnknownMessageType(_) => "type",
            LobbyError::MissingField(field) => field.as_str(),
            LobbyError::AlreadyInLobby | LobbyError::NotInLobby => "lobby_token",
            LobbyError::Image(_) => "image",
            LobbyError::Game(_) => "game",
        }
    }

    /// Render as `{type: action, error: {field: message}}`
    pub fn to_envelope(&self, action: &str) -> Envelope {
        Envelope::error(action, self.field(), &self.to_string())
    }
}
