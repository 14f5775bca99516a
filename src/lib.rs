pub mod domain;
pub mod error;
pub mod handlers;
pub mod imaging;
pub mod server;
pub mod state;
pub mod utils;

pub use domain::game::GameOrchestrator;
pub use error::{GameError, ImageError, LobbyError};
pub use state::events::{Envelope, Outbound, SessionId, Transport};
pub use state::server_state::LobbyRegistry;
pub use utils::config::Config;
