pub mod drawing;
pub mod game;
pub mod lobbies;
pub mod phase;
pub mod stats;
pub mod target;
