pub mod events;
pub mod lobby;
pub mod server_state;
