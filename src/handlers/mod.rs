pub mod http;
pub mod messages;
pub mod models;
pub mod ws;
