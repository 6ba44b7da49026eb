pub mod auth;
pub mod handlers;
pub mod protocol;
pub mod reconnect;
pub mod server;
pub mod session;

pub use reconnect::{Reconnect, ReconnectPolicy};
pub use server::{run, ApiState};
