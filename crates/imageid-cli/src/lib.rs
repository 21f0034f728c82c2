pub mod cli;
pub mod config;
pub mod render;
pub mod session;

pub use cli::*;
pub use session::{Reply, Session, SessionCommand};
