pub mod auth;
pub mod commands;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod service;
pub mod sessions;

pub use error::CommandFailure;
pub use service::{bootstrap_admin, serve, KestrelService};
pub use sessions::{Session, SessionRegistry};
