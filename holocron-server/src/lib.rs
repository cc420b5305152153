pub mod collaborators;
pub mod commands;
pub mod config;
pub mod cursor;
pub mod detector;
pub mod error;
pub mod notifications;
pub mod objections;
pub mod rankings;
pub mod reconciliation;
pub mod routes;
pub mod state_machine;
pub mod status;
pub mod testing;

use std::sync::Arc;

pub use error::{CollaboratorError, EngineError};
pub use holocron_core::get_bot_version;
pub use state_machine::{LifecycleStore, ProcessOutcome};

use commands::CommandDispatcher;
use state_machine::interpreter::InterpreterContext;

/// Shared state behind the HTTP routes.
pub struct AppState {
    pub store: Arc<LifecycleStore>,
    pub ctx: Arc<InterpreterContext>,
    pub commands: Arc<CommandDispatcher>,
    pub command_auth_token: Option<String>,
    pub status_auth_token: Option<String>,
}
