//! Warden daemon library - execution, orchestration and the collaborator facade.

pub mod config;
pub mod engine;
pub mod intent;
pub mod orchestrator;
pub mod pending;
pub mod redact;
pub mod runner;
pub mod watcher;

pub use config::Config;
pub use engine::Warden;
pub use intent::{Intent, Interpreter, KeywordInterpreter};
pub use orchestrator::{Orchestrator, RemediationRequest, RemediationState};
pub use pending::PendingJournal;
pub use runner::{CommandOutput, CommandRunner, ScriptedRunner, ShellRunner};
