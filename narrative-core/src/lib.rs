//! Turn-based narrative engine driven by a language model.
//!
//! This crate provides:
//! - Per-session narrative state with a single-writer store
//! - A staged turn pipeline (perception, trigger check, director, performance)
//! - Background prediction of macro story events
//! - A session registry and scripted testing tools
//!
//! # Quick Start
//!
//! ```ignore
//! use narrative_core::{EngineConfig, SessionRegistry};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = SessionRegistry::from_env(EngineConfig::default())?;
//!     let (session, _state) = registry.create().await;
//!
//!     let outcome = registry.submit_turn(&session, "Is anyone here?").await?;
//!     println!("{}", outcome.response);
//!     println!("turn {}", outcome.turn);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod history;
pub mod oracle;
pub mod orchestrator;
pub mod session;
pub mod stages;
pub mod state;
pub mod testing;

// Primary public API
pub use config::{EngineConfig, OracleConfig, Persona};
pub use history::{ConversationLog, HistoryEntry, Role};
pub use oracle::{ClaudeOracle, NarratorOracle, OracleError};
pub use orchestrator::{PredictionStatus, TurnDebug, TurnOrchestrator, TurnOutcome, TurnRecord};
pub use session::{Session, SessionError, SessionId, SessionRegistry};
pub use stages::{Stage, StageOutcome};
pub use state::{Event, NarrativeState, Patch, StateStore};
pub use testing::{ScriptedOracle, ScriptedReply, TestHarness};
