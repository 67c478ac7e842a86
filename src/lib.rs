//! Council deliberation pipeline.
//!
//! A prompt fans out to a council of models under distinct roles
//! (Builder, Skeptic, Minimalist, Auditor), the council anonymously
//! peer-reviews its own answers, a Chairman synthesizes one final
//! answer, and the whole run streams as incremental events and
//! persists as an auditable decision trace.

pub mod adjudication;
pub mod anonymizer;
pub mod config;
pub mod consensus;
pub mod error;
pub mod events;
pub mod model_client;
pub mod orchestrator;
pub mod ranking_parser;
pub mod roles;
pub mod stage_runner;
pub mod store;
pub mod title;
pub mod types;

pub use config::CouncilEnvConfig;
pub use error::{CouncilError, CouncilResult};
pub use events::{ChannelEventSink, Event, EventSink};
pub use model_client::{ModelClient, ModelError, ModelErrorKind};
pub use orchestrator::Orchestrator;
pub use roles::Role;
pub use store::{ConversationStore, InMemoryConversationStore};
pub use types::{AssistantMessage, CouncilConfig, CouncilMember, DecisionTrace};
