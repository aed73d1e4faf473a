//! Orchestration logic: stages, routing, breakers, artifacts, progress.

pub mod artifact_store;
pub mod breaker;
pub mod broadcaster;
pub mod orchestrator;
pub mod router;
pub mod stage;

pub use artifact_store::{ArtifactStoreError, FsArtifactStore};
pub use breaker::{BreakerConfig, BreakerRegistry, BreakerSnapshot};
pub use broadcaster::{ProgressBroadcaster, Subscription};
pub use orchestrator::{Orchestrator, StageFailure, StageSuccess};
pub use router::{AgentEndpoint, AgentRegistry, RouterDispatcher};
pub use stage::{FailurePolicy, InputField, Mode, StageDefinition, StageRegistry, StepDefinition};
