//! Domain model for travel-plan workflows.
//!
//! - **Types** (`types.rs`): workflow and session identifiers
//! - **Request** (`request.rs`): validation of user requests
//! - **Workflow** (`workflow.rs`): the per-request coordination record
//! - **Failure** (`failure.rs`): failure taxonomy and per-stage policy
//! - **Services** (`services.rs`): injected clock

pub mod failure;
pub mod request;
pub mod services;
pub mod types;
pub mod workflow;

pub use failure::{failure_policy, FailureKind, OnStageFailure, RoutingAnomaly};
pub use request::{TravelRequest, ValidationError};
pub use services::WorkflowServices;
pub use types::{ContextId, WorkflowId};
pub use workflow::{Workflow, WorkflowStage};
