//! Shared type definitions for the cpflow workspace.
//!
//! The models defined here cross crate boundaries: step descriptors come out
//! of layered configuration, requests flow from the factory layer into the
//! drivers, and results flow back up to the CLI. They intentionally carry no
//! behavior beyond construction helpers and serialization so that the engine
//! crate owns all orchestration logic.

pub mod docker;
pub mod request;
pub mod result;
pub mod step;

pub use docker::{DockerStateInfo, RebuildPlan, state_key};
pub use request::{
    DockerFileRequest, DockerOp, DockerOptions, DockerRequest, FileOp, FileRequest, MountSpec, Request, RequestMeta, RequestPayload,
    ShellRequest,
};
pub use result::{OperationResult, WorkflowExecutionResult};
pub use step::{EnvKind, StepDescriptor, StepKind};
