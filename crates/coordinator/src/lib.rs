//! Coordinator, workflow engine and orchestration system for Proctor.
//!
//! The coordinator is the single router between agents:
//! 1. Keeps the registry of agents by id
//! 2. Routes every message into its receiver's mailbox
//! 3. Brokers request/response task exchanges with a bounded wait
//! 4. Runs multi-step workflows on top of the broker
//!
//! # Architecture
//!
//! ```text
//! start_workflow / run_workflow
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ WorkflowEngine  │  step log, final result
//! └────────┬────────┘
//!          │ dispatch(agent, task)
//!          ▼
//! ┌─────────────────┐
//! │   Coordinator   │  ◄── task_response (route)
//! │   (this crate)  │
//! └────────┬────────┘
//!          │ mailbox
//!    ┌─────┴──────┬────────────┐
//!    ▼            ▼            ▼
//!  [LMS]    [Extraction]   [Grading]
//!  Agent       Agent         Agent
//!    │            │            │
//!    └────────────┴────────────┴──► tools guarded by proctor-gateway
//! ```

pub mod config;
pub mod coordinator;
pub mod grade_assignment;
pub mod system;
pub mod telemetry;
pub mod workflow;

pub use config::CoordinatorConfig;
pub use coordinator::Coordinator;
pub use grade_assignment::{EXTRACTION_AGENT, GRADE_ASSIGNMENT, GRADING_AGENT, LMS_AGENT};
pub use system::OrchestrationSystem;
pub use telemetry::{init_tracing, try_init_tracing};
pub use workflow::{
    StepKind, StepRecord, Workflow, WorkflowContext, WorkflowDefinition, WorkflowEngine,
    WorkflowStatusReport, WorkflowStep,
};
