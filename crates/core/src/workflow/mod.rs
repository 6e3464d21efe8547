//! Order workflow: stages, quest approval gates and the engine that moves an
//! order between them while recording what changed.

pub mod engine;
pub mod quest;
pub mod revert;
pub mod stage;

pub use engine::{
    StageTransition, TransitionRequest, WorkflowEngine, WorkflowError, WorkflowOutcome,
    WorkflowPolicy,
};
pub use quest::{ApprovalMode, AssigneePolicy, Quest, QuestEvaluation, QuestStatus};
pub use revert::RevertError;
pub use stage::{Stage, TransitionKind, MAIN_LINE};
