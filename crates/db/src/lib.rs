pub mod connection;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{connect_with_settings, DbPool};
pub use repositories::{ChangeSet, CommitReceipt, Repositories, RepositoryError};
pub use service::{OperationContext, OrderUpdate, QuestSummary, SweepReport, WorkflowService};
