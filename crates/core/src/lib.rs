pub mod config;
pub mod document;
pub mod domain;
pub mod errors;
pub mod permissions;
pub mod sla;
pub mod workflow;

pub use document::{ScheduleKind, StructuredData};
pub use domain::event::{EventPayload, NewOrderEvent, OrderEvent, OrderEventId, OrderEventType};
pub use domain::order::{NewOrder, Order, OrderId};
pub use domain::security::{NewSecurityLog, SecurityAction, SecurityLog};
pub use domain::task::{NewOrderTask, OrderTask, OrderTaskId, TaskStatus};
pub use domain::user::{Role, Team, User, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use permissions::{can_modify_domain, resolve_access, AccessGrant, Domain};
pub use sla::SlaPolicy;
pub use workflow::{
    RevertError, Stage, TransitionRequest, WorkflowEngine, WorkflowError, WorkflowOutcome,
    WorkflowPolicy,
};
