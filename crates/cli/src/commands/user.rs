use foms_core::domain::user::{Role, Team, User, UserId};
use foms_core::workflow::WorkflowEngine;
use foms_db::{Repositories, WorkflowService};

use crate::commands::{open_migrated, prepare, CommandResult, StepFailure};

pub fn add(name: &str, role: &str, team: Option<&str>, active: bool) -> CommandResult {
    let name = name.trim();
    if name.is_empty() {
        return CommandResult::failure("user add", "invalid_argument", "user name must not be empty", 2);
    }
    let Some(role) = Role::parse(role) else {
        return CommandResult::failure(
            "user add",
            "invalid_argument",
            format!("unknown role `{role}` (expected admin|manager|staff|viewer)"),
            2,
        );
    };
    let team = match team.map(|raw| Team::parse(raw).ok_or(raw)) {
        None => None,
        Some(Ok(team)) => Some(team),
        Some(Err(raw)) => {
            return CommandResult::failure(
                "user add",
                "invalid_argument",
                format!("unknown team `{raw}`"),
                2,
            );
        }
    };

    let (config, runtime) = match prepare("user add") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result: Result<_, StepFailure> = runtime.block_on(async {
        let pool = open_migrated(&config).await?;
        let service = WorkflowService::new(
            Repositories::sql(pool.clone()),
            WorkflowEngine::new(config.workflow.policy()),
            config.workflow.sla_policy(),
        );
        let saved = service
            .save_user(User { id: UserId(0), name: name.to_string(), role, team, active })
            .await;
        pool.close().await;
        saved.map_err(|error| ("persistence", error.to_string(), 6u8))
    });

    match result {
        Ok(user) => CommandResult::success(
            "user add",
            format!(
                "saved user {} ({}, {}, {})",
                user.id,
                user.name,
                user.role.as_str(),
                user.team.map(|team| team.as_str()).unwrap_or("no team")
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("user add", error_class, message, exit_code)
        }
    }
}
