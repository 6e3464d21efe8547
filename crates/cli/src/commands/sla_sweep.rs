use chrono::Utc;
use foms_core::workflow::WorkflowEngine;
use foms_db::{Repositories, WorkflowService};

use crate::commands::{open_migrated, prepare, CommandResult, StepFailure};

/// One pass of the time-based task rules over every open order.
pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("sla-sweep") {
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
        let report = service.sla_sweep(Utc::now()).await;
        pool.close().await;
        report.map_err(|error| ("sla_sweep", error.to_string(), 6u8))
    });

    match result {
        Ok(report) if report.orders_failed > 0 => CommandResult::failure(
            "sla-sweep",
            "partial_failure",
            format!(
                "scanned {} open orders, created {} tasks, {} orders failed",
                report.orders_scanned, report.tasks_created, report.orders_failed
            ),
            7,
        ),
        Ok(report) => CommandResult::success(
            "sla-sweep",
            format!(
                "scanned {} open orders, created {} tasks",
                report.orders_scanned, report.tasks_created
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("sla-sweep", error_class, message, exit_code)
        }
    }
}
