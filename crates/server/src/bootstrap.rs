use foms_core::config::{AppConfig, ConfigError, LoadOptions};
use foms_core::workflow::WorkflowEngine;
use foms_db::{connect_with_settings, migrations, DbPool, Repositories, WorkflowService};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub service: WorkflowService,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

#[cfg(test)]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let service = WorkflowService::new(
        Repositories::sql(db_pool.clone()),
        WorkflowEngine::new(config.workflow.policy()),
        config.workflow.sla_policy(),
    );
    info!(
        event_name = "system.bootstrap.workflow_ready",
        correlation_id = "bootstrap",
        auto_advance = config.workflow.auto_advance,
        drawing_sla_hours = config.workflow.drawing_sla_hours,
        "workflow service initialized"
    );

    Ok(Application { config, db_pool, service })
}

#[cfg(test)]
mod tests {
    use foms_core::config::{ConfigOverrides, LoadOptions};
    use foms_core::domain::order::NewOrder;
    use foms_core::domain::user::{Role, User, UserId};
    use foms_core::workflow::Stage;
    use foms_db::OperationContext;

    use crate::bootstrap::{bootstrap, BootstrapError};

    fn overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_on_a_non_sqlite_database_url() {
        let result = bootstrap(overrides("postgres://localhost/foms")).await;

        let error = result.err().expect("error");
        assert!(matches!(error, BootstrapError::Config(_)));
        assert!(error.to_string().contains("database.url"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_and_wires_the_workflow_service() {
        let app = bootstrap(overrides("sqlite::memory:")).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' \
               AND name IN ('users', 'orders', 'order_events', 'order_tasks', 'security_logs')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("schema query");
        assert_eq!(table_count, 5, "bootstrap should expose the order workflow tables");

        let admin = app
            .service
            .save_user(User {
                id: UserId(0),
                name: "Seo".to_string(),
                role: Role::Admin,
                team: None,
                active: true,
            })
            .await
            .expect("save user");
        let created = app
            .service
            .create_order(
                &OperationContext::new(admin.id),
                NewOrder { customer_name: "Yoon".to_string(), ..NewOrder::default() },
            )
            .await
            .expect("create order");
        assert_eq!(created.order.stage(), Stage::Received);

        app.db_pool.close().await;
    }
}
