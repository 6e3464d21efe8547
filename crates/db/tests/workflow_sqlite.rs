use chrono::{Duration, NaiveDate, Utc};

use foms_core::document::ScheduleKind;
use foms_core::domain::event::OrderEventType;
use foms_core::domain::order::NewOrder;
use foms_core::domain::user::{Role, Team, User, UserId};
use foms_core::errors::ApplicationError;
use foms_core::sla::SlaPolicy;
use foms_core::workflow::{Stage, TransitionRequest, WorkflowEngine, WorkflowPolicy};
use foms_db::{
    connect_with_settings, migrations, OperationContext, Repositories, WorkflowService,
};

async fn sqlite_service(policy: WorkflowPolicy) -> (WorkflowService, foms_db::DbPool) {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    migrations::run_pending(&pool).await.expect("migrations");
    let service = WorkflowService::new(
        Repositories::sql(pool.clone()),
        WorkflowEngine::new(policy),
        SlaPolicy::default(),
    );
    (service, pool)
}

async fn user(service: &WorkflowService, name: &str, role: Role, team: Option<Team>) -> OperationContext {
    let saved = service
        .save_user(User { id: UserId(0), name: name.to_string(), role, team, active: true })
        .await
        .expect("save user");
    OperationContext::new(saved.id)
}

#[tokio::test]
async fn stage_history_and_events_survive_a_round_trip_through_sqlite() {
    let (service, pool) = sqlite_service(WorkflowPolicy::default()).await;
    let manager = user(&service, "Baek", Role::Manager, None).await;
    let sales = user(&service, "Nam", Role::Staff, Some(Team::Sales)).await;

    let order_id = service
        .create_order(&manager, NewOrder { customer_name: "Ryu".to_string(), ..NewOrder::default() })
        .await
        .expect("create order")
        .order
        .id;

    service.approve_team(&sales, order_id, Team::Sales).await.expect("sales approval");
    let moved = service
        .transition_stage(&sales, order_id, &TransitionRequest::to(Stage::Happycall))
        .await
        .expect("advance");
    assert_eq!(moved.order.version, 3);

    let stored = service.get_order(order_id).await.expect("reload");
    assert_eq!(stored.stage(), Stage::Happycall);
    assert_eq!(stored.structured_data.workflow.history.len(), 2);
    assert_eq!(stored.structured_data.quests.len(), 2);

    let events = service.list_events(order_id).await.expect("events");
    let types: Vec<_> = events.iter().map(|event| event.event_type).collect();
    assert_eq!(
        types,
        vec![
            OrderEventType::OrderCreated,
            OrderEventType::QuestCreated,
            OrderEventType::QuestApproved,
            OrderEventType::QuestCompleted,
            OrderEventType::StageChanged,
            OrderEventType::QuestCreated,
        ]
    );

    pool.close().await;
}

#[tokio::test]
async fn auto_advance_moves_the_order_when_the_quest_completes() {
    let (service, pool) = sqlite_service(WorkflowPolicy { auto_advance: true }).await;
    let manager = user(&service, "Moon", Role::Admin, None).await;

    let order_id = service
        .create_order(&manager, NewOrder { customer_name: "Kang".to_string(), ..NewOrder::default() })
        .await
        .expect("create order")
        .order
        .id;
    let approved = service.approve_team(&manager, order_id, Team::Sales).await.expect("approve");

    assert_eq!(approved.order.stage(), Stage::Happycall);
    assert!(approved.events.iter().any(|event| event.event_type == OrderEventType::StageChanged));

    pool.close().await;
}

#[tokio::test]
async fn schedule_reminders_follow_the_date_and_revert_conflicts_are_reported() {
    let (service, pool) = sqlite_service(WorkflowPolicy::default()).await;
    let manager = user(&service, "Shin", Role::Manager, None).await;

    let order_id = service
        .create_order(&manager, NewOrder { customer_name: "Hwang".to_string(), ..NewOrder::default() })
        .await
        .expect("create order")
        .order
        .id;

    let soon = Utc::now().date_naive() + Duration::days(3);
    let scheduled = service
        .set_schedule_date(&manager, order_id, ScheduleKind::Measurement, Some(soon))
        .await
        .expect("schedule measurement");
    assert_eq!(scheduled.tasks.len(), 2, "D-4 and D-3 thresholds are crossed");

    let date_event = scheduled
        .events
        .iter()
        .find(|event| event.event_type == OrderEventType::MeasurementDateChanged)
        .expect("date event")
        .id;

    let later = NaiveDate::from_ymd_opt(2030, 1, 15).expect("date");
    service
        .set_schedule_date(&manager, order_id, ScheduleKind::Measurement, Some(later))
        .await
        .expect("move date");

    let conflict = service
        .revert_event(&manager, order_id, date_event, Some("undo"))
        .await
        .expect_err("value moved on since the event");
    assert!(matches!(
        conflict.into_interface("req-9"),
        foms_core::InterfaceError::Conflict { .. }
    ));

    let stored = service.get_order(order_id).await.expect("reload");
    assert_eq!(stored.structured_data.schedule.measurement.date, Some(later));

    pool.close().await;
}

#[tokio::test]
async fn unknown_actor_is_not_found() {
    let (service, pool) = sqlite_service(WorkflowPolicy::default()).await;

    let error = service
        .create_order(&OperationContext::new(UserId(404)), NewOrder::default())
        .await
        .expect_err("no such user");
    assert!(matches!(error, ApplicationError::NotFound { entity: "user", .. }));

    pool.close().await;
}
