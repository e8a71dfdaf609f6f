//! Retention sweep tests.

use chrono::{TimeDelta, Utc};
use ingest_core::Granularity;
use integration_tests::{fixtures, setup::TestContext};
use postgres_client::dashboard::{list_aggregates, list_summaries};
use postgres_client::events::count_events;
use postgres_client::{AggregateFilter, NewProject, PageRequest};
use worker::{AggregationEngine, RetentionSweeper};

const ALL: PageRequest = PageRequest { page: 1, page_size: 100 };

#[tokio::test]
async fn test_dry_run_counts_without_deleting() {
    let ctx = TestContext::new().await;
    let created = ctx
        .create_project_with(NewProject::new("dry-run").with_retention_days(30))
        .await;
    let project_id = created.project.id;
    let now = Utc::now();

    fixtures::insert_events(
        &ctx.store,
        &[
            fixtures::stored_event(project_id, None, "old", "u1", "s1", now - TimeDelta::days(45)),
            fixtures::stored_event(project_id, None, "old", "u1", "s1", now - TimeDelta::days(31)),
            fixtures::stored_event(project_id, None, "new", "u1", "s1", now - TimeDelta::days(1)),
        ],
    )
    .await;

    let stats = RetentionSweeper::new(ctx.store.clone())
        .dry_run()
        .run_at(now)
        .await
        .unwrap();
    assert!(stats.dry_run);

    let ours = stats
        .per_project
        .iter()
        .find(|p| p.project_id == project_id)
        .unwrap();
    assert_eq!(ours.retention_days, 30);
    assert_eq!(ours.deleted, 2);
    assert_eq!(ours.cutoff, now - TimeDelta::days(30));
    assert_eq!(count_events(&ctx.store, project_id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_sweep_deletes_only_expired_raw_events() {
    let ctx = TestContext::new().await;
    let created = ctx
        .create_project_with(NewProject::new("sweep").with_retention_days(7))
        .await;
    let project_id = created.project.id;
    let now = Utc::now();
    let old = now - TimeDelta::days(10);

    fixtures::insert_events(
        &ctx.store,
        &[
            fixtures::stored_event(project_id, None, "expired", "u1", "s1", old),
            fixtures::stored_event(project_id, None, "kept", "u2", "s2", now - TimeDelta::days(2)),
        ],
    )
    .await;

    AggregationEngine::new(ctx.store.clone())
        .aggregate_daily(old.date_naive())
        .await
        .unwrap();

    let stats = RetentionSweeper::new(ctx.store.clone()).run_at(now).await.unwrap();
    assert!(!stats.dry_run);
    let ours = stats
        .per_project
        .iter()
        .find(|p| p.project_id == project_id)
        .unwrap();
    assert_eq!(ours.deleted, 1);
    assert_eq!(count_events(&ctx.store, project_id).await.unwrap(), 1);

    // Aggregates and summaries outlive the raw rows
    let rows = list_aggregates(&ctx.store, project_id, Granularity::Daily, &AggregateFilter::default(), ALL)
        .await
        .unwrap();
    assert_eq!(rows.count, 1);
    assert_eq!(rows.results[0].event_name, "expired");
    let summaries = list_summaries(&ctx.store, project_id, None, None, ALL).await.unwrap();
    assert_eq!(summaries.count, 1);

    // A second sweep has nothing left to do
    let again = RetentionSweeper::new(ctx.store.clone()).run_at(now).await.unwrap();
    let ours = again.per_project.iter().find(|p| p.project_id == project_id).unwrap();
    assert_eq!(ours.deleted, 0);
}

#[tokio::test]
async fn test_projects_use_their_own_retention() {
    let ctx = TestContext::new().await;
    let short = ctx
        .create_project_with(NewProject::new("short").with_retention_days(3))
        .await;
    let long = ctx
        .create_project_with(NewProject::new("long").with_retention_days(90))
        .await;
    let now = Utc::now();
    let at = now - TimeDelta::days(5);

    fixtures::insert_events(
        &ctx.store,
        &[
            fixtures::stored_event(short.project.id, None, "e", "u", "s", at),
            fixtures::stored_event(long.project.id, None, "e", "u", "s", at),
        ],
    )
    .await;

    RetentionSweeper::new(ctx.store.clone()).run_at(now).await.unwrap();

    assert_eq!(count_events(&ctx.store, short.project.id).await.unwrap(), 0);
    assert_eq!(count_events(&ctx.store, long.project.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_failed_project_fails_the_sweep_after_the_rest() {
    let ctx = TestContext::new().await;
    let broken = ctx
        .create_project_with(NewProject::new("broken").with_retention_days(7))
        .await;
    let healthy = ctx
        .create_project_with(NewProject::new("healthy").with_retention_days(7))
        .await;
    let now = Utc::now();
    let old = now - TimeDelta::days(10);

    fixtures::insert_events(
        &ctx.store,
        &[
            fixtures::stored_event(broken.project.id, None, "e", "u", "s", old),
            fixtures::stored_event(healthy.project.id, None, "e", "u", "s", old),
        ],
    )
    .await;

    // Deletes of the broken project's rows raise inside Postgres
    let suffix = broken.project.id.simple().to_string();
    let function = format!("reject_delete_{suffix}");
    sqlx::query(&format!(
        "CREATE FUNCTION {function}() RETURNS trigger AS $$ \
         BEGIN RAISE EXCEPTION 'delete rejected'; END; $$ LANGUAGE plpgsql"
    ))
    .execute(ctx.store.pool())
    .await
    .unwrap();
    sqlx::query(&format!(
        "CREATE TRIGGER {function} BEFORE DELETE ON events FOR EACH ROW \
         WHEN (OLD.project_id = '{}') EXECUTE FUNCTION {function}()",
        broken.project.id
    ))
    .execute(ctx.store.pool())
    .await
    .unwrap();

    let err = RetentionSweeper::new(ctx.store.clone())
        .run_at(now)
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains(&broken.project.id.to_string()), "{msg}");
    assert!(!msg.contains(&healthy.project.id.to_string()), "{msg}");

    // The other project was still swept
    assert_eq!(count_events(&ctx.store, healthy.project.id).await.unwrap(), 0);
    assert_eq!(count_events(&ctx.store, broken.project.id).await.unwrap(), 1);

    sqlx::query(&format!("DROP TRIGGER {function} ON events"))
        .execute(ctx.store.pool())
        .await
        .unwrap();
    sqlx::query(&format!("DROP FUNCTION {function}()"))
        .execute(ctx.store.pool())
        .await
        .unwrap();
}
