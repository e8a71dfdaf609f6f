//! Aggregation tests over rows inserted directly into Postgres.

use chrono::{NaiveDate, TimeZone, Utc};
use ingest_core::{Granularity, UNKNOWN_SOURCE};
use integration_tests::{fixtures, setup::TestContext};
use postgres_client::aggregates::{bucket_counts, upsert_buckets};
use postgres_client::dashboard::{list_aggregates, list_summaries};
use postgres_client::sources::get_or_create_source;
use postgres_client::{AggregateFilter, PageRequest};
use worker::{AggregationEngine, AggregationTarget};

const ALL: PageRequest = PageRequest { page: 1, page_size: 100 };

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

#[tokio::test]
async fn test_daily_aggregation_counts_and_summary() {
    let ctx = TestContext::new().await;
    let created = ctx.create_project("daily").await;
    let project_id = created.project.id;
    let web = get_or_create_source(&ctx.store, project_id, "web").await.unwrap();

    let at = |h, m| Utc.with_ymd_and_hms(2026, 3, 1, h, m, 0).unwrap();
    fixtures::insert_events(
        &ctx.store,
        &[
            fixtures::stored_event(project_id, Some(web.id), "page_view", "u1", "s1", at(9, 0)),
            fixtures::stored_event(project_id, Some(web.id), "page_view", "u1", "s1", at(9, 5)),
            fixtures::stored_event(project_id, Some(web.id), "page_view", "u2", "s2", at(13, 0)),
            fixtures::stored_event(project_id, None, "signup", "u2", "s2", at(13, 1)),
            // Next day, outside the window
            fixtures::stored_event(
                project_id,
                None,
                "signup",
                "u3",
                "s3",
                Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap(),
            ),
        ],
    )
    .await;

    let stats = AggregationEngine::new(ctx.store.clone())
        .aggregate_daily(day())
        .await
        .unwrap();
    assert_eq!(stats.granularity, Granularity::Daily);
    assert!(stats.aggregations_created >= 2);
    assert!(stats.summaries_created >= 1);

    let rows = list_aggregates(&ctx.store, project_id, Granularity::Daily, &AggregateFilter::default(), ALL)
        .await
        .unwrap();
    assert_eq!(rows.count, 2);

    let page_views = rows.results.iter().find(|r| r.event_name == "page_view").unwrap();
    assert_eq!(page_views.event_count, 3);
    assert_eq!(page_views.unique_users, 2);
    assert_eq!(page_views.unique_sessions, 2);
    assert_eq!(page_views.event_source_name.as_deref(), Some("web"));
    assert_eq!(page_views.bucket_start, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());

    let signups = rows.results.iter().find(|r| r.event_name == "signup").unwrap();
    assert_eq!(signups.event_count, 1);
    assert!(signups.event_source_id.is_none());

    let summaries = list_summaries(&ctx.store, project_id, Some(day()), Some(day()), ALL)
        .await
        .unwrap();
    assert_eq!(summaries.count, 1);
    let summary = &summaries.results[0];
    assert_eq!(summary.total_events, 4);
    assert_eq!(summary.unique_users, 2);
    assert_eq!(summary.unique_sessions, 2);
    assert_eq!(summary.unique_event_names, 2);
    assert_eq!(summary.top_events[0].event_name, "page_view");
    assert_eq!(summary.top_events[0].event_count, 3);
    assert_eq!(summary.source_breakdown.get("web"), Some(&3));
    assert_eq!(summary.source_breakdown.get(UNKNOWN_SOURCE), Some(&1));
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let ctx = TestContext::new().await;
    let created = ctx.create_project("rerun").await;
    let project_id = created.project.id;

    let at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 12, 0).unwrap();
    fixtures::insert_events(
        &ctx.store,
        &[
            fixtures::stored_event(project_id, None, "click", "u1", "s1", at),
            fixtures::stored_event(project_id, None, "click", "u2", "s2", at),
        ],
    )
    .await;

    let engine = AggregationEngine::new(ctx.store.clone());
    for granularity in Granularity::ALL {
        let target = match granularity {
            Granularity::Daily => AggregationTarget::Daily(day()),
            Granularity::Hourly => AggregationTarget::Hourly(at),
            Granularity::FiveMinute => AggregationTarget::FiveMinute(at),
        };

        engine.run(target).await.unwrap();
        let first = list_aggregates(&ctx.store, project_id, granularity, &AggregateFilter::default(), ALL)
            .await
            .unwrap();

        engine.run(target).await.unwrap();
        let second = list_aggregates(&ctx.store, project_id, granularity, &AggregateFilter::default(), ALL)
            .await
            .unwrap();

        assert_eq!(first.count, 1, "{:?}", granularity);
        assert_eq!(first.results, second.results, "Rerun changed {:?} rows", granularity);
        assert_eq!(first.results[0].event_count, 2);
        assert_eq!(first.results[0].bucket_start, granularity.floor(at));
    }

    let summaries_first = list_summaries(&ctx.store, project_id, None, None, ALL).await.unwrap();
    engine.aggregate_daily(day()).await.unwrap();
    let summaries_second = list_summaries(&ctx.store, project_id, None, None, ALL).await.unwrap();
    assert_eq!(summaries_first.results, summaries_second.results);
}

#[tokio::test]
async fn test_late_events_update_existing_bucket() {
    let ctx = TestContext::new().await;
    let created = ctx.create_project("late").await;
    let project_id = created.project.id;
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap();

    fixtures::insert_events(
        &ctx.store,
        &[fixtures::stored_event(project_id, None, "open", "u1", "s1", at)],
    )
    .await;

    let engine = AggregationEngine::new(ctx.store.clone());
    engine.aggregate_hourly(at).await.unwrap();

    fixtures::insert_events(
        &ctx.store,
        &[fixtures::stored_event(project_id, None, "open", "u9", "s9", at)],
    )
    .await;
    engine.aggregate_hourly(at).await.unwrap();

    let rows = list_aggregates(&ctx.store, project_id, Granularity::Hourly, &AggregateFilter::default(), ALL)
        .await
        .unwrap();
    assert_eq!(rows.count, 1, "Rerun must overwrite, not add a row");
    assert_eq!(rows.results[0].event_count, 2);
    assert_eq!(rows.results[0].unique_users, 2);
}

#[tokio::test]
async fn test_projects_are_aggregated_in_isolation() {
    let ctx = TestContext::new().await;
    let first = ctx.create_project("first").await;
    let second = ctx.create_project("second").await;
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();

    fixtures::insert_events(
        &ctx.store,
        &[
            fixtures::stored_event(first.project.id, None, "shared_name", "u1", "s1", at),
            fixtures::stored_event(first.project.id, None, "shared_name", "u2", "s2", at),
            fixtures::stored_event(second.project.id, None, "shared_name", "u1", "s1", at),
        ],
    )
    .await;

    AggregationEngine::new(ctx.store.clone())
        .aggregate_daily(day())
        .await
        .unwrap();

    let first_rows = list_aggregates(&ctx.store, first.project.id, Granularity::Daily, &AggregateFilter::default(), ALL)
        .await
        .unwrap();
    let second_rows = list_aggregates(&ctx.store, second.project.id, Granularity::Daily, &AggregateFilter::default(), ALL)
        .await
        .unwrap();

    assert_eq!(first_rows.results[0].event_count, 2);
    assert_eq!(second_rows.results[0].event_count, 1);
    assert!(first_rows.results.iter().all(|r| r.project_id == first.project.id));
    assert!(second_rows.results.iter().all(|r| r.project_id == second.project.id));
}

#[tokio::test]
async fn test_empty_window_writes_nothing() {
    let ctx = TestContext::new().await;
    let created = ctx.create_project("empty").await;

    AggregationEngine::new(ctx.store.clone())
        .aggregate_daily(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap())
        .await
        .unwrap();

    let rows = list_aggregates(&ctx.store, created.project.id, Granularity::Daily, &AggregateFilter::default(), ALL)
        .await
        .unwrap();
    assert_eq!(rows.count, 0);
    let summaries = list_summaries(&ctx.store, created.project.id, None, None, ALL).await.unwrap();
    assert_eq!(summaries.count, 0);
}

#[tokio::test]
async fn test_upsert_counts_only_changed_rows() {
    let ctx = TestContext::new().await;
    let created = ctx.create_project("upsert-count").await;
    let project_id = created.project.id;
    let at = Utc.with_ymd_and_hms(2026, 3, 1, 15, 2, 0).unwrap();
    let window = Granularity::FiveMinute.window_containing(at);

    fixtures::insert_events(
        &ctx.store,
        &[
            fixtures::stored_event(project_id, None, "a", "u1", "s1", at),
            fixtures::stored_event(project_id, None, "b", "u1", "s1", at),
        ],
    )
    .await;

    let counts = bucket_counts(&ctx.store, project_id, &window).await.unwrap();
    assert_eq!(counts.len(), 2);
    assert_eq!(upsert_buckets(&ctx.store, project_id, &window, &counts).await.unwrap(), 2);

    // Same metrics again: nothing written
    assert_eq!(upsert_buckets(&ctx.store, project_id, &window, &counts).await.unwrap(), 0);

    // One group changes
    fixtures::insert_events(
        &ctx.store,
        &[fixtures::stored_event(project_id, None, "a", "u2", "s2", at)],
    )
    .await;
    let counts = bucket_counts(&ctx.store, project_id, &window).await.unwrap();
    assert_eq!(upsert_buckets(&ctx.store, project_id, &window, &counts).await.unwrap(), 1);
}
