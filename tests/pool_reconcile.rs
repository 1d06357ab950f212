use std::collections::BTreeSet;

use appmon::pools::PoolEvent;
use appmon::{InstancePresenter, MonitorEvent, PresenterSettings};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn t(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_secs)
}

fn names(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

#[tokio::test]
async fn discovery_ticks_drive_membership_diffs() {
    let presenter = InstancePresenter::new("srv", &PresenterSettings::default());

    let events = presenter
        .submit_pool_snapshot(&names(&["jdbc/orders", "jdbc/users"]))
        .await;
    assert_eq!(
        events,
        vec![
            PoolEvent::Added("jdbc/orders".into()),
            PoolEvent::Added("jdbc/users".into()),
        ]
    );

    // Same set again: silent.
    let events = presenter
        .submit_pool_snapshot(&names(&["jdbc/orders", "jdbc/users"]))
        .await;
    assert!(events.is_empty());

    let events = presenter
        .submit_pool_snapshot(&names(&["jdbc/users", "jdbc/billing"]))
        .await;
    assert_eq!(
        events,
        vec![
            PoolEvent::Added("jdbc/billing".into()),
            PoolEvent::Removed("jdbc/orders".into()),
        ]
    );

    let mut pools = presenter.pool_names().await;
    pools.sort();
    assert_eq!(pools, vec!["jdbc/billing".to_string(), "jdbc/users".to_string()]);
}

#[tokio::test]
async fn structural_events_reach_the_broadcast_stream() {
    let presenter = InstancePresenter::new("srv", &PresenterSettings::default());
    let mut rx = presenter.events();

    presenter.submit_pool_snapshot(&names(&["jdbc/orders"])).await;
    presenter.submit_pool_snapshot(&names(&[])).await;

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            MonitorEvent::PoolAdded { pool } => seen.push(format!("+{pool}")),
            MonitorEvent::PoolRemoved { pool } => seen.push(format!("-{pool}")),
            _ => {}
        }
    }
    assert_eq!(seen, vec!["+jdbc/orders".to_string(), "-jdbc/orders".to_string()]);
}

#[tokio::test]
async fn pool_metrics_flow_through_the_bundle() {
    let presenter = InstancePresenter::new("srv", &PresenterSettings::default());
    presenter.submit_pool_snapshot(&names(&["jdbc/orders"])).await;

    presenter
        .submit_pool_sample("jdbc/orders", "busy_connections", 3.0, t(0))
        .await;
    presenter
        .submit_pool_sample("jdbc/orders", "busy_connections", 5.0, t(1))
        .await;

    let series = presenter
        .pool_series("jdbc/orders", "busy_connections")
        .await
        .expect("pool series");
    assert_eq!(series.len(), 2);
    assert!((series.last().unwrap().value - 5.0).abs() < 1e-9);
}

#[tokio::test]
async fn reappearing_pool_starts_with_empty_history() {
    let presenter = InstancePresenter::new("srv", &PresenterSettings::default());

    presenter.submit_pool_snapshot(&names(&["jdbc/orders"])).await;
    presenter
        .submit_pool_sample("jdbc/orders", "busy_connections", 3.0, t(0))
        .await;

    presenter.submit_pool_snapshot(&names(&[])).await;
    presenter.submit_pool_snapshot(&names(&["jdbc/orders"])).await;

    let series = presenter
        .pool_series("jdbc/orders", "busy_connections")
        .await
        .expect("pool series");
    assert!(series.is_empty(), "fresh entity, not a resurrection");
}

#[tokio::test]
async fn samples_for_unknown_pools_are_dropped() {
    use appmon::SampleOutcome;

    let presenter = InstancePresenter::new("srv", &PresenterSettings::default());
    let outcome = presenter
        .submit_pool_sample("jdbc/ghost", "busy_connections", 1.0, t(0))
        .await;
    assert_eq!(outcome, SampleOutcome::UnknownPool);
}
