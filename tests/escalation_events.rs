use appmon::escalation::EscalationKind;
use appmon::{InstancePresenter, MonitorEvent, PresenterSettings};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn t(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_secs)
}

fn drain_escalation_events(
    rx: &mut tokio::sync::broadcast::Receiver<MonitorEvent>,
) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        match event {
            MonitorEvent::EscalationStarted { .. } | MonitorEvent::EscalationCleared { .. } => {
                events.push(event)
            }
            _ => {}
        }
    }
    events
}

#[tokio::test]
async fn deadlock_detection_emits_one_start_and_one_clear() {
    let presenter = InstancePresenter::new("srv", &PresenterSettings::default());
    let mut rx = presenter.events();

    for (i, value) in [0.0, 0.0, 3.0, 3.0, 0.0].into_iter().enumerate() {
        presenter
            .submit_sample("deadlocked_threads", value, t(i as i64))
            .await;
    }

    let events = drain_escalation_events(&mut rx);
    assert_eq!(events.len(), 2, "exactly two transitions, not five");
    match &events[0] {
        MonitorEvent::EscalationStarted { kind, since } => {
            assert_eq!(*kind, EscalationKind::DeadlockedThreads);
            assert_eq!(*since, t(2), "activation stamped with the triggering sample");
        }
        other => panic!("expected start event, got {other:?}"),
    }
    assert!(matches!(
        events[1],
        MonitorEvent::EscalationCleared {
            kind: EscalationKind::DeadlockedThreads
        }
    ));
}

#[tokio::test]
async fn escalation_ledger_records_one_closed_episode() {
    let presenter = InstancePresenter::new("srv", &PresenterSettings::default());

    presenter.submit_sample("deadlocked_threads", 2.0, t(0)).await;
    presenter.submit_sample("deadlocked_threads", 0.0, t(10)).await;

    let log = presenter.escalation_log().await;
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, EscalationKind::DeadlockedThreads);
    assert_eq!(log[0].started_at, t(0));
    assert_eq!(log[0].cleared_at, Some(t(10)));
}

#[tokio::test]
async fn threshold_escalation_follows_configured_bound() {
    let mut settings = PresenterSettings::default();
    settings.thresholds.total_errors = 10.0;
    let presenter = InstancePresenter::new("srv", &settings);
    let mut rx = presenter.events();

    presenter.submit_sample("total_errors", 10.0, t(0)).await;
    assert!(drain_escalation_events(&mut rx).is_empty(), "at the bound");

    presenter.submit_sample("total_errors", 11.0, t(1)).await;
    let events = drain_escalation_events(&mut rx);
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        MonitorEvent::EscalationStarted {
            kind: EscalationKind::TotalErrors,
            ..
        }
    ));

    let states = presenter.escalations().await;
    let errors = states
        .iter()
        .find(|s| s.kind == EscalationKind::TotalErrors)
        .unwrap();
    assert!(errors.active);
    assert_eq!(errors.since, Some(t(1)));
}

#[tokio::test]
async fn recompute_without_change_stays_silent() {
    let presenter = InstancePresenter::new("srv", &PresenterSettings::default());
    let mut rx = presenter.events();

    presenter.submit_sample("deadlocked_threads", 1.0, t(0)).await;
    drain_escalation_events(&mut rx);

    // Unrelated metric updates recompute the escalation set but must not
    // re-announce the already-active state.
    presenter.submit_sample("heap_used_mb", 100.0, t(1)).await;
    presenter.submit_sample("thread_count", 50.0, t(2)).await;
    assert!(drain_escalation_events(&mut rx).is_empty());
}
