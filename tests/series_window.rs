use appmon::http::maybe_downsample;
use appmon::series::Sample;
use appmon::{InstancePresenter, PresenterSettings, SampleOutcome};
use chrono::{DateTime, Duration, TimeZone, Utc};

fn t(offset_secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(offset_secs)
}

fn small_window() -> PresenterSettings {
    PresenterSettings {
        history_capacity: 5,
        ..PresenterSettings::default()
    }
}

#[tokio::test]
async fn history_is_bounded_and_ascending() {
    let presenter = InstancePresenter::new("srv", &small_window());
    for i in 0..8 {
        presenter
            .submit_sample("heap_used_mb", i as f64, t(i))
            .await;
    }

    let series = presenter.series("heap_used_mb").await.expect("series");
    assert_eq!(series.len(), 5, "capacity bounds the window");
    assert_eq!(series.first().unwrap().ts, t(3), "oldest evicted");
    assert!(series.windows(2).all(|w| w[0].ts < w[1].ts));
}

#[tokio::test]
async fn stale_samples_do_not_disturb_the_window() {
    let presenter = InstancePresenter::new("srv", &small_window());
    assert_eq!(
        presenter.submit_sample("heap_used_mb", 100.0, t(10)).await,
        SampleOutcome::Applied
    );
    assert_eq!(
        presenter.submit_sample("heap_used_mb", 90.0, t(5)).await,
        SampleOutcome::Stale
    );

    let snapshot = presenter.snapshot().await;
    let heap = snapshot
        .metrics
        .iter()
        .find(|m| m.id == "heap_used_mb")
        .unwrap();
    assert!((heap.current - 100.0).abs() < 1e-9);

    let series = presenter.series("heap_used_mb").await.unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].ts, t(10));
}

#[tokio::test]
async fn same_instant_samples_coalesce() {
    let presenter = InstancePresenter::new("srv", &small_window());
    presenter.submit_sample("heap_used_mb", 100.0, t(10)).await;
    assert_eq!(
        presenter.submit_sample("heap_used_mb", 120.0, t(10)).await,
        SampleOutcome::Coalesced
    );

    let series = presenter.series("heap_used_mb").await.unwrap();
    assert_eq!(series.len(), 1, "no duplicate point for the same instant");
    assert!((series[0].value - 120.0).abs() < 1e-9, "later value wins");
}

#[tokio::test]
async fn unknown_metrics_are_ignored() {
    let presenter = InstancePresenter::new("srv", &small_window());
    assert_eq!(
        presenter.submit_sample("not_a_metric", 1.0, t(0)).await,
        SampleOutcome::UnknownMetric
    );
    assert!(presenter.series("not_a_metric").await.is_none());
}

// Validate that the downsampling helper reduces large vectors when over limit.
#[test]
fn series_downsampling_reduces_point_count() {
    let mut points = Vec::new();
    for i in 0..1500 {
        points.push(Sample::new(t(i), i as f64));
    }
    let (sampled, downsampled) = maybe_downsample(points, 500);
    assert!(downsampled, "expected downsample flag");
    assert!(sampled.len() <= 500, "sampled size <= target");
}

#[test]
fn series_downsampling_is_a_noop_under_limit() {
    let points = vec![Sample::new(t(0), 1.0), Sample::new(t(1), 2.0)];
    let (sampled, downsampled) = maybe_downsample(points, 500);
    assert!(!downsampled);
    assert_eq!(sampled.len(), 2);
}
