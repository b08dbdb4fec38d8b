//! Poll watcher scheduling, retry and shutdown tests.
//!
//! All tests run on a paused clock, so sleeps advance virtual time only.

mod common;

use common::{HOUR, ScriptedAuth, ScriptedStore, payload};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use vault_loader::{Loader, LoaderConfig, Values, VaultError, WatcherState};

const SECOND: Duration = Duration::from_secs(1);

struct Harness {
    auth: Arc<ScriptedAuth>,
    store: Arc<ScriptedStore>,
    values: Arc<Mutex<Values>>,
}

impl Harness {
    fn new(auth: ScriptedAuth, store: ScriptedStore) -> Self {
        Self {
            auth: Arc::new(auth),
            store: Arc::new(store),
            values: Values::new().shared(),
        }
    }

    fn config(&self) -> LoaderConfig {
        LoaderConfig::new()
            .with_client(self.store.clone())
            .with_auth_provider(self.auth.clone())
            .with_secret("secret/app")
            .with_renewal(self.values.clone())
    }
}

fn app_store(lease: Duration) -> ScriptedStore {
    ScriptedStore::new().with_secret("secret/app", payload(&[("FOO", json!("BAR"))]), lease)
}

#[tokio::test(start_paused = true)]
async fn refreshes_on_computed_interval() {
    let h = Harness::new(ScriptedAuth::ok(HOUR), app_store(40 * SECOND));
    let loader = Loader::new(h.config().with_initial_delay(10 * SECOND));

    sleep(9 * SECOND).await;
    assert_eq!(h.store.read_count(), 0);

    sleep(2 * SECOND).await;
    assert_eq!(h.store.read_count(), 1);
    assert_eq!(loader.ttl(), Some(30 * SECOND));
    assert_eq!(h.values.lock().await.get_str("FOO"), Some("BAR"));

    // Next cycle is due 30s after the first one, at t=40s.
    sleep(28 * SECOND).await;
    assert_eq!(h.store.read_count(), 1);

    sleep(2 * SECOND).await;
    assert_eq!(h.store.read_count(), 2);
    assert_eq!(loader.poll_watcher().unwrap().state(), WatcherState::Idle);
}

#[tokio::test(start_paused = true)]
async fn uses_interval_from_foreground_load() {
    let h = Harness::new(ScriptedAuth::ok(HOUR), app_store(40 * SECOND));
    let loader = Loader::new(h.config().with_initial_delay(HOUR));

    // The watcher may or may not have armed its timer yet; either way the
    // next cycle is due 30s after this load.
    loader.refresh_shared(&h.values).await.unwrap();
    assert_eq!(h.store.read_count(), 1);

    sleep(31 * SECOND).await;
    assert_eq!(h.store.read_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn foreground_load_rearms_sleeping_watcher() {
    let h = Harness::new(ScriptedAuth::ok(HOUR), app_store(40 * SECOND));
    let loader = Loader::new(h.config().with_initial_delay(HOUR));

    // Let the watcher arm its timer on the initial delay.
    tokio::task::yield_now().await;
    sleep(5 * SECOND).await;
    assert_eq!(h.store.read_count(), 0);

    // t=5: foreground load computes a 30s interval.
    loader.refresh_shared(&h.values).await.unwrap();
    assert_eq!(h.store.read_count(), 1);

    // Background cycle due at t=35, not after the hour-long initial delay.
    sleep(29 * SECOND).await;
    assert_eq!(h.store.read_count(), 1);
    sleep(2 * SECOND).await;
    assert_eq!(h.store.read_count(), 2);

    // And every 30s after that.
    sleep(30 * SECOND).await;
    assert_eq!(h.store.read_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn zero_lease_schedules_next_cycle_immediately() {
    let store = ScriptedStore::new()
        .with_secret("secret/app", payload(&[("FOO", json!("BAR"))]), Duration::ZERO)
        .with_read_delay(SECOND);
    let h = Harness::new(ScriptedAuth::ok(HOUR), store);
    let loader = Loader::new(h.config().with_initial_delay(10 * SECOND));
    let watcher = loader.poll_watcher().unwrap();

    // t=10 first read, committed at t=11 with a zero interval; the second
    // read starts right away instead of after the initial delay.
    sleep(Duration::from_millis(11_500)).await;
    assert_eq!(loader.ttl(), Some(Duration::ZERO));
    assert_eq!(h.store.read_count(), 2);
    assert_eq!(h.values.lock().await.get_str("FOO"), Some("BAR"));

    watcher.stop();
    watcher.wait().await.unwrap();
    assert_eq!(watcher.state(), WatcherState::Stopped);

    let reads = h.store.read_count();
    sleep(10 * SECOND).await;
    assert_eq!(h.store.read_count(), reads);
}

#[tokio::test(start_paused = true)]
async fn retries_then_stops_on_failure() {
    let h = Harness::new(ScriptedAuth::failing(), app_store(HOUR));
    let loader = Loader::new(
        h.config()
            .with_initial_delay(5 * SECOND)
            .with_max_retry(2)
            .with_retry_delay(SECOND)
            .with_stop_on_failure(true),
    );
    let watcher = loader.poll_watcher().unwrap();

    let err = watcher.wait().await.unwrap_err();

    match err {
        VaultError::RetryExhausted { attempts, source } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*source, VaultError::AuthenticationFailed(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(h.auth.calls(), 3);
    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert!(h.values.lock().await.is_empty());
    assert_eq!(loader.ttl(), None);
}

#[tokio::test(start_paused = true)]
async fn retry_delay_spaces_attempts() {
    let h = Harness::new(ScriptedAuth::failing(), app_store(HOUR));
    let _loader = Loader::new(
        h.config()
            .with_initial_delay(5 * SECOND)
            .with_max_retry(2)
            .with_retry_delay(10 * SECOND)
            .with_stop_on_failure(true),
    );

    sleep(6 * SECOND).await;
    assert_eq!(h.auth.calls(), 1);

    sleep(10 * SECOND).await;
    assert_eq!(h.auth.calls(), 2);

    sleep(10 * SECOND).await;
    assert_eq!(h.auth.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn recovers_within_retries() {
    let h = Harness::new(ScriptedAuth::failing_times(1, HOUR), app_store(HOUR));
    let loader = Loader::new(
        h.config()
            .with_initial_delay(SECOND)
            .with_max_retry(2)
            .with_retry_delay(SECOND)
            .with_stop_on_failure(true),
    );

    sleep(3 * SECOND).await;

    assert_eq!(h.auth.calls(), 2);
    assert_eq!(h.values.lock().await.get_str("FOO"), Some("BAR"));
    assert_eq!(loader.ttl(), Some(Duration::from_secs(45 * 60)));
    assert_eq!(loader.poll_watcher().unwrap().state(), WatcherState::Idle);
}

#[tokio::test(start_paused = true)]
async fn keeps_running_without_stop_on_failure() {
    let h = Harness::new(ScriptedAuth::failing(), app_store(HOUR));
    let loader = Loader::new(
        h.config()
            .with_initial_delay(5 * SECOND)
            .with_max_retry(1)
            .with_retry_delay(SECOND),
    );
    let watcher = loader.poll_watcher().unwrap();

    // t=5 first attempt, t=6 retry, then back to idle on the initial delay.
    sleep(7 * SECOND).await;
    assert_eq!(h.auth.calls(), 2);
    assert_eq!(watcher.state(), WatcherState::Idle);

    // t=11 and t=12.
    sleep(6 * SECOND).await;
    assert_eq!(h.auth.calls(), 4);

    h.auth.set_failing(false);
    // t=17.
    sleep(5 * SECOND).await;
    assert_eq!(h.auth.calls(), 5);
    assert_eq!(h.values.lock().await.get_str("FOO"), Some("BAR"));
    assert_ne!(watcher.state(), WatcherState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn failure_reuses_stale_interval() {
    let h = Harness::new(ScriptedAuth::ok(HOUR), app_store(40 * SECOND));
    let loader = Loader::new(
        h.config()
            .with_initial_delay(SECOND)
            .with_max_retry(1)
            .with_retry_delay(SECOND),
    );

    // t=1 success, interval 30s.
    sleep(2 * SECOND).await;
    assert_eq!(h.store.read_count(), 1);
    assert_eq!(loader.ttl(), Some(30 * SECOND));

    h.store.set_failing(true);

    // t=31 fails, t=32 retry fails.
    sleep(31 * SECOND).await;
    assert_eq!(h.store.read_count(), 3);
    assert_eq!(loader.ttl(), Some(30 * SECOND));

    // Stale interval: next attempt at t=62.
    sleep(28 * SECOND).await;
    assert_eq!(h.store.read_count(), 3);
    sleep(2 * SECOND).await;
    assert_eq!(h.store.read_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn stop_ends_the_loop() {
    let h = Harness::new(ScriptedAuth::ok(HOUR), app_store(HOUR));
    let loader = Loader::new(h.config());
    let watcher = loader.poll_watcher().unwrap();

    watcher.stop();
    watcher.wait().await.unwrap();

    assert_eq!(watcher.state(), WatcherState::Stopped);
    assert_eq!(h.auth.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_loader_stops_watcher() {
    let h = Harness::new(ScriptedAuth::ok(HOUR), app_store(HOUR));
    let loader = Loader::new(h.config());
    let mut state = loader.poll_watcher().unwrap().subscribe();

    drop(loader);

    state
        .wait_for(|s| *s == WatcherState::Stopped)
        .await
        .unwrap();
    assert_eq!(h.auth.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn foreground_and_background_cycles_do_not_overlap() {
    let store = ScriptedStore::new()
        .with_secret("secret/app", payload(&[("FOO", json!("BAR"))]), HOUR)
        .with_secret("secret/other", payload(&[("BAZ", json!("QUX"))]), HOUR)
        .with_read_delay(Duration::from_millis(50));
    let h = Harness::new(ScriptedAuth::ok(HOUR), store);
    let loader = Loader::new(
        h.config()
            .with_secret("secret/other")
            .with_initial_delay(Duration::ZERO),
    );

    let foreground = async {
        loader.refresh_shared(&h.values).await.unwrap();
        loader.refresh_shared(&h.values).await.unwrap();
    };
    let background = async {
        while h.store.read_count() < 6 {
            sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::join!(foreground, background);

    assert_eq!(h.store.max_in_flight(), 1);
    assert_eq!(h.auth.calls(), 3);
    assert_eq!(h.values.lock().await.len(), 2);
}
