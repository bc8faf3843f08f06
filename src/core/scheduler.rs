//! Periodic polling of linked users, one scheduler per provider

use chrono::Utc;
use dashmap::DashSet;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::pipeline::Pipeline;
use crate::core::tracker::Action;
use crate::error::{PiperError, Result};
use crate::models::{LinkedUser, Provider, ProviderCredentials, Snapshot};
use crate::providers::ProviderAdapter;

/// Per-cycle tally, mostly for logging
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub polled: usize,
    pub failed: usize,
    /// Users whose previous poll was still running
    pub skipped: usize,
}

enum Outcome {
    Polled,
    Failed,
    Skipped,
}

/// Marks a user as being polled until dropped
struct InFlight<'a> {
    set: &'a DashSet<i64>,
    user_id: i64,
}

impl<'a> InFlight<'a> {
    fn acquire(set: &'a DashSet<i64>, user_id: i64) -> Option<Self> {
        set.insert(user_id).then_some(Self { set, user_id })
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.user_id);
    }
}

pub struct Scheduler {
    adapter: Arc<dyn ProviderAdapter>,
    pipeline: Pipeline,
    interval: Duration,
    max_concurrency: usize,
    in_flight: DashSet<i64>,
}

impl Scheduler {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        pipeline: Pipeline,
        interval: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            adapter,
            pipeline,
            interval,
            max_concurrency: max_concurrency.max(1),
            in_flight: DashSet::new(),
        }
    }

    pub fn provider(&self) -> Provider {
        self.adapter.provider()
    }

    /// Tick until `shutdown` fires; the first cycle starts immediately
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Polling {} every {:?}", self.provider(), self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => break,
            }

            // cycles may overlap; per-user work is serialized by the in-flight set
            let scheduler = Arc::clone(&self);
            let cancel = shutdown.child_token();
            tokio::spawn(async move {
                let report = scheduler.run_cycle(&cancel).await;
                debug!(
                    "{} cycle: {} polled, {} failed, {} skipped",
                    scheduler.provider(),
                    report.polled,
                    report.failed,
                    report.skipped
                );
            });
        }

        info!("Stopped polling {}", self.provider());
    }

    /// Poll every linked user once
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> CycleReport {
        let mut report = CycleReport::default();

        let users = match self.pipeline.users.linked_users(self.provider()).await {
            Ok(users) => users,
            Err(e) => {
                error!("Failed to list {} users: {}", self.provider(), e);
                return report;
            }
        };

        let outcomes: Vec<Outcome> = stream::iter(users)
            .map(|user| self.poll_user(cancel, user))
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                Outcome::Polled => report.polled += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::Skipped => report.skipped += 1,
            }
        }
        report
    }

    async fn poll_user(&self, cancel: &CancellationToken, user: LinkedUser) -> Outcome {
        let Some(_guard) = InFlight::acquire(&self.in_flight, user.user_id) else {
            debug!(
                "{} poll for user {} still running, skipping",
                self.provider(),
                user.user_id
            );
            return Outcome::Skipped;
        };

        match self.poll(cancel, &user).await {
            Ok(()) => Outcome::Polled,
            Err(PiperError::Cancelled) => Outcome::Failed,
            Err(e) => {
                warn!(
                    "{} poll failed for user {} ({}): {}",
                    self.provider(),
                    user.user_id,
                    user.handle,
                    e
                );
                Outcome::Failed
            }
        }
    }

    async fn poll(&self, cancel: &CancellationToken, user: &LinkedUser) -> Result<()> {
        let snapshot = self.fetch(cancel, user).await?;

        if cancel.is_cancelled() {
            return Err(PiperError::Cancelled);
        }

        let key = (user.user_id, self.provider());
        let action = self.pipeline.tracker.advance(key, snapshot, Utc::now());
        self.execute(cancel, user.user_id, action).await
    }

    /// Fetch a snapshot, refreshing credentials at most once
    async fn fetch(&self, cancel: &CancellationToken, user: &LinkedUser) -> Result<Option<Snapshot>> {
        let mut credentials = user.credentials.clone();
        let mut refreshed = false;

        if self.adapter.needs_refresh(&credentials) {
            credentials = self.renew(cancel, user, &credentials).await?;
            refreshed = true;
        }

        match self.adapter.fetch_snapshot(cancel, &credentials).await {
            Err(PiperError::AuthExpired(reason)) if !refreshed => {
                debug!(
                    "{} auth expired for user {}: {}",
                    self.provider(),
                    user.user_id,
                    reason
                );
                let renewed = self.renew(cancel, user, &credentials).await?;
                match self.adapter.fetch_snapshot(cancel, &renewed).await {
                    Err(PiperError::AuthExpired(reason)) => {
                        self.require_reauth(user).await;
                        Err(PiperError::AuthExpired(reason))
                    }
                    other => other,
                }
            }
            Err(PiperError::AuthExpired(reason)) => {
                self.require_reauth(user).await;
                Err(PiperError::AuthExpired(reason))
            }
            other => other,
        }
    }

    async fn renew(
        &self,
        cancel: &CancellationToken,
        user: &LinkedUser,
        credentials: &ProviderCredentials,
    ) -> Result<ProviderCredentials> {
        match self.adapter.refresh_credentials(cancel, credentials).await {
            Ok(renewed) => {
                self.pipeline
                    .users
                    .update_credentials(user.user_id, &renewed)
                    .await?;
                debug!("Refreshed {} credentials for user {}", self.provider(), user.user_id);
                Ok(renewed)
            }
            Err(PiperError::AuthExpired(reason)) => {
                self.require_reauth(user).await;
                Err(PiperError::AuthExpired(reason))
            }
            Err(e) => Err(e),
        }
    }

    async fn require_reauth(&self, user: &LinkedUser) {
        info!(
            "User {} must relink {}, pausing polling",
            user.user_id,
            self.provider()
        );
        self.pipeline.tracker.forget(&(user.user_id, self.provider()));
        if let Err(e) = self
            .pipeline
            .users
            .flag_reauth(user.user_id, self.provider())
            .await
        {
            error!("Failed to flag user {} for reauth: {}", user.user_id, e);
        }
    }

    /// Run the tracker's side effects; now-playing failures only drop this update
    async fn execute(&self, cancel: &CancellationToken, user_id: i64, action: Action) -> Result<()> {
        let publisher = &self.pipeline.publisher;

        if let Some(track) = &action.publish_now_playing {
            match publisher.publish_now_playing(cancel, user_id, track).await {
                Ok(()) | Err(PiperError::NoSession(_)) => {}
                Err(e) => warn!("Now-playing update for user {} dropped: {}", user_id, e),
            }
        }

        if action.clear_now_playing {
            match publisher.clear_now_playing(cancel, user_id).await {
                Ok(()) | Err(PiperError::NoSession(_)) => {}
                Err(e) => warn!("Clearing now-playing for user {} failed: {}", user_id, e),
            }
        }

        if let Some(track) = action.stamp {
            let track = self.pipeline.record_play(cancel, user_id, track).await?;
            info!(
                "Stamped '{}' by {} for user {}",
                track.name,
                track.artist(),
                user_id
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackerConfig;
    use crate::core::tracker::PlaybackTracker;
    use crate::models::{Artist, Track};
    use crate::testutil::{MemoryStore, Published, RecordingPublisher};
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Spotify-shaped fake keyed by access token
    #[derive(Default)]
    struct FakeAdapter {
        playing: Mutex<HashMap<String, Track>>,
        failing: Mutex<Vec<String>>,
        fetches: Mutex<Vec<String>>,
    }

    impl FakeAdapter {
        fn play(&self, token: &str, name: &str) {
            let mut track = Track::new(name, vec![Artist::new("Band")]);
            track.url = format!("https://open.spotify.com/track/{}", name);
            track.duration_ms = 200_000;
            self.playing.lock().insert(token.to_string(), track);
        }
    }

    #[async_trait]
    impl ProviderAdapter for FakeAdapter {
        fn provider(&self) -> Provider {
            Provider::Spotify
        }

        async fn fetch_snapshot(
            &self,
            _cancel: &CancellationToken,
            credentials: &ProviderCredentials,
        ) -> Result<Option<Snapshot>> {
            let ProviderCredentials::Spotify { access_token, .. } = credentials else {
                panic!("unexpected credentials");
            };
            self.fetches.lock().push(access_token.clone());

            if access_token == "stale" {
                return Err(PiperError::AuthExpired("401".into()));
            }
            if self.failing.lock().contains(access_token) {
                return Err(PiperError::TransientNetwork("timeout".into()));
            }
            Ok(self
                .playing
                .lock()
                .get(access_token)
                .cloned()
                .map(Snapshot::playing))
        }

        fn needs_refresh(&self, credentials: &ProviderCredentials) -> bool {
            matches!(credentials, ProviderCredentials::Spotify { expires_at, .. } if *expires_at < Utc::now())
        }

        async fn refresh_credentials(
            &self,
            _cancel: &CancellationToken,
            credentials: &ProviderCredentials,
        ) -> Result<ProviderCredentials> {
            match credentials {
                ProviderCredentials::Spotify { refresh_token, .. } if refresh_token == "good" => {
                    Ok(spotify("fresh", "good", 1))
                }
                _ => Err(PiperError::AuthExpired("invalid_grant".into())),
            }
        }
    }

    fn spotify(access: &str, refresh: &str, expires_in_hours: i64) -> ProviderCredentials {
        ProviderCredentials::Spotify {
            access_token: access.into(),
            refresh_token: refresh.into(),
            expires_at: Utc::now() + ChronoDuration::hours(expires_in_hours),
        }
    }

    struct Harness {
        adapter: Arc<FakeAdapter>,
        store: Arc<MemoryStore>,
        publisher: Arc<RecordingPublisher>,
        scheduler: Arc<Scheduler>,
    }

    fn harness() -> Harness {
        let adapter = Arc::new(FakeAdapter::default());
        let store = Arc::new(MemoryStore::default());
        let publisher = Arc::new(RecordingPublisher::default());
        let pipeline = Pipeline {
            tracker: Arc::new(PlaybackTracker::new(TrackerConfig::default())),
            publisher: publisher.clone(),
            plays: store.clone(),
            users: store.clone(),
            resolver: None,
        };
        let scheduler = Arc::new(Scheduler::new(
            adapter.clone(),
            pipeline,
            Duration::from_secs(3600),
            4,
        ));
        Harness {
            adapter,
            store,
            publisher,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_user() {
        let h = harness();
        for (handle, token) in [("a", "tok-a"), ("b", "tok-b"), ("c", "tok-c")] {
            let user = h.store.add_user(handle);
            h.store.link(user.id, spotify(token, "good", 1));
            h.adapter.play(token, handle);
        }
        h.adapter.failing.lock().push("tok-b".into());

        let report = h.scheduler.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.polled, 2);
        assert_eq!(report.failed, 1);

        let mut events = h.publisher.events();
        events.sort_by_key(|e| format!("{:?}", e));
        assert_eq!(
            events,
            vec![
                Published::NowPlaying(1, "a".into()),
                Published::NowPlaying(3, "c".into())
            ]
        );
    }

    #[tokio::test]
    async fn test_refresh_once_on_auth_expired() {
        let h = harness();
        let user = h.store.add_user("a");
        h.store.link(user.id, spotify("stale", "good", 1));
        h.adapter.play("fresh", "song");

        let report = h.scheduler.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.polled, 1);
        assert_eq!(*h.adapter.fetches.lock(), vec!["stale", "fresh"]);
        let Some(ProviderCredentials::Spotify { access_token, .. }) =
            h.store.credentials(user.id, Provider::Spotify)
        else {
            panic!("spotify link missing");
        };
        assert_eq!(access_token, "fresh");
        assert!(!h.store.needs_reauth(user.id, Provider::Spotify));
    }

    #[tokio::test]
    async fn test_failed_refresh_flags_reauth() {
        let h = harness();
        let user = h.store.add_user("a");
        h.store.link(user.id, spotify("stale", "revoked", 1));

        let report = h.scheduler.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.failed, 1);
        assert!(h.store.needs_reauth(user.id, Provider::Spotify));
        assert!(h.store.credentials(user.id, Provider::Spotify).is_none());

        // flagged links are no longer polled
        let report = h.scheduler.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report, CycleReport::default());
    }

    #[tokio::test]
    async fn test_expired_token_refreshed_before_fetch() {
        let h = harness();
        let user = h.store.add_user("a");
        h.store.link(user.id, spotify("old", "good", -1));
        h.adapter.play("fresh", "song");

        h.scheduler.run_cycle(&CancellationToken::new()).await;
        assert_eq!(*h.adapter.fetches.lock(), vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_user_still_in_flight_is_skipped() {
        let h = harness();
        let user = h.store.add_user("a");
        h.store.link(user.id, spotify("tok", "good", 1));
        h.scheduler.in_flight.insert(user.id);

        let report = h.scheduler.run_cycle(&CancellationToken::new()).await;
        assert_eq!(report.skipped, 1);
        assert!(h.adapter.fetches.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stamp_saves_and_submits() {
        let h = harness();
        let user = h.store.add_user("a");
        let track = Track::new("Song", vec![Artist::new("Band")]);

        h.scheduler
            .execute(
                &CancellationToken::new(),
                user.id,
                Action {
                    stamp: Some(track.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(h.store.saved(user.id), vec![track.clone()]);
        assert_eq!(h.publisher.plays(), vec![track]);
    }

    #[tokio::test]
    async fn test_nothing_playing_clears_once() {
        let h = harness();
        let user = h.store.add_user("a");
        h.store.link(user.id, spotify("tok", "good", 1));
        h.adapter.play("tok", "song");
        let cancel = CancellationToken::new();

        h.scheduler.run_cycle(&cancel).await;
        h.adapter.playing.lock().clear();
        h.scheduler.run_cycle(&cancel).await;
        h.scheduler.run_cycle(&cancel).await;

        assert_eq!(
            h.publisher.events(),
            vec![
                Published::NowPlaying(user.id, "song".into()),
                Published::Cleared(user.id)
            ]
        );
    }

    #[tokio::test]
    async fn test_first_cycle_runs_immediately() {
        let h = harness();
        let user = h.store.add_user("a");
        h.store.link(user.id, spotify("tok", "good", 1));
        h.adapter.play("tok", "song");

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(h.scheduler.clone().run(shutdown.clone()));

        for _ in 0..50 {
            if !h.publisher.events().is_empty() {
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(h.publisher.events(), vec![Published::NowPlaying(user.id, "song".into())]);
    }
}
