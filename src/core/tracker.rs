//! Per-user playback state machine
//!
//! Turns a stream of provider snapshots into now-playing, cleared and stamp
//! events. No I/O happens here; the scheduler executes the returned [`Action`].

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::TrackerConfig;
use crate::models::{Provider, Snapshot, Track};

/// State is kept per user and provider
pub type TrackerKey = (i64, Provider);

#[derive(Debug, Clone, PartialEq)]
pub struct PlayState {
    pub track: Track,
    pub accumulated_ms: i64,
    pub is_paused: bool,
    pub has_stamped: bool,
    pub last_poll: DateTime<Utc>,
}

/// Side effects requested by one [`PlaybackTracker::advance`] call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Action {
    pub publish_now_playing: Option<Track>,
    pub clear_now_playing: bool,
    /// Completed listen to persist and submit
    pub stamp: Option<Track>,
}

impl Action {
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.publish_now_playing.is_none() && !self.clear_now_playing && self.stamp.is_none()
    }
}

pub struct PlaybackTracker {
    config: TrackerConfig,
    states: DashMap<TrackerKey, PlayState>,
}

impl PlaybackTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            states: DashMap::new(),
        }
    }

    /// Copy of the current state for `key`
    #[cfg(test)]
    pub fn state(&self, key: &TrackerKey) -> Option<PlayState> {
        self.states.get(key).map(|s| s.value().clone())
    }

    /// Drop the state for `key`, e.g. when a link is removed
    pub fn forget(&self, key: &TrackerKey) {
        self.states.remove(key);
    }

    /// Feed one poll result for `key` observed at `now`.
    ///
    /// Calls for the same key must be serialized by the caller; the entry lock
    /// only protects against concurrent access from other keys' shards.
    pub fn advance(&self, key: TrackerKey, snapshot: Option<Snapshot>, now: DateTime<Utc>) -> Action {
        let mut action = Action::default();

        let Some(snapshot) = snapshot else {
            if let Some(mut state) = self.states.get_mut(&key) {
                if !state.is_paused {
                    state.is_paused = true;
                    action.clear_now_playing = true;
                }
                state.last_poll = now;
            }
            return action;
        };

        let is_playing = snapshot.is_playing;
        let capped_progress = snapshot.track.progress_ms.clamp(0, self.config.max_skip_delta_ms);

        let (mut entry, created) = match self.states.entry(key) {
            Entry::Occupied(occupied) => (occupied.into_ref(), false),
            Entry::Vacant(vacant) => {
                let state = vacant.insert(PlayState {
                    track: snapshot.track.clone(),
                    accumulated_ms: capped_progress,
                    is_paused: !is_playing,
                    has_stamped: false,
                    last_poll: now,
                });
                (state, true)
            }
        };
        let state = entry.value_mut();

        if created {
            announce(&mut action, &snapshot);
        } else if !state.track.is_same_track(&snapshot.track) {
            state.track = snapshot.track.clone();
            state.accumulated_ms = capped_progress;
            state.has_stamped = false;
            state.is_paused = !is_playing;
            announce(&mut action, &snapshot);
        } else {
            // paused polls accrue too; max_delta_ms bounds each step
            let elapsed = (now - state.last_poll).num_milliseconds().max(0);
            state.accumulated_ms = state
                .accumulated_ms
                .saturating_add(elapsed.min(self.config.max_delta_ms));

            match (state.is_paused, is_playing) {
                (true, true) => action.publish_now_playing = Some(snapshot.track.clone()),
                (false, false) => action.clear_now_playing = true,
                _ => {}
            }
            state.is_paused = !is_playing;
            state.track.progress_ms = snapshot.track.progress_ms;
        }

        let duration = state.track.duration_ms;
        if duration > 0 {
            while state.accumulated_ms >= duration {
                state.accumulated_ms -= duration;
                state.has_stamped = false;
                state.track.timestamp = now;
            }
        }

        let threshold = (duration / 2).max(self.config.min_stamp_ms);
        if state.accumulated_ms > threshold && !state.has_stamped {
            state.has_stamped = true;
            let mut stamped = state.track.clone();
            stamped.has_stamped = true;
            action.stamp = Some(stamped);
        }

        state.last_poll = now;
        action
    }
}

/// Publish when playing, otherwise clear the now-playing slot
fn announce(action: &mut Action, snapshot: &Snapshot) {
    if snapshot.is_playing {
        action.publish_now_playing = Some(snapshot.track.clone());
    } else {
        action.clear_now_playing = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Artist;
    use chrono::{Duration, TimeZone};

    const KEY: TrackerKey = (1, Provider::Spotify);

    fn tracker() -> PlaybackTracker {
        PlaybackTracker::new(TrackerConfig::default())
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn track(url: &str, duration_ms: i64, progress_ms: i64) -> Track {
        let mut track = Track::new("Song", vec![Artist::new("Band")]);
        track.url = url.to_string();
        track.duration_ms = duration_ms;
        track.progress_ms = progress_ms;
        track.timestamp = t0();
        track
    }

    fn seed(tracker: &PlaybackTracker, key: TrackerKey, state: PlayState) {
        tracker.states.insert(key, state);
    }

    #[test]
    fn test_first_poll_caps_progress() {
        let tracker = tracker();
        let action = tracker.advance(KEY, Some(Snapshot::playing(track("a", 240_000, 125_000))), t0());

        assert!(action.publish_now_playing.is_some());
        assert!(!action.clear_now_playing);
        assert!(action.stamp.is_none());
        assert_eq!(tracker.state(&KEY).unwrap().accumulated_ms, 30_000);
    }

    #[test]
    fn test_stamp_after_threshold() {
        let tracker = tracker();
        let mut now = t0();
        tracker.advance(KEY, Some(Snapshot::playing(track("a", 240_000, 125_000))), now);

        let mut stamps = 0;
        for _ in 0..6 {
            now += Duration::seconds(100);
            let action = tracker.advance(KEY, Some(Snapshot::playing(track("a", 240_000, 130_000))), now);
            let state = tracker.state(&KEY).unwrap();
            if action.stamp.is_some() {
                stamps += 1;
                assert!(state.accumulated_ms > 120_000);
            } else if !state.has_stamped {
                assert!(state.accumulated_ms <= 120_000);
            }
            assert!(action.publish_now_playing.is_none());
        }
        assert_eq!(stamps, 1);
    }

    #[test]
    fn test_stamp_payload_marked() {
        let tracker = tracker();
        seed(
            &tracker,
            KEY,
            PlayState {
                track: track("a", 240_000, 0),
                accumulated_ms: 110_000,
                is_paused: false,
                has_stamped: false,
                last_poll: t0(),
            },
        );
        let action = tracker.advance(
            KEY,
            Some(Snapshot::playing(track("a", 240_000, 0))),
            t0() + Duration::seconds(15),
        );
        let stamped = action.stamp.unwrap();
        assert!(stamped.has_stamped);
        assert_eq!(stamped.url, "a");
    }

    #[test]
    fn test_no_stamp_at_exact_threshold() {
        let tracker = tracker();
        seed(
            &tracker,
            KEY,
            PlayState {
                track: track("a", 240_000, 0),
                accumulated_ms: 100_000,
                is_paused: false,
                has_stamped: false,
                last_poll: t0(),
            },
        );

        let action = tracker.advance(
            KEY,
            Some(Snapshot::playing(track("a", 240_000, 0))),
            t0() + Duration::seconds(20),
        );
        assert_eq!(tracker.state(&KEY).unwrap().accumulated_ms, 120_000);
        assert!(action.stamp.is_none());

        let action = tracker.advance(
            KEY,
            Some(Snapshot::playing(track("a", 240_000, 0))),
            t0() + Duration::milliseconds(20_001),
        );
        assert!(action.stamp.is_some());
    }

    #[test]
    fn test_short_track_uses_minimum_threshold() {
        let tracker = tracker();
        seed(
            &tracker,
            KEY,
            PlayState {
                track: track("a", 40_000, 0),
                accumulated_ms: 25_000,
                is_paused: false,
                has_stamped: false,
                last_poll: t0(),
            },
        );
        let action = tracker.advance(
            KEY,
            Some(Snapshot::playing(track("a", 40_000, 0))),
            t0() + Duration::seconds(5),
        );
        assert!(action.stamp.is_none());

        let action = tracker.advance(
            KEY,
            Some(Snapshot::playing(track("a", 40_000, 0))),
            t0() + Duration::seconds(6),
        );
        assert!(action.stamp.is_some());
    }

    #[test]
    fn test_loop_resets_stamp() {
        let tracker = tracker();
        seed(
            &tracker,
            KEY,
            PlayState {
                track: track("a", 100_000, 0),
                accumulated_ms: 105_000,
                is_paused: false,
                has_stamped: true,
                last_poll: t0(),
            },
        );

        tracker.advance(
            KEY,
            Some(Snapshot::playing(track("a", 100_000, 5_000))),
            t0() + Duration::seconds(1),
        );

        let state = tracker.state(&KEY).unwrap();
        assert!(state.accumulated_ms < 100_000);
        assert_eq!(state.accumulated_ms, 6_000);
        assert!(!state.has_stamped);
    }

    #[test]
    fn test_loop_property() {
        for (duration, accumulated) in [(100_000, 100_000), (60_000, 250_000), (1_000, 9_999)] {
            let tracker = tracker();
            seed(
                &tracker,
                KEY,
                PlayState {
                    track: track("a", duration, 0),
                    accumulated_ms: accumulated,
                    is_paused: true,
                    has_stamped: true,
                    last_poll: t0(),
                },
            );
            tracker.advance(KEY, Some(Snapshot::paused(track("a", duration, 0))), t0());

            let state = tracker.state(&KEY).unwrap();
            assert!(state.accumulated_ms < duration);
            assert!(!state.has_stamped);
        }
    }

    #[test]
    fn test_pause_clears_without_identity_reset() {
        let tracker = tracker();
        tracker.advance(KEY, Some(Snapshot::playing(track("a", 240_000, 0))), t0());
        tracker.advance(
            KEY,
            Some(Snapshot::playing(track("a", 240_000, 10_000))),
            t0() + Duration::seconds(10),
        );

        let action = tracker.advance(
            KEY,
            Some(Snapshot::paused(track("a", 240_000, 10_000))),
            t0() + Duration::seconds(20),
        );

        assert!(action.clear_now_playing);
        assert!(action.publish_now_playing.is_none());
        let state = tracker.state(&KEY).unwrap();
        assert!(state.is_paused);
        assert_eq!(state.accumulated_ms, 20_000);
    }

    #[test]
    fn test_paused_polls_accrue_capped_delta() {
        let tracker = tracker();
        tracker.advance(KEY, Some(Snapshot::paused(track("a", 240_000, 0))), t0());

        let action = tracker.advance(
            KEY,
            Some(Snapshot::paused(track("a", 240_000, 0))),
            t0() + Duration::minutes(10),
        );
        assert!(action.is_empty());
        assert_eq!(tracker.state(&KEY).unwrap().accumulated_ms, 30_000);

        let action = tracker.advance(
            KEY,
            Some(Snapshot::playing(track("a", 240_000, 0))),
            t0() + Duration::minutes(10) + Duration::seconds(5),
        );
        assert!(action.publish_now_playing.is_some());
        assert_eq!(tracker.state(&KEY).unwrap().accumulated_ms, 35_000);
    }

    #[test]
    fn test_resume_publishes() {
        let tracker = tracker();
        tracker.advance(KEY, Some(Snapshot::paused(track("a", 240_000, 0))), t0());
        let action = tracker.advance(
            KEY,
            Some(Snapshot::playing(track("a", 240_000, 0))),
            t0() + Duration::seconds(10),
        );
        assert!(action.publish_now_playing.is_some());
        assert!(!tracker.state(&KEY).unwrap().is_paused);
    }

    #[test]
    fn test_steady_playback_is_quiet() {
        let tracker = tracker();
        tracker.advance(KEY, Some(Snapshot::playing(track("a", 240_000, 0))), t0());
        let action = tracker.advance(
            KEY,
            Some(Snapshot::playing(track("a", 240_000, 5_000))),
            t0() + Duration::seconds(5),
        );
        assert!(action.is_empty());
    }

    #[test]
    fn test_new_track_while_paused_waits_for_resume() {
        let tracker = tracker();
        tracker.advance(KEY, Some(Snapshot::playing(track("a", 240_000, 0))), t0());
        let action = tracker.advance(
            KEY,
            Some(Snapshot::paused(track("b", 200_000, 0))),
            t0() + Duration::seconds(10),
        );
        assert!(action.publish_now_playing.is_none());
        assert!(action.clear_now_playing);

        let action = tracker.advance(
            KEY,
            Some(Snapshot::playing(track("b", 200_000, 0))),
            t0() + Duration::seconds(20),
        );
        assert_eq!(action.publish_now_playing.map(|t| t.url), Some("b".to_string()));
    }

    #[test]
    fn test_track_change_resets() {
        let tracker = tracker();
        seed(
            &tracker,
            KEY,
            PlayState {
                track: track("a", 240_000, 0),
                accumulated_ms: 200_000,
                is_paused: false,
                has_stamped: true,
                last_poll: t0(),
            },
        );
        let action = tracker.advance(
            KEY,
            Some(Snapshot::playing(track("b", 240_000, 50_000))),
            t0() + Duration::seconds(15),
        );

        assert!(action.publish_now_playing.is_some());
        let state = tracker.state(&KEY).unwrap();
        assert_eq!(state.track.url, "b");
        assert_eq!(state.accumulated_ms, 30_000);
        assert!(!state.has_stamped);
    }

    #[test]
    fn test_nothing_playing() {
        let tracker = tracker();
        assert!(tracker.advance(KEY, None, t0()).is_empty());
        assert!(tracker.state(&KEY).is_none());

        tracker.advance(KEY, Some(Snapshot::playing(track("a", 240_000, 0))), t0());
        let action = tracker.advance(KEY, None, t0() + Duration::seconds(5));
        assert!(action.clear_now_playing);
        assert!(tracker.state(&KEY).unwrap().is_paused);

        let action = tracker.advance(KEY, None, t0() + Duration::seconds(10));
        assert!(action.is_empty());
    }

    #[test]
    fn test_users_are_isolated() {
        let tracker = tracker();
        let alice = (1, Provider::Spotify);
        let bob = (2, Provider::Spotify);
        let alice_lastfm = (1, Provider::LastFm);

        tracker.advance(alice, Some(Snapshot::playing(track("a", 240_000, 0))), t0());
        tracker.advance(bob, Some(Snapshot::playing(track("b", 240_000, 0))), t0());
        let before = tracker.state(&bob).unwrap();

        tracker.advance(alice, None, t0() + Duration::seconds(5));
        tracker.advance(alice_lastfm, Some(Snapshot::playing(track("c", 1, 0))), t0());

        assert_eq!(tracker.state(&bob).unwrap(), before);
        assert!(tracker.state(&alice).unwrap().is_paused);
    }
}
