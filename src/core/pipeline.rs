//! Collaborators shared by the polling scheduler and the ingestion API

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::musicbrainz::MetadataResolver;
use crate::core::publisher::PlayPublisher;
use crate::core::tracker::PlaybackTracker;
use crate::db::{PlayStore, UserStore};
use crate::error::{PiperError, Result};
use crate::models::Track;

#[derive(Clone)]
pub struct Pipeline {
    pub tracker: Arc<PlaybackTracker>,
    pub publisher: Arc<dyn PlayPublisher>,
    pub plays: Arc<dyn PlayStore>,
    pub users: Arc<dyn UserStore>,
    /// `None` when hydration is disabled
    pub resolver: Option<Arc<MetadataResolver>>,
}

impl Pipeline {
    /// Enrich with canonical ids when possible; failures leave the track as is
    pub async fn hydrate(&self, cancel: &CancellationToken, track: Track) -> Track {
        let Some(resolver) = &self.resolver else {
            return track;
        };
        if track.recording_mbid.is_some() {
            return track;
        }

        match resolver.hydrate(cancel, &track).await {
            Ok(hydrated) => hydrated,
            Err(PiperError::NoResults) => {
                debug!("No metadata match for '{}' by {}", track.name, track.artist());
                track
            }
            Err(e) => {
                warn!("Metadata lookup for '{}' failed: {}", track.name, e);
                track
            }
        }
    }

    /// Persist a completed play and append it to the user's repository if linked.
    ///
    /// The play is committed once saved; a failed repository append is logged
    /// and not retried.
    pub async fn record_play(
        &self,
        cancel: &CancellationToken,
        user_id: i64,
        track: Track,
    ) -> Result<Track> {
        let track = self.hydrate(cancel, track).await;
        self.plays.save_track(user_id, &track).await?;

        match self.publisher.submit_play(cancel, user_id, &track).await {
            Ok(()) | Err(PiperError::NoSession(_)) => {}
            Err(e) => warn!(
                "Saved '{}' for user {} but could not append it: {}",
                track.name, user_id, e
            ),
        }
        Ok(track)
    }
}
