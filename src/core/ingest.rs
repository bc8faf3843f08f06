//! ListenBrainz-compatible listen ingestion
//!
//! Items are validated and stored one by one; a bad item is reported with its
//! index and field while the rest of the batch is still processed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::pipeline::Pipeline;
use crate::error::{PiperError, Result};
use crate::models::{ListenType, SubmitListens, User};

/// Upper bound on listens in one `import` submission
pub const MAX_LISTENS_PER_REQUEST: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemError {
    pub index: usize,
    pub field: String,
    pub message: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionOutcome {
    pub accepted: usize,
    pub errors: Vec<ItemError>,
}

fn item_error(index: usize, err: PiperError) -> ItemError {
    match err {
        PiperError::Validation { field, message } => ItemError {
            index,
            field: format!("payload[{}].{}", index, field),
            message,
        },
        other => ItemError {
            index,
            field: format!("payload[{}]", index),
            message: format!("not stored: {}", other),
        },
    }
}

/// Reject submissions whose shape is wrong as a whole
fn validate_batch(submission: &SubmitListens) -> Result<()> {
    let count = submission.payload.len();
    if count == 0 {
        return Err(PiperError::validation("payload", "must contain at least one listen"));
    }

    match submission.listen_type {
        ListenType::Single | ListenType::PlayingNow if count != 1 => Err(PiperError::validation(
            "payload",
            "must contain exactly one listen for this listen_type",
        )),
        ListenType::Import if count > MAX_LISTENS_PER_REQUEST => Err(PiperError::validation(
            "payload",
            format!("at most {} listens per request", MAX_LISTENS_PER_REQUEST),
        )),
        _ => Ok(()),
    }
}

pub struct Ingestor {
    pipeline: Pipeline,
}

impl Ingestor {
    pub fn new(pipeline: Pipeline) -> Self {
        Self { pipeline }
    }

    /// Apply a submission for `user`; only a malformed batch fails as a whole
    pub async fn submit(
        &self,
        cancel: &CancellationToken,
        user: &User,
        submission: SubmitListens,
        now: DateTime<Utc>,
    ) -> Result<SubmissionOutcome> {
        validate_batch(&submission)?;

        let mut outcome = SubmissionOutcome::default();
        let playing_now = submission.listen_type == ListenType::PlayingNow;

        for (index, listen) in submission.payload.into_iter().enumerate() {
            if playing_now && listen.listened_at.is_some() {
                outcome.errors.push(ItemError {
                    index,
                    field: format!("payload[{}].listened_at", index),
                    message: "not allowed for playing_now".to_string(),
                });
                continue;
            }

            let converted = listen
                .timestamp(now)
                .and_then(|ts| listen.track_metadata.to_track(ts));
            let (track, identity) = match converted {
                Ok(converted) => converted,
                Err(e) => {
                    outcome.errors.push(item_error(index, e));
                    continue;
                }
            };

            if playing_now {
                match self
                    .pipeline
                    .publisher
                    .publish_now_playing(cancel, user.id, &track)
                    .await
                {
                    Ok(()) | Err(PiperError::NoSession(_)) => {}
                    Err(e) => warn!("Playing-now for {} not published: {}", user.handle, e),
                }
                outcome.accepted += 1;
                continue;
            }

            debug!(
                "Ingesting '{}' for {} ({:?})",
                track.name, user.handle, identity
            );
            match self.pipeline.record_play(cancel, user.id, track).await {
                Ok(_) => outcome.accepted += 1,
                Err(e) => {
                    warn!("Listen {} for {} not stored: {}", index, user.handle, e);
                    outcome.errors.push(item_error(index, e));
                }
            }
        }

        Ok(outcome)
    }
}
