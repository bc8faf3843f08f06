//! Data models
//!
//! This module contains the core data structures used throughout the application.

pub mod listenbrainz;
pub mod musicbrainz;
pub mod records;
mod track;
mod user;

pub use listenbrainz::{ListenType, RecordingIdentity, SubmitListens};
pub use musicbrainz::{ArtistCredit, Recording, Release, ReleaseGroup};
pub use records::{PlayRecord, PlayView, StatusRecord};
pub use track::{Artist, Snapshot, Track};
pub use user::{AtprotoSession, LinkedUser, Provider, ProviderCredentials, User};
