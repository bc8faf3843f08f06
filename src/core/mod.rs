//! Core library functions for piper

pub mod cleaning;
pub mod ingest;
pub mod musicbrainz;
pub mod pipeline;
pub mod publisher;
pub mod release;
pub mod scheduler;
pub mod tracker;
pub mod xrpc;

pub use ingest::Ingestor;
pub use musicbrainz::{MetadataResolver, MusicBrainzClient};
pub use pipeline::Pipeline;
pub use publisher::RepositoryPublisher;
pub use scheduler::Scheduler;
pub use tracker::PlaybackTracker;
pub use xrpc::XrpcRepository;
