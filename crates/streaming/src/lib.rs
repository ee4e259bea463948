//! Audio chunk distribution from TTS providers to multiple consumers
//!
//! A single publisher (the TTS provider rendering one utterance) fans
//! chunks out to any number of subscribers (avatar lip-sync, remote
//! streamers, local playback), each with its own bounded queue and
//! backpressure policy.

pub mod backpressure;
pub mod channel;
pub mod pcm;

pub use backpressure::{BackpressureStrategy, PublishResult, SubscriberConfig};
pub use channel::{AudioStreamChannel, AudioSubscriber, SubscriberStats, SubscriptionId};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("subscriber '{0}' queue is full")]
    QueueFull(String),

    #[error("channel is closed")]
    Closed,

    #[error("unknown subscription")]
    UnknownSubscription,
}
