use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::models::TrackingEvent;

/// Receives each stage's outcome as soon as it is ready. Called inline by
/// the scheduler, so implementations must be quick and must not panic.
pub trait DataPointSink: Send + Sync {
    fn emit(&self, event: TrackingEvent);
}

impl<F> DataPointSink for F
where
    F: Fn(TrackingEvent) + Send + Sync,
{
    fn emit(&self, event: TrackingEvent) {
        self(event)
    }
}

/// Forwards events into an unbounded channel.
pub struct ChannelSink {
    tx: UnboundedSender<TrackingEvent>,
}

impl ChannelSink {
    pub fn new(tx: UnboundedSender<TrackingEvent>) -> Self {
        Self { tx }
    }
}

impl DataPointSink for ChannelSink {
    fn emit(&self, event: TrackingEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("Dropping {} event, receiver closed", e.0.label());
        }
    }
}
