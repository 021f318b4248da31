// Snapshot stream - Finite, real-time paced sequence of generated samples
use crate::domain::generator::{generate_sample_at, GeneratorProfile};
use crate::domain::snapshot::TelemetrySnapshot;
use chrono::{TimeDelta, Utc};
use futures::stream::Stream;
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Yield a snapshot, pause `interval`, repeat while less than `duration` has
/// elapsed since the stream was first polled.
///
/// Timestamps follow the stream's own timer, so consecutive snapshots are
/// strictly increasing. Dropping the stream cancels it.
pub fn snapshot_stream<R>(
    mut rng: R,
    profile: GeneratorProfile,
    duration: Duration,
    interval: Duration,
) -> impl Stream<Item = TelemetrySnapshot> + Send
where
    R: Rng + Send + 'static,
{
    let interval = interval.max(MIN_INTERVAL);

    async_stream::stream! {
        let started = Instant::now();
        let wall_start = Utc::now();

        while started.elapsed() < duration {
            let offset = TimeDelta::from_std(started.elapsed()).unwrap_or_else(|_| TimeDelta::zero());
            yield generate_sample_at(&mut rng, &profile, wall_start + offset);
            tokio::time::sleep(interval).await;
        }
    }
}
