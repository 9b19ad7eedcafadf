use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};

use servo_core::sim::SimulatedHand;
use servo_core::{LatestSlot, RawObservation};

pub async fn run_hand_task(
    mut hand: SimulatedHand,
    slot: Arc<LatestSlot<RawObservation>>,
    frame_period: Duration,
    shutdown: Arc<AtomicBool>,
    start_time: Instant,
) {
    let mut frames = interval_at(start_time + frame_period, frame_period);
    frames.set_missed_tick_behavior(MissedTickBehavior::Skip);

    while !shutdown.load(Ordering::Relaxed) {
        frames.tick().await;

        let timestamp_ns = start_time.elapsed().as_nanos() as u64;
        if let Some(observation) = hand.next_observation(timestamp_ns) {
            slot.publish(observation);
        }
    }
}
