use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use servo_core::sim::SimulatedHand;
use servo_core::{LatestSlot, RawObservation};

/// Camera + detector stand-in. Publishes each detection into the slot at the
/// frame rate; frames without a hand publish nothing.
pub fn run_hand_thread(
    mut hand: SimulatedHand,
    slot: Arc<LatestSlot<RawObservation>>,
    frame_period: Duration,
    shutdown: Arc<AtomicBool>,
    start_time: Instant,
) {
    let mut next_frame = start_time;

    while !shutdown.load(Ordering::Relaxed) {
        next_frame += frame_period;
        let now = Instant::now();
        if now < next_frame {
            thread::sleep(next_frame - now);
        }

        let timestamp_ns = Instant::now().duration_since(start_time).as_nanos() as u64;
        if let Some(observation) = hand.next_observation(timestamp_ns) {
            slot.publish(observation);
        }
    }
}
