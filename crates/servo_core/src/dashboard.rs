use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use nalgebra::Vector3;

use crate::ControlMode;

/// What the debug overlay shows for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickSnapshot {
    pub tick_index: u64,
    pub timestamp: u64,
    pub mode: ControlMode,
    pub target: Vector3<f64>,
    pub command: Vector3<f64>,
    pub measured: Option<Vector3<f64>>,
    pub stale: bool,
    pub feedback_missing: bool,
    pub dispatch_dropped: bool,
}

impl TickSnapshot {
    pub fn error(&self) -> Option<f64> {
        self.measured.map(|m| (self.target - m).norm())
    }
}

/// Bounded buffer feeding the debug overlay. Cloning shares the buffer, so a
/// UI thread can hold one handle while the loop writes through another.
#[derive(Debug, Clone)]
pub struct DebugOverlay {
    enabled: Arc<AtomicBool>,
    data: Arc<Mutex<VecDeque<TickSnapshot>>>,
    max_size: usize,
}

impl DebugOverlay {
    pub fn new(max_size: usize) -> Self {
        Self {
            enabled: Arc::new(AtomicBool::new(false)),
            data: Arc::new(Mutex::new(VecDeque::with_capacity(max_size))),
            max_size,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Flips the overlay and returns the new state.
    pub fn toggle(&self) -> bool {
        !self.enabled.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn add(&self, item: TickSnapshot) {
        if self.max_size == 0 {
            return;
        }
        let mut buffer = self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if buffer.len() == self.max_size {
            buffer.pop_front();
        }
        buffer.push_back(item);
    }

    pub fn get_recent(&self, count: usize) -> Vec<TickSnapshot> {
        let buffer = self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let start = buffer.len().saturating_sub(count);
        buffer.iter().skip(start).copied().collect()
    }

    pub fn clear(&self) {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
