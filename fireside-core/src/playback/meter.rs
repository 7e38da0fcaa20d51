//! Output level meter tap.
//!
//! A parallel analysis path over whatever is currently playing. The real-time
//! callback pushes a copy of every played sample into a dedicated SPSC ring;
//! a meter thread drains that ring and folds it into per-block RMS readings,
//! so metering can never delay or be delayed by playback.
//!
//! Taps are named: subscribing to the same name twice attaches another
//! receiver to the existing processing lane instead of creating a second one.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::buffering::{AudioConsumer, Consumer};

/// Samples folded into one volume reading.
pub const METER_BLOCK: usize = 256;

/// Broadcast capacity per tap lane.
const BROADCAST_CAP: usize = 256;

/// One instantaneous volume estimate from the playback path.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeEvent {
    /// Monotonically increasing per-lane sequence number.
    pub seq: u64,
    /// RMS of the last block, clamped to [0.0, 1.0].
    pub volume: f32,
}

struct Lane {
    tx: broadcast::Sender<VolumeEvent>,
    block: Vec<f32>,
    seq: u64,
}

impl Lane {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            tx,
            block: Vec::with_capacity(METER_BLOCK),
            seq: 0,
        }
    }

    fn feed(&mut self, samples: &[f32]) {
        for &sample in samples {
            self.block.push(sample);
            if self.block.len() == METER_BLOCK {
                let volume = rms(&self.block).clamp(0.0, 1.0);
                let event = VolumeEvent {
                    seq: self.seq,
                    volume,
                };
                self.seq = self.seq.wrapping_add(1);
                let _ = self.tx.send(event);
                self.block.clear();
            }
        }
    }
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Registry of named metering lanes.
///
/// `MeterTap` is `Send + Sync`; lanes are created lazily on first subscribe
/// or feed.
#[derive(Default)]
pub struct MeterTap {
    lanes: Mutex<HashMap<String, Lane>>,
}

impl MeterTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to volume readings from the named lane, creating the lane if
    /// it does not exist yet. Repeated calls with the same name share one
    /// lane — registration is idempotent.
    pub fn subscribe(&self, name: &str) -> broadcast::Receiver<VolumeEvent> {
        let mut lanes = self.lanes.lock();
        lanes
            .entry(name.to_string())
            .or_insert_with(Lane::new)
            .tx
            .subscribe()
    }

    /// Feed played samples into the named lane. Emits one [`VolumeEvent`] per
    /// completed [`METER_BLOCK`]; partial blocks carry over to the next feed.
    pub fn feed(&self, name: &str, samples: &[f32]) {
        let mut lanes = self.lanes.lock();
        lanes
            .entry(name.to_string())
            .or_insert_with(Lane::new)
            .feed(samples);
    }
}

/// Drain a meter ring into the tap on a dedicated thread until `running`
/// clears. Used by the cpal playback path.
pub fn spawn_meter_thread(
    mut consumer: AudioConsumer,
    tap: Arc<MeterTap>,
    lane: String,
    running: Arc<AtomicBool>,
) {
    std::thread::Builder::new()
        .name("fireside-meter".into())
        .spawn(move || {
            let mut scratch = vec![0f32; METER_BLOCK * 4];
            while running.load(Ordering::Relaxed) {
                let n = consumer.pop_slice(&mut scratch);
                if n == 0 {
                    std::thread::sleep(Duration::from_millis(5));
                    continue;
                }
                tap.feed(&lane, &scratch[..n]);
            }
        })
        .expect("meter thread spawn");
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn emits_one_event_per_block() {
        let tap = MeterTap::new();
        let mut rx = tap.subscribe("out");

        tap.feed("out", &vec![0.5; METER_BLOCK * 2]);

        let first = rx.try_recv().expect("first block");
        let second = rx.try_recv().expect("second block");
        assert_eq!(first.seq, 0);
        assert_eq!(second.seq, 1);
        assert_abs_diff_eq!(first.volume, 0.5, epsilon = 1e-5);
        assert!(rx.try_recv().is_err(), "no event without a full block");
    }

    #[test]
    fn partial_blocks_carry_over() {
        let tap = MeterTap::new();
        let mut rx = tap.subscribe("out");

        tap.feed("out", &vec![0.5; METER_BLOCK - 1]);
        assert!(rx.try_recv().is_err());

        tap.feed("out", &[0.5]);
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn same_name_registers_into_one_lane() {
        let tap = MeterTap::new();
        let mut rx_a = tap.subscribe("out");
        let mut rx_b = tap.subscribe("out");

        tap.feed("out", &vec![0.25; METER_BLOCK]);

        // Both handlers observe the same event with the same sequence —
        // one lane, two subscribers, no duplicate processing node.
        let a = rx_a.try_recv().expect("subscriber a");
        let b = rx_b.try_recv().expect("subscriber b");
        assert_eq!(a.seq, b.seq);
        assert_abs_diff_eq!(a.volume, b.volume);
    }

    #[test]
    fn distinct_names_meter_independently() {
        let tap = MeterTap::new();
        let mut rx_out = tap.subscribe("out");
        let mut rx_aux = tap.subscribe("aux");

        tap.feed("out", &vec![1.0; METER_BLOCK]);

        assert!(rx_out.try_recv().is_ok());
        assert!(rx_aux.try_recv().is_err());
    }

    #[test]
    fn volume_is_clamped_to_unit_range() {
        let tap = MeterTap::new();
        let mut rx = tap.subscribe("out");
        tap.feed("out", &vec![2.0; METER_BLOCK]);
        let event = rx.try_recv().expect("block");
        assert!(event.volume <= 1.0);
    }
}
