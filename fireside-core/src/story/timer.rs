//! Response-window countdown state.
//!
//! Armed when the agent ends a turn with a question; disarmed by the user
//! speaking up or by the window elapsing. Cancellation is cooperative: the
//! expiry task calls [`ResponseTimer::expire`] with the epoch it was armed
//! under, and a stale epoch means the countdown was superseded meanwhile.

use std::sync::Arc;

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct TimerInner {
    active: bool,
    /// Bumped on every arm; lets observers restart countdown rendering.
    activation_key: u64,
    /// Bumped on every arm *and* cancel; guards cooperative expiry.
    epoch: u64,
}

/// Shared response-timer state. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct ResponseTimer {
    inner: Arc<Mutex<TimerInner>>,
}

impl ResponseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the countdown. Returns the epoch to pass to [`expire`](Self::expire)
    /// when the window elapses.
    pub fn arm(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.active = true;
        inner.activation_key += 1;
        inner.epoch += 1;
        inner.epoch
    }

    /// Disarm the countdown (user spoke up, or session reset). Idempotent.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.active {
            inner.active = false;
            inner.epoch += 1;
        }
    }

    /// Auto-disarm after the window elapsed. Only takes effect when `epoch`
    /// still matches the arming epoch; returns whether the timer transitioned.
    pub fn expire(&self, epoch: u64) -> bool {
        let mut inner = self.inner.lock();
        if inner.active && inner.epoch == epoch {
            inner.active = false;
            true
        } else {
            false
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Changes on every arm — observers key countdown animations off this.
    pub fn activation_key(&self) -> u64 {
        self.inner.lock().activation_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_activates_and_bumps_the_key() {
        let timer = ResponseTimer::new();
        assert!(!timer.is_active());

        let key_before = timer.activation_key();
        timer.arm();
        assert!(timer.is_active());
        assert_eq!(timer.activation_key(), key_before + 1);
    }

    #[test]
    fn cancel_beats_expiry() {
        let timer = ResponseTimer::new();
        let epoch = timer.arm();

        timer.cancel();
        assert!(!timer.is_active());

        // The pending expiry arrives late and must be a no-op.
        assert!(!timer.expire(epoch));
        assert!(!timer.is_active());
    }

    #[test]
    fn expiry_disarms_a_still_armed_timer() {
        let timer = ResponseTimer::new();
        let epoch = timer.arm();
        assert!(timer.expire(epoch));
        assert!(!timer.is_active());
    }

    #[test]
    fn rearming_invalidates_the_previous_expiry() {
        let timer = ResponseTimer::new();
        let first = timer.arm();
        let _second = timer.arm();

        // The first countdown's expiry must not kill the second arming.
        assert!(!timer.expire(first));
        assert!(timer.is_active());
    }

    #[test]
    fn cancel_when_inactive_is_a_no_op() {
        let timer = ResponseTimer::new();
        let epoch = timer.arm();
        timer.cancel();
        timer.cancel();
        assert!(!timer.expire(epoch));
    }
}
