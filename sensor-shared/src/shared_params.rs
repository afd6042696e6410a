// SPDX-License-Identifier: GPL-3.0-only

//! Supervisor-owned parameters mutated by the Control Plane and consumed by
//! the Capture Stage. Control Plane needs to mutate state it does not own;
//! this resolves the cycle with a shared record behind two locks (§9).

use std::sync::Mutex;

use crate::time::truncate;

/// Fixed duration (seconds) used for a calibration segment.
pub const CALIBRATION_DURATION_SECONDS: f64 = 31.0;

struct DurationState {
    clip_duration_seconds: f64,
    sampling_multiplier: f64,
    effective_duration: f64,
    duration_dirty: bool,
}

fn lock_or_recover<T>(mutex: &Mutex<T>, what: &str) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("{what} lock was poisoned, attempting recovery");
            poisoned.into_inner()
        }
    }
}

/// `SharedParameters` protected by `DurationLock` (duration/multiplier state)
/// and `CalibrationLock` (the calibration flag), per §5.
pub struct SharedParameters {
    duration: Mutex<DurationState>,
    calibration_flag: Mutex<bool>,
}

impl SharedParameters {
    #[must_use]
    pub fn new(clip_duration_seconds: f64) -> Self {
        const DEFAULT_MULTIPLIER: f64 = 1.036;
        let effective_duration = truncate(clip_duration_seconds * DEFAULT_MULTIPLIER, 3);
        Self {
            duration: Mutex::new(DurationState {
                clip_duration_seconds,
                sampling_multiplier: DEFAULT_MULTIPLIER,
                effective_duration,
                duration_dirty: false,
            }),
            calibration_flag: Mutex::new(false),
        }
    }

    #[must_use]
    pub fn clip_duration_seconds(&self) -> f64 {
        lock_or_recover(&self.duration, "DurationLock").clip_duration_seconds
    }

    #[must_use]
    pub fn sampling_multiplier(&self) -> f64 {
        lock_or_recover(&self.duration, "DurationLock").sampling_multiplier
    }

    /// Recompute `effective_duration` from `next * sampling_multiplier`,
    /// truncated to 3 decimals, and mark it dirty for Capture to pick up.
    fn update_effective_duration_locked(state: &mut DurationState, next: f64) {
        state.effective_duration = truncate(next * state.sampling_multiplier, 3);
        state.duration_dirty = true;
    }

    /// Called by the Control Plane for `command = "duration"`. Returns
    /// `true` if the value actually changed (and was applied).
    pub fn set_clip_duration(&self, value: f64) -> bool {
        let mut state = lock_or_recover(&self.duration, "DurationLock");
        if (state.clip_duration_seconds - value).abs() < f64::EPSILON {
            return false;
        }
        state.clip_duration_seconds = value;
        Self::update_effective_duration_locked(&mut state, value);
        true
    }

    /// Called by the Control Plane for `command = "multiplier"`. Returns
    /// `true` if the value actually changed (and was applied).
    pub fn set_sampling_multiplier(&self, value: f64) -> bool {
        let mut state = lock_or_recover(&self.duration, "DurationLock");
        if (state.sampling_multiplier - value).abs() < f64::EPSILON {
            return false;
        }
        state.sampling_multiplier = value;
        let clip_duration = state.clip_duration_seconds;
        Self::update_effective_duration_locked(&mut state, clip_duration);
        true
    }

    /// If `duration_dirty` is set, clear it and return the current
    /// `effective_duration`; otherwise `None`. Called by Capture at each
    /// segment boundary (§4.B.1).
    pub fn take_effective_duration_if_dirty(&self) -> Option<f64> {
        let mut state = lock_or_recover(&self.duration, "DurationLock");
        if state.duration_dirty {
            state.duration_dirty = false;
            Some(state.effective_duration)
        } else {
            None
        }
    }

    #[must_use]
    pub fn effective_duration(&self) -> f64 {
        lock_or_recover(&self.duration, "DurationLock").effective_duration
    }

    /// Raise the calibration flag. Idempotent: calling this while already
    /// calibrating leaves the flag set and is not an error (§8).
    pub fn trigger_calibration(&self) {
        *lock_or_recover(&self.calibration_flag, "CalibrationLock") = true;
    }

    #[must_use]
    pub fn is_calibrating(&self) -> bool {
        *lock_or_recover(&self.calibration_flag, "CalibrationLock")
    }

    /// Clear the calibration flag once a calibration segment has completed.
    pub fn clear_calibration(&self) {
        *lock_or_recover(&self.calibration_flag, "CalibrationLock") = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_duration_uses_default_multiplier() {
        let params = SharedParameters::new(10.0);
        assert_eq!(params.effective_duration(), truncate(10.0 * 1.036, 3));
    }

    #[test]
    fn set_clip_duration_marks_dirty_only_on_change() {
        let params = SharedParameters::new(30.0);
        assert!(!params.set_clip_duration(30.0));
        assert!(params.take_effective_duration_if_dirty().is_none());

        assert!(params.set_clip_duration(10.0));
        let picked_up = params.take_effective_duration_if_dirty();
        assert_eq!(picked_up, Some(truncate(10.0 * 1.036, 3)));
        assert!(params.take_effective_duration_if_dirty().is_none());
    }

    #[test]
    fn set_multiplier_rebuilds_effective_duration_from_current_clip_duration() {
        let params = SharedParameters::new(10.0);
        params.take_effective_duration_if_dirty();
        assert!(params.set_sampling_multiplier(2.0));
        let picked_up = params.take_effective_duration_if_dirty();
        assert_eq!(picked_up, Some(truncate(10.0 * 2.0, 3)));
    }

    #[test]
    fn calibration_trigger_is_idempotent() {
        let params = SharedParameters::new(30.0);
        params.trigger_calibration();
        params.trigger_calibration();
        assert!(params.is_calibrating());
        params.clear_calibration();
        assert!(!params.is_calibrating());
    }
}
