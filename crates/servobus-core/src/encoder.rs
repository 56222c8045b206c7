//! Multi-turn position tracking
//!
//! The encoder reports an angle that wraps at `total_steps`. Feeding every
//! raw sample to an [`EncoderUnwrapper`] yields an unbounded position, as long
//! as the axis moves less than half a turn between samples.

use tracing::trace;

use crate::values::MAX_POSITION;

/// Accumulates wrapping encoder samples into a continuous position
#[derive(Debug, Clone)]
pub struct EncoderUnwrapper {
    last_raw: i32,
    position: i32,
    total_steps: i32,
    initialized: bool,
}

impl Default for EncoderUnwrapper {
    fn default() -> Self {
        Self::new(0, MAX_POSITION)
    }
}

impl EncoderUnwrapper {
    /// Start tracking at `initial_position` for an encoder whose largest raw value is `max_position`
    pub fn new(initial_position: i32, max_position: u16) -> Self {
        Self {
            last_raw: 0,
            position: initial_position,
            total_steps: max_position as i32 + 1,
            initialized: false,
        }
    }

    /// Feed one raw sample
    pub fn update(&mut self, raw: u16) {
        let raw = raw as i32;
        if !self.initialized {
            self.last_raw = raw;
            self.initialized = true;
            return;
        }

        let mut delta = raw - self.last_raw;
        if delta > self.total_steps / 2 {
            delta -= self.total_steps;
        } else if delta < -self.total_steps / 2 {
            delta += self.total_steps;
        }

        self.position += delta;
        self.last_raw = raw;
        trace!(raw, delta, position = self.position, "encoder sample");
    }

    /// Accumulated position in steps
    pub fn position(&self) -> i32 {
        self.position
    }

    /// Accumulated position in degrees
    pub fn degrees(&self) -> f32 {
        self.position as f32 * (360.0 / self.total_steps as f32)
    }

    /// Steps per revolution
    pub fn total_steps(&self) -> i32 {
        self.total_steps
    }

    /// True once a first sample has been seen
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Set the position and wait for a fresh first sample
    pub fn reset(&mut self, position: i32) {
        self.position = position;
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_only_primes() {
        let mut enc = EncoderUnwrapper::new(100, 4095);
        enc.update(3000);
        assert!(enc.is_initialized());
        assert_eq!(enc.position(), 100);
    }

    #[test]
    fn test_forward_wrap() {
        let mut enc = EncoderUnwrapper::default();
        enc.update(4000);
        enc.update(50);
        // 4000 -> 4095 -> 0 -> 50 = +146
        assert_eq!(enc.position(), 146);
    }

    #[test]
    fn test_backward_wrap() {
        let mut enc = EncoderUnwrapper::default();
        enc.update(50);
        enc.update(4000);
        assert_eq!(enc.position(), -146);
    }

    #[test]
    fn test_multi_turn_accumulates() {
        let mut enc = EncoderUnwrapper::default();
        for raw in [0u16, 1024, 2048, 3072, 0, 1024, 2048, 3072, 0] {
            enc.update(raw);
        }
        assert_eq!(enc.position(), 2 * 4096);
        assert_eq!(enc.degrees(), 720.0);
    }

    #[test]
    fn test_reset() {
        let mut enc = EncoderUnwrapper::default();
        enc.update(10);
        enc.update(20);
        enc.reset(0);
        assert!(!enc.is_initialized());
        enc.update(3000);
        assert_eq!(enc.position(), 0);
        enc.update(3010);
        assert_eq!(enc.position(), 10);
    }
}
