/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use rand::Rng;
use std::time::Duration;

use crate::config::QueueConfig;

/// Exponential retry backoff with subtractive jitter.
///
/// The base delay for retry `n` (zero-based) is
/// `initial * factor^n`, capped at `max`. Jitter removes up to
/// `jitter_ratio` of that delay at random, so a delay never exceeds the cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    initial: Duration,
    max: Duration,
    factor: f64,
    jitter_ratio: f64,
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration, factor: f64, jitter_ratio: f64) -> Self {
        Self {
            initial,
            max,
            factor,
            jitter_ratio: jitter_ratio.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config.initial_retry_delay(),
            config.max_retry_delay(),
            config.backoff_factor(),
            config.retry_jitter_ratio(),
        )
    }

    /// Delay before retry number `retry_count` without jitter.
    pub fn base_delay(&self, retry_count: i32) -> Duration {
        let exp = retry_count.max(0);
        let scaled = self.initial.as_secs_f64() * self.factor.powi(exp);
        let capped = scaled.min(self.max.as_secs_f64());
        if capped.is_finite() && capped > 0.0 {
            Duration::from_secs_f64(capped)
        } else if capped.is_nan() {
            self.max
        } else {
            Duration::ZERO
        }
    }

    /// Delay before retry number `retry_count` with jitter applied.
    pub fn delay(&self, retry_count: i32) -> Duration {
        self.delay_with_rng(retry_count, &mut rand::thread_rng())
    }

    fn delay_with_rng(&self, retry_count: i32, rng: &mut impl Rng) -> Duration {
        let base = self.base_delay(retry_count);
        if self.jitter_ratio == 0.0 || base.is_zero() {
            return base;
        }
        let shave = rng.gen_range(0.0..=self.jitter_ratio);
        base.mul_f64(1.0 - shave)
    }
}
