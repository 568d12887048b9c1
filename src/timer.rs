use std::ops::Mul;
use std::time::Duration;

use crate::rng::SeededRng;

/// Retransmission timer for one confirmable message, RFC 7252 section 4.2.
///
/// The first timeout is a random value between `ack_timeout` and
/// `ack_timeout * random_factor`, then doubled for every retransmission.
pub struct ExponentialBackoff {
    rto: Duration,
    left: usize,
}

impl ExponentialBackoff {
    pub fn new(
        ack_timeout: Duration,
        random_factor: f32,
        max_retransmit: usize,
        rng: &mut SeededRng,
    ) -> Self {
        let factor = rng.range_f32(1.0, random_factor.max(1.0));
        Self {
            rto: ack_timeout.mul_f32(factor),
            left: max_retransmit,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn attempt(&mut self) {
        let (n, overflow) = self.left.overflowing_sub(1);

        if overflow {
            return;
        }

        self.left = n;
        self.rto = self.rto.mul(2);
    }

    pub fn can_retry(&self) -> bool {
        self.left > 0
    }
}
