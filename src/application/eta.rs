//! 진행률/ETA 추정
//!
//! The total page count is unknown up front, so the estimate assumes the
//! history continues for about 70% of what was already seen. The ratio is
//! capped below 1.0; only the final event reports completion.

use std::time::Duration;

const GROWTH_FACTOR: f64 = 0.7;
const MAX_RATIO_BEFORE_DONE: f64 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EtaEstimate {
    pub progress: f64,
    pub eta_ms: u64,
}

impl EtaEstimate {
    pub const DONE: Self = Self {
        progress: 1.0,
        eta_ms: 0,
    };
}

/// `pages_done` fully processed pages after `elapsed`
pub fn estimate(pages_done: u32, elapsed: Duration) -> EtaEstimate {
    let pages = f64::from(pages_done);
    let est_total = (pages + 1.0 + (pages * GROWTH_FACTOR).floor()).max(2.0);
    let progress = (pages / est_total).min(MAX_RATIO_BEFORE_DONE);

    let eta_ms = if progress > 0.0 {
        (elapsed.as_millis() as f64 * (1.0 / progress - 1.0)).round() as u64
    } else {
        0
    };
    EtaEstimate { progress, eta_ms }
}
