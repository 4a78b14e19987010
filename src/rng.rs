//! Seeded randomness facade
//!
//! Every probabilistic decision in the simulation (detection evasion, cure
//! and forensic-clean success, lateral spread, insider coin flips) rolls
//! through one shared handle so deterministic runs reproduce exactly.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

#[derive(Clone)]
pub struct SimRng {
    inner: Arc<Mutex<StdRng>>,
}

impl SimRng {
    /// Deterministic generator for reproducible runs
    pub fn seeded(seed: u64) -> Self {
        SimRng {
            inner: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn from_entropy() -> Self {
        SimRng {
            inner: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    /// Uniform draw in 1..=100
    pub fn roll_1_100(&self) -> u32 {
        self.inner.lock().gen_range(1..=100)
    }

    /// True with probability `success_rate_pct` (0..100)
    pub fn passes(&self, success_rate_pct: f64) -> bool {
        let draw: f64 = self.inner.lock().gen_range(0.0..100.0);
        draw < success_rate_pct
    }

    /// Fair coin
    pub fn coin(&self) -> bool {
        self.inner.lock().gen_bool(0.5)
    }

    /// Up to `n` distinct items sampled from `items`
    pub fn sample<T: Clone>(&self, items: &[T], n: usize) -> Vec<T> {
        let mut rng = self.inner.lock();
        items
            .choose_multiple(&mut *rng, n.min(items.len()))
            .cloned()
            .collect()
    }
}
