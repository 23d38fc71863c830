//! Random level assignment for new nodes.

use crate::config::HnswConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Draws node levels from the exponentially decaying HNSW distribution.
///
/// Uses the formula: floor(-ln(uniform(0,1]) * m_L)
/// where m_L = 1/ln(M)
///
/// This gives exponential distribution where probability of
/// being at layer L is roughly 1/M^L.
#[derive(Debug, Clone)]
pub struct LevelGenerator {
    rng: StdRng,
    multiplier: f64,
    max_level: u8,
}

impl LevelGenerator {
    /// Generator for `config`; seeded from `config.seed` or OS entropy.
    pub fn new(config: &HnswConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            multiplier: config.level_multiplier(),
            max_level: config.max_layers.saturating_sub(1).min(u8::MAX as usize) as u8,
        }
    }

    /// Next level, capped at `max_layers - 1`.
    pub fn next_level(&mut self) -> u8 {
        // gen() is in [0, 1); flip it so ln never sees 0
        let uniform = 1.0 - self.rng.gen::<f64>();
        let level = (-uniform.ln() * self.multiplier).floor();
        level.min(self.max_level as f64) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u64) -> LevelGenerator {
        LevelGenerator::new(&HnswConfig {
            seed: Some(seed),
            ..Default::default()
        })
    }

    #[test]
    fn test_random_layer_distribution() {
        let mut levels = seeded(7);
        let mut layer_counts = vec![0usize; 16];

        for _ in 0..10000 {
            let layer = levels.next_level() as usize;
            assert!(layer < 16);
            layer_counts[layer] += 1;
        }

        // Layer 0 should have most nodes (~15/16 at M=16)
        assert!(layer_counts[0] > 9000);
        assert!(layer_counts[0] > layer_counts[1]);
        assert!(layer_counts[1] > layer_counts[2]);
    }

    #[test]
    fn test_seed_is_deterministic() {
        let mut a = seeded(42);
        let mut b = seeded(42);
        let xs: Vec<u8> = (0..200).map(|_| a.next_level()).collect();
        let ys: Vec<u8> = (0..200).map(|_| b.next_level()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_single_layer_cap() {
        let mut levels = LevelGenerator::new(&HnswConfig {
            max_connections: 1,
            max_layers: 1,
            seed: Some(3),
            ..Default::default()
        });
        assert!((0..1000).all(|_| levels.next_level() == 0));
    }
}
