//! Simulation context implementing V2xContext for deterministic testing.

use async_trait::async_trait;
use car2x_env::V2xContext;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::Instrument;

/// 2024-01-01 00:00:00 UTC
const SIM_EPOCH_SECS: u64 = 1_704_067_200;

/// Simulation context backed by a virtual clock and a seeded RNG.
///
/// Time comes from tokio's clock, which the simulation runtime starts
/// paused: it only moves when every task is blocked on a timer, and then
/// jumps straight to the next deadline. Wall-clock time is a fixed epoch
/// plus the virtual elapsed time, so runs are reproducible.
///
/// Must be created inside the simulation runtime.
#[derive(Debug, Clone)]
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Virtual time zero
    start: Instant,

    /// Wall-clock time at virtual time zero
    epoch: SystemTime,
}

impl SimContext {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            start: Instant::now(),
            epoch: UNIX_EPOCH + Duration::from_secs(SIM_EPOCH_SECS),
        }
    }

    pub fn shared(seed: u64) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::new(seed))
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Deterministic RNG derived from the master seed and a stream number.
    pub fn rng(&self, stream: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ stream)
    }

    /// Wall-clock milliseconds at virtual offset `offset`.
    pub fn epoch_millis_at(&self, offset: Duration) -> i64 {
        (SIM_EPOCH_SECS * 1000 + offset.as_millis() as u64) as i64
    }

    /// Moves virtual time forward, firing every timer that falls due.
    pub async fn advance(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    /// Runs `future` to completion on a fresh paused, single-threaded runtime.
    pub fn block_on<F: Future>(future: F) -> std::io::Result<F::Output> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()?;
        Ok(runtime.block_on(future))
    }
}

#[async_trait]
impl V2xContext for SimContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.epoch + self.now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = tracing::debug_span!("sim_task", name = %name, seed = self.seed);
        tokio::spawn(future.instrument(span))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_virtual_time_advances_only_on_sleep() {
        SimContext::block_on(async {
            let ctx = SimContext::new(42);
            assert_eq!(ctx.now(), Duration::ZERO);

            ctx.sleep(Duration::from_secs(1)).await;
            let t1 = ctx.now();
            assert!(t1 >= Duration::from_secs(1) && t1 < Duration::from_millis(1001));

            ctx.advance(Duration::from_millis(500)).await;
            assert_eq!(ctx.now().as_millis(), 1500);
        })
        .unwrap();
    }

    #[test]
    fn test_epoch_millis_is_fixed() {
        SimContext::block_on(async {
            let ctx = SimContext::new(1);
            assert_eq!(ctx.epoch_millis(), 1_704_067_200_000);

            ctx.sleep(Duration::from_millis(250)).await;
            assert_eq!(ctx.epoch_millis(), 1_704_067_200_250);
            assert_eq!(ctx.epoch_millis_at(Duration::from_millis(250)), ctx.epoch_millis());
        })
        .unwrap();
    }

    #[test]
    fn test_rng_streams_are_deterministic() {
        SimContext::block_on(async {
            let a = SimContext::new(7);
            let b = SimContext::new(7);
            let x: u64 = a.rng(1).gen();
            assert_eq!(x, b.rng(1).gen::<u64>());
            assert_ne!(x, a.rng(2).gen::<u64>());
        })
        .unwrap();
    }
}
