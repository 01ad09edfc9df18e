//! Stabilization run daemons to maintain dht.
//!
//! Two timers drive every registered [Stabilizable]:
//!
//! - the *continuous* timer runs data that must be repaired quickly (successor and
//!   predecessor pointers);
//! - the *backoff* timer runs data that may be a little stale (fingers and the
//!   successor list). It slows down geometrically while the ring is stable.
//!
//! A tick that finds a round of the same cadence still outstanding doubles the
//! delay instead of starting another round, so a single maintainer never has
//! overlapping rounds.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::FutureExt;
use futures::pin_mut;
use futures::select;
use futures_timer::Delay;
use rand::Rng;
use tokio::sync::watch;

use crate::config::TimerConfig;
use crate::config::VnodeConfig;
use crate::error::Error;
use crate::error::Result;

/// A maintainer driven by the [StabilizeManager].
#[async_trait]
pub trait Stabilizable: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;
    /// A continuous round is still outstanding.
    fn continuous_stabilizing(&self) -> bool;
    /// A backoff round is still outstanding.
    fn backoff_stabilizing(&self) -> bool;
    /// Run one continuous round.
    async fn do_continuous(&self);
    /// Run one backoff round.
    async fn do_backoff(&self);
    /// The maintained data did not change during the last rounds.
    fn isstable(&self) -> bool;
}

/// Which of the two timers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cadence {
    /// Urgent repairs.
    Continuous,
    /// Relaxed repairs.
    Backoff,
}

/// Adaptive delay of one cadence, in milliseconds.
#[derive(Clone, Debug)]
pub struct CadenceTimer {
    cadence: Cadence,
    bounds: TimerConfig,
    decrease: u64,
    slowdown: f64,
    current: u64,
}

impl CadenceTimer {
    /// A timer starting at `bounds.init_ms`. `decrease` is the step toward
    /// `bounds.base_ms`, `slowdown` the factor a stable backoff timer relaxes by.
    pub fn new(cadence: Cadence, bounds: TimerConfig, decrease: u64, slowdown: f64) -> Self {
        let current = bounds.init_ms.clamp(bounds.init_ms, bounds.max_ms.max(bounds.init_ms));
        Self {
            cadence,
            bounds,
            decrease,
            slowdown,
            current,
        }
    }

    /// Current delay.
    pub fn current(&self) -> u64 {
        self.current
    }

    fn clamp(&mut self, t: u64) -> u64 {
        let max = self.bounds.max_ms.max(self.bounds.init_ms);
        self.current = t.clamp(self.bounds.init_ms, max);
        self.current
    }

    /// A round of this cadence is still outstanding: slow down.
    pub fn too_fast(&mut self) -> u64 {
        let t = self.current.saturating_mul(2);
        self.clamp(t)
    }

    /// Rounds were started: move toward the baseline, or relax while stable.
    pub fn adjust(&mut self, stable: bool) -> u64 {
        let base = self.bounds.base_ms;
        let t = self.current;
        let t = if self.cadence == Cadence::Backoff && stable {
            ((t as f64) * self.slowdown).ceil() as u64
        } else if t > base {
            t.saturating_sub(self.decrease).max(base)
        } else if t < base / 2 {
            t.saturating_mul(2)
        } else {
            t
        };
        self.clamp(t)
    }

    /// A uniform sample of `[0.5, 1.5] * t`.
    pub fn jitter(t: u64) -> Duration {
        let lo = t / 2;
        let hi = t + t / 2;
        let ms = if hi > lo {
            rand::thread_rng().gen_range(lo..=hi)
        } else {
            t
        };
        Duration::from_millis(ms)
    }
}

/// Drives the continuous and backoff rounds of every registered maintainer.
pub struct StabilizeManager {
    members: Mutex<Vec<Arc<dyn Stabilizable>>>,
    continuous: Mutex<CadenceTimer>,
    backoff: Mutex<CadenceTimer>,
    running: AtomicBool,
    stopped: AtomicBool,
    was_stable: AtomicBool,
    stop_tx: watch::Sender<bool>,
}

impl StabilizeManager {
    /// Create a stopped manager with the timer bounds of `config`.
    pub fn new(config: &VnodeConfig) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            members: Mutex::new(vec![]),
            continuous: Mutex::new(CadenceTimer::new(
                Cadence::Continuous,
                config.continuous.clone(),
                config.decrease_step_ms,
                config.slowdown_factor,
            )),
            backoff: Mutex::new(CadenceTimer::new(
                Cadence::Backoff,
                config.backoff.clone(),
                config.decrease_step_ms,
                config.slowdown_factor,
            )),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            was_stable: AtomicBool::new(false),
            stop_tx,
        }
    }

    /// Add a maintainer.
    pub fn register(&self, member: Arc<dyn Stabilizable>) -> Result<()> {
        self.members
            .lock()
            .map_err(|_| Error::StabilizerLockError)?
            .push(member);
        Ok(())
    }

    fn members(&self) -> Vec<Arc<dyn Stabilizable>> {
        self.members
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Conjunction of every maintainer's stability.
    pub fn isstable(&self) -> bool {
        self.members().iter().all(|m| m.isstable())
    }

    /// Current continuous delay in ms.
    pub fn continuous_timer(&self) -> u64 {
        self.continuous.lock().map(|t| t.current()).unwrap_or_default()
    }

    /// Current backoff delay in ms.
    pub fn backoff_timer(&self) -> u64 {
        self.backoff.lock().map(|t| t.current()).unwrap_or_default()
    }

    /// Whether the timers run.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.stopped.load(Ordering::SeqCst)
    }

    /// One tick of `cadence`. Spawns rounds unless one is outstanding, adjusts the
    /// timer and returns the jittered delay until the next tick.
    pub fn tick(&self, cadence: Cadence) -> Result<Duration> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::StabilizerStopped);
        }
        let members = self.members();
        let stable = members.iter().all(|m| m.isstable());
        let was_stable = self.was_stable.swap(stable, Ordering::SeqCst);
        if stable && !was_stable {
            tracing::info!("[stabilize] ring looks stable");
        }

        let outstanding = members.iter().any(|m| match cadence {
            Cadence::Continuous => m.continuous_stabilizing(),
            Cadence::Backoff => m.backoff_stabilizing(),
        });

        let timer = match cadence {
            Cadence::Continuous => &self.continuous,
            Cadence::Backoff => &self.backoff,
        };
        let mut timer = timer.lock().map_err(|_| Error::StabilizerLockError)?;

        let t = if outstanding {
            let t = timer.too_fast();
            tracing::debug!("[stabilize] {:?} round outstanding, slow down to {}ms", cadence, t);
            t
        } else {
            for m in members {
                tokio::spawn(async move {
                    tracing::debug!("STABILIZATION {} {:?} start", m.name(), cadence);
                    match cadence {
                        Cadence::Continuous => m.do_continuous().await,
                        Cadence::Backoff => m.do_backoff().await,
                    }
                    tracing::debug!("STABILIZATION {} {:?} end", m.name(), cadence);
                });
            }
            timer.adjust(stable)
        };
        Ok(CadenceTimer::jitter(t))
    }

    /// Start both timers. Calling it again while running is a no-op.
    pub fn start(self: &Arc<Self>) {
        if self.stopped.load(Ordering::SeqCst) || self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        for cadence in [Cadence::Continuous, Cadence::Backoff] {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.wait(cadence).await });
        }
    }

    async fn wait(self: Arc<Self>, cadence: Cadence) {
        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            let delay = match self.tick(cadence) {
                Ok(d) => d,
                Err(Error::StabilizerStopped) => break,
                Err(e) => {
                    tracing::error!("[stabilize] failed to tick {:?}: {:?}", cadence, e);
                    break;
                }
            };
            let timeout = Delay::new(delay).fuse();
            let stop = stop_rx.changed().fuse();
            pin_mut!(timeout, stop);
            select! {
                _ = timeout => {},
                _ = stop => break,
            }
        }
        tracing::debug!("[stabilize] {:?} timer exits", cadence);
    }

    /// Stop both timers. Idempotent. No round starts after it returns.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.stop_tx.send(true);
        tracing::debug!("[stabilize] stopped");
    }
}

/// Outstanding-round flags and stability of one maintainer.
#[derive(Debug, Default)]
pub struct RoundState {
    continuous: AtomicBool,
    backoff: AtomicBool,
    stable: AtomicBool,
}

impl RoundState {
    /// A maintainer with no outstanding round, not yet stable.
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, cadence: Cadence) -> &AtomicBool {
        match cadence {
            Cadence::Continuous => &self.continuous,
            Cadence::Backoff => &self.backoff,
        }
    }

    /// Whether a round of `cadence` is outstanding.
    pub fn in_progress(&self, cadence: Cadence) -> bool {
        self.flag(cadence).load(Ordering::SeqCst)
    }

    /// Claim a round of `cadence`. Returns `None` if one is already outstanding.
    /// The round ends when the guard drops.
    pub fn enter(&self, cadence: Cadence) -> Option<RoundGuard<'_>> {
        let flag = self.flag(cadence);
        if flag.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(RoundGuard { flag })
    }

    /// Result of the last round.
    pub fn is_stable(&self) -> bool {
        self.stable.load(Ordering::SeqCst)
    }

    /// Record the result of a round.
    pub fn set_stable(&self, stable: bool) {
        self.stable.store(stable, Ordering::SeqCst)
    }
}

/// Marks a round outstanding for as long as it lives.
pub struct RoundGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RoundGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn bounds(init: u64, base: u64, max: u64) -> TimerConfig {
        TimerConfig {
            init_ms: init,
            base_ms: base,
            max_ms: max,
        }
    }

    #[test]
    fn test_continuous_timer_bounds() {
        let mut t = CadenceTimer::new(Cadence::Continuous, bounds(1000, 1000, 5000), 1000, 1.2);
        for _ in 0..100 {
            assert!(t.too_fast() <= 5000);
        }
        assert_eq!(t.current(), 5000);
        // speeds up additively back to the baseline
        assert_eq!(t.adjust(false), 4000);
        assert_eq!(t.adjust(false), 3000);
        for _ in 0..100 {
            let v = t.adjust(true);
            assert!((1000..=5000).contains(&v));
        }
        assert_eq!(t.current(), 1000);
    }

    #[test]
    fn test_backoff_timer_relaxes_when_stable() {
        let mut t = CadenceTimer::new(Cadence::Backoff, bounds(1000, 1000, 500_000), 1000, 1.2);
        let mut last = t.current();
        for _ in 0..200 {
            let v = t.adjust(true);
            assert!(v >= last);
            assert!(v <= 500_000);
            last = v;
        }
        assert_eq!(t.current(), 500_000);
        for _ in 0..10 {
            assert_eq!(t.too_fast(), 500_000);
        }
        // unstable again: additive speed up
        assert_eq!(t.adjust(false), 499_000);
    }

    #[test]
    fn test_timer_below_half_base_grows() {
        let mut t = CadenceTimer::new(Cadence::Continuous, bounds(100, 1000, 4000), 300, 1.2);
        assert_eq!(t.adjust(false), 200);
        assert_eq!(t.adjust(false), 400);
        assert_eq!(t.adjust(false), 800);
        assert_eq!(t.adjust(false), 800);
    }

    #[test]
    fn test_jitter_range() {
        for _ in 0..1000 {
            let d = CadenceTimer::jitter(1000).as_millis() as u64;
            assert!((500..=1500).contains(&d));
        }
        assert_eq!(CadenceTimer::jitter(0), Duration::ZERO);
    }

    #[test]
    fn test_round_state_guard() {
        let state = RoundState::new();
        assert!(!state.is_stable());
        {
            let _g = state.enter(Cadence::Backoff).unwrap();
            assert!(state.in_progress(Cadence::Backoff));
            assert!(!state.in_progress(Cadence::Continuous));
            assert!(state.enter(Cadence::Backoff).is_none());
        }
        assert!(!state.in_progress(Cadence::Backoff));
        assert!(state.enter(Cadence::Backoff).is_some());
    }

    struct Member {
        continuous: AtomicUsize,
        backoff: AtomicUsize,
        busy: AtomicBool,
        stable: AtomicBool,
    }

    impl Member {
        fn new() -> Self {
            Self {
                continuous: AtomicUsize::new(0),
                backoff: AtomicUsize::new(0),
                busy: AtomicBool::new(false),
                stable: AtomicBool::new(true),
            }
        }
    }

    #[async_trait]
    impl Stabilizable for Member {
        fn name(&self) -> &'static str {
            "test"
        }
        fn continuous_stabilizing(&self) -> bool {
            self.busy.load(Ordering::SeqCst)
        }
        fn backoff_stabilizing(&self) -> bool {
            false
        }
        async fn do_continuous(&self) {
            self.continuous.fetch_add(1, Ordering::SeqCst);
        }
        async fn do_backoff(&self) {
            self.backoff.fetch_add(1, Ordering::SeqCst);
        }
        fn isstable(&self) -> bool {
            self.stable.load(Ordering::SeqCst)
        }
    }

    fn fast_config() -> VnodeConfig {
        VnodeConfig {
            continuous: bounds(10, 10, 40),
            backoff: bounds(10, 10, 80),
            decrease_step_ms: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_outstanding_round_is_not_restarted() -> Result<()> {
        let manager = StabilizeManager::new(&fast_config());
        let member = Arc::new(Member::new());
        manager.register(member.clone())?;

        member.busy.store(true, Ordering::SeqCst);
        manager.tick(Cadence::Continuous)?;
        manager.tick(Cadence::Continuous)?;
        tokio::task::yield_now().await;
        assert_eq!(member.continuous.load(Ordering::SeqCst), 0);
        assert_eq!(manager.continuous_timer(), 40);

        member.busy.store(false, Ordering::SeqCst);
        manager.tick(Cadence::Continuous)?;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(member.continuous.load(Ordering::SeqCst), 1);
        assert_eq!(manager.continuous_timer(), 35);
        Ok(())
    }

    #[tokio::test]
    async fn test_stability_is_conjunction() -> Result<()> {
        let manager = StabilizeManager::new(&fast_config());
        let a = Arc::new(Member::new());
        let b = Arc::new(Member::new());
        manager.register(a.clone())?;
        manager.register(b.clone())?;
        assert!(manager.isstable());
        b.stable.store(false, Ordering::SeqCst);
        assert!(!manager.isstable());
        Ok(())
    }

    #[tokio::test]
    async fn test_start_and_idempotent_stop() -> Result<()> {
        let manager = Arc::new(StabilizeManager::new(&fast_config()));
        let member = Arc::new(Member::new());
        manager.register(member.clone())?;
        manager.start();
        manager.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(member.continuous.load(Ordering::SeqCst) > 1);
        assert!(member.backoff.load(Ordering::SeqCst) > 1);

        manager.stop();
        manager.stop();
        assert!(!manager.is_running());
        tokio::time::sleep(Duration::from_millis(20)).await;
        let c = member.continuous.load(Ordering::SeqCst);
        let b = member.backoff.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(member.continuous.load(Ordering::SeqCst), c);
        assert_eq!(member.backoff.load(Ordering::SeqCst), b);
        assert!(matches!(manager.tick(Cadence::Continuous), Err(Error::StabilizerStopped)));
        Ok(())
    }
}
