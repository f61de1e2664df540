//! Effect runtime - lifecycle state machine around one effect instance
//!
//! ```text
//!  Inactive ──activate──▶ Starting ──hook ok──▶ Running ──N faults──▶ Faulted
//!     ▲                      │                     │                     │
//!     └──────deactivate──────┴─────────────────────┴─────────────────────┘
//! ```
//!
//! Every error the effect raises stays in here: a failed tick reuses the last
//! good frame, and enough consecutive failures freeze the effect until it is
//! reselected or reset.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use serde::Serialize;

use super::traits::{Effect, EffectContext};
use crate::error::EffectError;
use crate::frame::PixelFrame;
use crate::mapping::EffectInputs;

/// Lifecycle state of an effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Inactive,
    Starting,
    Running,
    Faulted,
}

/// When faults freeze an effect
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultPolicy {
    /// Consecutive faults before the effect is frozen
    pub threshold: u32,
    /// Compute time allowed per tick; `None` disables the check
    pub budget: Option<Duration>,
}

impl Default for FaultPolicy {
    fn default() -> Self {
        Self {
            threshold: 3,
            budget: None,
        }
    }
}

/// How a tick's frame was produced
#[derive(Debug, Clone, PartialEq)]
pub enum TickStatus {
    /// New frame from compute
    Fresh,
    /// Compute faulted this tick, last good frame reused
    Reused(EffectError),
    /// Effect is faulted, last good frame held
    Frozen,
    /// Effect is inactive, last frame held
    Idle,
}

/// Snapshot of a runtime for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeStatus {
    pub effect: String,
    pub state: LifecycleState,
    pub consecutive_faults: u32,
    pub total_faults: u64,
    pub activations: u64,
    pub last_error: Option<String>,
}

/// Runs one effect instance through its lifecycle
pub struct EffectRuntime {
    name: String,
    effect: Box<dyn Effect>,
    state: LifecycleState,
    policy: FaultPolicy,
    width: usize,
    height: usize,
    last_good: PixelFrame,
    /// Whether the activation hook ran for the current activation
    hook_ran: bool,
    consecutive_faults: u32,
    total_faults: u64,
    activations: u64,
    last_error: Option<EffectError>,
    activated_at: Instant,
    last_compute: Option<Instant>,
}

impl EffectRuntime {
    /// Wrap a fresh, inactive effect instance
    pub fn new(
        name: impl Into<String>,
        effect: Box<dyn Effect>,
        shape: (usize, usize),
        policy: FaultPolicy,
    ) -> Self {
        let (width, height) = shape;
        Self {
            name: name.into(),
            effect,
            state: LifecycleState::Inactive,
            policy,
            width,
            height,
            last_good: PixelFrame::new(width, height),
            hook_ran: false,
            consecutive_faults: 0,
            total_faults: 0,
            activations: 0,
            last_error: None,
            activated_at: Instant::now(),
            last_compute: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Last successfully computed frame
    pub fn last_good(&self) -> &PixelFrame {
        &self.last_good
    }

    pub fn status(&self) -> RuntimeStatus {
        RuntimeStatus {
            effect: self.name.clone(),
            state: self.state,
            consecutive_faults: self.consecutive_faults,
            total_faults: self.total_faults,
            activations: self.activations,
            last_error: self.last_error.as_ref().map(|e| e.to_string()),
        }
    }

    /// Begin an activation, seeding `previous` with the frame on the wall
    ///
    /// The activation hook itself runs on the next tick, right before the
    /// first compute. Calling this on an active effect restarts it.
    pub fn activate(&mut self, current: &PixelFrame) {
        if self.state != LifecycleState::Inactive {
            self.deactivate();
        }
        if current.shape() == (self.width, self.height) {
            self.last_good = current.clone();
        }
        self.consecutive_faults = 0;
        self.last_error = None;
        self.hook_ran = false;
        self.last_compute = None;
        self.state = LifecycleState::Starting;
    }

    /// Produce this tick's frame
    pub fn tick(&mut self, tick: u64, inputs: &EffectInputs) -> (PixelFrame, TickStatus) {
        match self.state {
            LifecycleState::Inactive => return (self.last_good.clone(), TickStatus::Idle),
            LifecycleState::Faulted => return (self.last_good.clone(), TickStatus::Frozen),
            LifecycleState::Starting => {
                if let Err(e) = self.run_activation_hook(tick) {
                    // A failed start cannot be retried within this activation
                    tracing::error!(effect = %self.name, error = %e, "Effect failed to start");
                    self.record_fault(e.clone());
                    self.state = LifecycleState::Faulted;
                    return (self.last_good.clone(), TickStatus::Reused(e));
                }
                self.state = LifecycleState::Running;
            }
            LifecycleState::Running => {}
        }

        let now = Instant::now();
        let ctx = EffectContext {
            width: self.width,
            height: self.height,
            time: now.duration_since(self.activated_at).as_secs_f32(),
            delta_time: self
                .last_compute
                .map(|t| now.duration_since(t).as_secs_f32())
                .unwrap_or(0.0),
            tick,
        };
        self.last_compute = Some(now);

        match self.compute_checked(&ctx, inputs) {
            Ok(frame) => {
                self.consecutive_faults = 0;
                self.last_good = frame;
                (self.last_good.clone(), TickStatus::Fresh)
            }
            Err(e) => {
                self.record_fault(e.clone());
                if self.consecutive_faults >= self.policy.threshold {
                    tracing::error!(
                        effect = %self.name,
                        faults = self.consecutive_faults,
                        error = %e,
                        "Effect faulted, holding last frame"
                    );
                    self.state = LifecycleState::Faulted;
                } else {
                    tracing::warn!(effect = %self.name, error = %e, "Effect tick failed, reusing last frame");
                }
                (self.last_good.clone(), TickStatus::Reused(e))
            }
        }
    }

    /// Clear faults and start a new activation
    pub fn reset(&mut self) {
        tracing::info!(effect = %self.name, state = ?self.state, "Resetting effect");
        let current = self.last_good.clone();
        self.activate(&current);
    }

    /// Run the deactivation hook if the activation hook ran
    ///
    /// Hook errors are logged, never returned.
    pub fn deactivate(&mut self) {
        if self.state == LifecycleState::Inactive {
            return;
        }
        if self.hook_ran {
            if let Err(e) = contain(|| self.effect.deactivate(), EffectError::Deactivation) {
                tracing::warn!(effect = %self.name, error = %e, "Effect deactivation failed");
            }
        }
        self.hook_ran = false;
        self.state = LifecycleState::Inactive;
        tracing::debug!(effect = %self.name, "Effect deactivated");
    }

    fn run_activation_hook(&mut self, tick: u64) -> Result<(), EffectError> {
        self.activated_at = Instant::now();
        self.activations += 1;
        self.hook_ran = true;
        let ctx = EffectContext {
            width: self.width,
            height: self.height,
            time: 0.0,
            delta_time: 0.0,
            tick,
        };
        tracing::debug!(effect = %self.name, tick, "Activating effect");
        contain(|| self.effect.activate(&ctx), EffectError::Activation)
    }

    fn compute_checked(&mut self, ctx: &EffectContext, inputs: &EffectInputs) -> Result<PixelFrame, EffectError> {
        let started = Instant::now();
        let frame = contain(|| self.effect.compute(ctx, inputs, &self.last_good), EffectError::Compute)?;
        let elapsed = started.elapsed();

        if frame.shape() != ctx.shape() {
            return Err(EffectError::ShapeMismatch {
                expected: ctx.shape(),
                found: frame.shape(),
            });
        }
        if let Some(budget) = self.policy.budget {
            if elapsed > budget {
                return Err(EffectError::Overrun {
                    elapsed_ms: elapsed.as_secs_f64() * 1000.0,
                    budget_ms: budget.as_secs_f64() * 1000.0,
                });
            }
        }
        Ok(frame)
    }

    fn record_fault(&mut self, error: EffectError) {
        self.consecutive_faults += 1;
        self.total_faults += 1;
        self.last_error = Some(error);
    }
}

/// Run an effect hook, turning a panic into an error of the hook's kind
fn contain<T>(
    hook: impl FnOnce() -> Result<T, EffectError>,
    on_panic: fn(String) -> EffectError,
) -> Result<T, EffectError> {
    panic::catch_unwind(AssertUnwindSafe(hook)).unwrap_or_else(|payload| Err(on_panic(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}

impl Drop for EffectRuntime {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Rgbw;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Hooks {
        activations: AtomicU32,
        computes: AtomicU32,
        deactivations: AtomicU32,
        /// Compute count observed when activation ran
        computes_at_activation: AtomicU32,
    }

    /// Fills the frame with the tick index; fails when told to
    struct ScriptedEffect {
        hooks: Arc<Hooks>,
        fail_after: Option<u32>,
        wrong_shape: bool,
        sleep: Option<Duration>,
        panic_after: Option<u32>,
        panic_on_activate: bool,
    }

    impl ScriptedEffect {
        fn new(hooks: Arc<Hooks>) -> Self {
            Self {
                hooks,
                fail_after: None,
                wrong_shape: false,
                sleep: None,
                panic_after: None,
                panic_on_activate: false,
            }
        }
    }

    impl Effect for ScriptedEffect {
        fn activate(&mut self, _ctx: &EffectContext) -> Result<(), EffectError> {
            if self.panic_on_activate {
                panic!("activation blew up");
            }
            let computes = self.hooks.computes.load(Ordering::SeqCst);
            self.hooks.computes_at_activation.store(computes, Ordering::SeqCst);
            self.hooks.activations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn compute(
            &mut self,
            ctx: &EffectContext,
            _inputs: &EffectInputs,
            _previous: &PixelFrame,
        ) -> Result<PixelFrame, EffectError> {
            let n = self.hooks.computes.fetch_add(1, Ordering::SeqCst);
            if let Some(sleep) = self.sleep {
                std::thread::sleep(sleep);
            }
            if self.panic_after.is_some_and(|limit| n >= limit) {
                panic!("compute blew up on call {}", n);
            }
            if self.fail_after.is_some_and(|limit| n >= limit) {
                return Err(EffectError::Compute("scripted failure".into()));
            }
            if self.wrong_shape {
                return Ok(PixelFrame::new(ctx.width + 1, ctx.height));
            }
            let v = ctx.tick as u8;
            Ok(PixelFrame::filled(ctx.width, ctx.height, Rgbw::new(v, v, v, v)))
        }

        fn deactivate(&mut self) -> Result<(), EffectError> {
            self.hooks.deactivations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn runtime(effect: ScriptedEffect, policy: FaultPolicy) -> EffectRuntime {
        EffectRuntime::new("scripted", Box::new(effect), (4, 2), policy)
    }

    #[test]
    fn test_activation_hook_runs_once_before_compute() {
        let hooks = Arc::new(Hooks::default());
        let mut rt = runtime(ScriptedEffect::new(hooks.clone()), FaultPolicy::default());
        rt.activate(&PixelFrame::new(4, 2));
        assert_eq!(rt.state(), LifecycleState::Starting);
        assert_eq!(hooks.activations.load(Ordering::SeqCst), 0);

        for tick in 1..=5 {
            let (_, status) = rt.tick(tick, &EffectInputs::new());
            assert_eq!(status, TickStatus::Fresh);
        }

        assert_eq!(rt.state(), LifecycleState::Running);
        assert_eq!(hooks.activations.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.computes_at_activation.load(Ordering::SeqCst), 0);
        assert_eq!(hooks.computes.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_inactive_runtime_does_not_compute() {
        let hooks = Arc::new(Hooks::default());
        let mut rt = runtime(ScriptedEffect::new(hooks.clone()), FaultPolicy::default());
        let (_, status) = rt.tick(1, &EffectInputs::new());
        assert_eq!(status, TickStatus::Idle);
        assert_eq!(hooks.computes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_consecutive_faults_freeze_last_frame() {
        let hooks = Arc::new(Hooks::default());
        let mut effect = ScriptedEffect::new(hooks.clone());
        effect.fail_after = Some(2);
        let policy = FaultPolicy {
            threshold: 3,
            budget: None,
        };
        let mut rt = runtime(effect, policy);
        rt.activate(&PixelFrame::new(4, 2));

        let (good, _) = rt.tick(1, &EffectInputs::new());
        let (good2, _) = rt.tick(2, &EffectInputs::new());
        assert_ne!(good, good2);

        let mut outputs = Vec::new();
        for tick in 3..=5 {
            let (frame, status) = rt.tick(tick, &EffectInputs::new());
            assert!(matches!(status, TickStatus::Reused(EffectError::Compute(_))));
            outputs.push(frame);
        }
        assert_eq!(rt.state(), LifecycleState::Faulted);

        let (frozen, status) = rt.tick(6, &EffectInputs::new());
        assert_eq!(status, TickStatus::Frozen);
        assert_eq!(&frozen, outputs.last().unwrap());
        assert_eq!(frozen, good2);
        // Faulted effects are not computed
        assert_eq!(hooks.computes.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_success_resets_fault_streak() {
        let hooks = Arc::new(Hooks::default());
        let mut rt = runtime(ScriptedEffect::new(hooks), FaultPolicy::default());
        rt.activate(&PixelFrame::new(4, 2));
        rt.record_fault(EffectError::Compute("x".into()));
        rt.record_fault(EffectError::Compute("x".into()));
        rt.tick(1, &EffectInputs::new());
        assert_eq!(rt.status().consecutive_faults, 0);
        assert_eq!(rt.status().total_faults, 2);
    }

    #[test]
    fn test_wrong_shape_is_contained() {
        let hooks = Arc::new(Hooks::default());
        let mut effect = ScriptedEffect::new(hooks);
        effect.wrong_shape = true;
        let mut rt = runtime(
            effect,
            FaultPolicy {
                threshold: 1,
                budget: None,
            },
        );
        rt.activate(&PixelFrame::new(4, 2));
        let (frame, status) = rt.tick(1, &EffectInputs::new());
        assert_eq!(frame.shape(), (4, 2));
        assert!(matches!(status, TickStatus::Reused(EffectError::ShapeMismatch { .. })));
        assert_eq!(rt.state(), LifecycleState::Faulted);
    }

    #[test]
    fn test_overrun_is_single_tick_fault() {
        let hooks = Arc::new(Hooks::default());
        let mut effect = ScriptedEffect::new(hooks);
        effect.sleep = Some(Duration::from_millis(20));
        let mut rt = runtime(
            effect,
            FaultPolicy {
                threshold: 5,
                budget: Some(Duration::from_millis(1)),
            },
        );
        rt.activate(&PixelFrame::new(4, 2));
        let (frame, status) = rt.tick(1, &EffectInputs::new());
        assert!(matches!(status, TickStatus::Reused(EffectError::Overrun { .. })));
        assert_eq!(frame, PixelFrame::new(4, 2));
        assert_eq!(rt.state(), LifecycleState::Running);
    }

    #[test]
    fn test_reset_reactivates_faulted_effect() {
        let hooks = Arc::new(Hooks::default());
        let mut effect = ScriptedEffect::new(hooks.clone());
        effect.fail_after = Some(0);
        let mut rt = runtime(
            effect,
            FaultPolicy {
                threshold: 1,
                budget: None,
            },
        );
        rt.activate(&PixelFrame::new(4, 2));
        rt.tick(1, &EffectInputs::new());
        assert_eq!(rt.state(), LifecycleState::Faulted);

        rt.reset();
        assert_eq!(rt.state(), LifecycleState::Starting);
        assert_eq!(hooks.deactivations.load(Ordering::SeqCst), 1);
        rt.tick(2, &EffectInputs::new());
        assert_eq!(hooks.activations.load(Ordering::SeqCst), 2);
        assert_eq!(rt.status().activations, 2);
    }

    #[test]
    fn test_deactivate_only_after_hook() {
        let hooks = Arc::new(Hooks::default());
        let mut rt = runtime(ScriptedEffect::new(hooks.clone()), FaultPolicy::default());
        rt.activate(&PixelFrame::new(4, 2));
        rt.deactivate();
        assert_eq!(hooks.deactivations.load(Ordering::SeqCst), 0);

        rt.activate(&PixelFrame::new(4, 2));
        rt.tick(1, &EffectInputs::new());
        drop(rt);
        assert_eq!(hooks.deactivations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_activation_seeds_previous_frame() {
        let hooks = Arc::new(Hooks::default());
        let mut rt = runtime(ScriptedEffect::new(hooks), FaultPolicy::default());
        let wall = PixelFrame::filled(4, 2, Rgbw::new(9, 9, 9, 9));
        rt.activate(&wall);
        assert_eq!(rt.last_good(), &wall);
    }

    #[test]
    fn test_compute_panic_is_contained_fault() {
        let hooks = Arc::new(Hooks::default());
        let mut effect = ScriptedEffect::new(hooks.clone());
        effect.panic_after = Some(1);
        let mut rt = runtime(
            effect,
            FaultPolicy {
                threshold: 2,
                budget: None,
            },
        );
        rt.activate(&PixelFrame::new(4, 2));

        let (good, status) = rt.tick(1, &EffectInputs::new());
        assert_eq!(status, TickStatus::Fresh);

        let (frame, status) = rt.tick(2, &EffectInputs::new());
        assert!(matches!(&status, TickStatus::Reused(EffectError::Compute(msg)) if msg.contains("blew up")));
        assert_eq!(frame, good);
        assert_eq!(rt.state(), LifecycleState::Running);

        rt.tick(3, &EffectInputs::new());
        assert_eq!(rt.state(), LifecycleState::Faulted);
        assert_eq!(rt.status().total_faults, 2);

        let (frozen, status) = rt.tick(4, &EffectInputs::new());
        assert_eq!(status, TickStatus::Frozen);
        assert_eq!(frozen, good);
    }

    #[test]
    fn test_activation_panic_faults_effect() {
        let hooks = Arc::new(Hooks::default());
        let mut effect = ScriptedEffect::new(hooks.clone());
        effect.panic_on_activate = true;
        let mut rt = runtime(effect, FaultPolicy::default());
        rt.activate(&PixelFrame::new(4, 2));

        let (_, status) = rt.tick(1, &EffectInputs::new());
        assert!(matches!(status, TickStatus::Reused(EffectError::Activation(_))));
        assert_eq!(rt.state(), LifecycleState::Faulted);
        assert_eq!(hooks.computes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_consecutive_overruns_freeze_effect() {
        let hooks = Arc::new(Hooks::default());
        let mut effect = ScriptedEffect::new(hooks.clone());
        effect.sleep = Some(Duration::from_millis(20));
        let mut rt = runtime(
            effect,
            FaultPolicy {
                threshold: 2,
                budget: Some(Duration::from_millis(1)),
            },
        );
        let wall = PixelFrame::filled(4, 2, Rgbw::new(7, 7, 7, 7));
        rt.activate(&wall);

        let (_, status) = rt.tick(1, &EffectInputs::new());
        assert!(matches!(status, TickStatus::Reused(EffectError::Overrun { .. })));
        assert_eq!(rt.state(), LifecycleState::Running);

        let (_, status) = rt.tick(2, &EffectInputs::new());
        assert!(matches!(status, TickStatus::Reused(EffectError::Overrun { .. })));
        assert_eq!(rt.state(), LifecycleState::Faulted);

        let (frozen, status) = rt.tick(3, &EffectInputs::new());
        assert_eq!(status, TickStatus::Frozen);
        assert_eq!(frozen, wall);
        assert_eq!(hooks.computes.load(Ordering::SeqCst), 2);
    }
}
