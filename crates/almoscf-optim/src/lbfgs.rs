//! L-BFGS history engine for ALMO SCF.
//!
//! L-BFGS (Limited-memory Broyden-Fletcher-Goldfarb-Shanno) approximates the
//! action of the inverse Hessian from a short history of variable and
//! gradient differences. Here the variables and gradients are sparse
//! matrices, one per spin channel, and the SCF driver owns the outer loop;
//! this module only keeps the history and turns a gradient into a search
//! direction.
//!
//! # Protocol
//!
//! ```text
//! seed(x_0, g_0)
//! loop:
//!     d_k = compute_direction(x_k, g_k)
//!         push_delta(Variable, x_k)   s ← x_k - x_{k-1}
//!         push_delta(Gradient, g_k)   y ← g_k - g_{k-1}
//!         update_rho()                ρ ← 1 / <s, y>
//!         two_loop(g_k)
//!         push_seed(Variable, x_k)    next slot ← x_k
//!         push_seed(Gradient, g_k)    next slot ← g_k
//!     x_{k+1} = x_k + step · d_k
//! ```
//!
//! Both tracks share one logical clock (`push_count`), global across spins.
//! A counter value `c ≥ 1` maps to slot `(c - 1) mod capacity`; the seed for
//! the next cycle is written to the slot of `push_count + 1`, which the next
//! delta push then advances onto.
//!
//! ## Two-Loop Recursion
//!
//! ```text
//! q = g
//! for i = k, k-1, ..., k-m+1:
//!     α_i = ρ_i <s_i, q>
//!     q = q - α_i y_i
//! q = γ q,   γ = 1 / (ρ_k <y_k, y_k>)
//! for i = k-m+1, ..., k:
//!     β = ρ_i <y_i, q>
//!     q = q + (α_i - β) s_i
//! return -q
//! ```
//!
//! # References
//!
//! - Nocedal & Wright, "Numerical Optimization" (2006), Algorithm 7.4

use almoscf_core::{
    error::{OptimizerError, OptimizerResult},
    matrix::SparseMatrix,
    types::Scalar,
};
use log::{debug, trace, warn};
use num_traits::Float;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The two histories kept by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    /// Optimization variables (`s` pairs)
    Variable,
    /// Gradients (`y` pairs)
    Gradient,
}

impl Track {
    /// Both tracks, in storage order.
    pub const ALL: [Self; 2] = [Self::Variable, Self::Gradient];

    #[inline]
    const fn index(self) -> usize {
        match self {
            Self::Variable => 0,
            Self::Gradient => 1,
        }
    }
}

/// What a populated slot currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Raw copy of a point, waiting for the next delta push.
    Seed,
    /// Difference between two consecutive points.
    Delta,
}

/// Lifecycle of a [`HistoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryState {
    /// Allocated, nothing stored.
    Created,
    /// Holds a seed for the next cycle.
    Seeded,
}

/// What to do when `<s, y>` vanishes and `ρ` cannot be formed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CurvaturePolicy {
    /// Drop all usable pairs; the next recursion falls back to `-g` and the
    /// history rebuilds from the following cycle.
    #[default]
    Restart,
    /// Store `1 / <s, y>` whatever it is.
    Unguarded,
}

/// Configuration for the L-BFGS history engine.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LbfgsConfig<T: Scalar> {
    /// Number of (s, y) pairs kept per spin; 0 is treated as 1
    pub history_length: usize,
    /// Handling of vanishing curvature
    pub curvature_policy: CurvaturePolicy,
    /// Relative threshold on `|<s, y>| / (‖s‖ ‖y‖)` under `Restart`
    pub curvature_tolerance: T,
}

impl<T: Scalar> Default for LbfgsConfig<T> {
    fn default() -> Self {
        Self {
            history_length: 10,
            curvature_policy: CurvaturePolicy::default(),
            curvature_tolerance: T::CURVATURE_TOLERANCE,
        }
    }
}

impl<T: Scalar> LbfgsConfig<T> {
    /// Creates a new configuration with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of stored pairs.
    pub fn with_history_length(mut self, length: usize) -> Self {
        self.history_length = length;
        self
    }

    /// Sets the curvature policy.
    pub fn with_curvature_policy(mut self, policy: CurvaturePolicy) -> Self {
        self.curvature_policy = policy;
        self
    }

    /// Sets the relative curvature tolerance used by [`CurvaturePolicy::Restart`].
    pub fn with_curvature_tolerance(mut self, tolerance: T) -> Self {
        self.curvature_tolerance = tolerance;
        self
    }
}

/// Maps a counter value `c ≥ 1` to its storage slot.
#[inline]
fn slot_for(counter: usize, capacity: usize) -> usize {
    debug_assert!(counter >= 1, "slot counters start at 1");
    (counter - 1) % capacity
}

#[derive(Debug)]
struct Slot<M> {
    matrix: M,
    kind: SlotKind,
}

/// Slots and curvature scalars of one spin channel.
#[derive(Debug)]
struct SpinHistory<T, M> {
    /// `slots[track][slot]`, populated lazily
    slots: [Vec<Option<Slot<M>>>; 2],
    rho: Vec<Option<T>>,
}

impl<T: Scalar, M: SparseMatrix<T>> SpinHistory<T, M> {
    fn new(capacity: usize) -> Self {
        Self {
            slots: [
                std::iter::repeat_with(|| None).take(capacity).collect(),
                std::iter::repeat_with(|| None).take(capacity).collect(),
            ],
            rho: vec![None; capacity],
        }
    }

    fn seed_slot(&mut self, track: Track, slot: usize, src: &M) -> OptimizerResult<()> {
        let entry = &mut self.slots[track.index()][slot];
        match entry {
            Some(existing) => {
                existing.matrix.assign_from(src)?;
                existing.kind = SlotKind::Seed;
            }
            None => {
                let mut matrix = M::create_like(src);
                matrix.assign_from(src)?;
                *entry = Some(Slot {
                    matrix,
                    kind: SlotKind::Seed,
                });
            }
        }
        self.rho[slot] = None;
        Ok(())
    }

    fn delta_slot(&mut self, track: Track, slot: usize, new: &M) -> OptimizerResult<()> {
        let entry = self.slots[track.index()][slot]
            .as_mut()
            .filter(|s| s.kind == SlotKind::Seed)
            .ok_or_else(|| {
                OptimizerError::protocol_violation("push_delta", format!("slot {slot} holds no seed"))
            })?;
        entry.matrix.axpby(T::one(), new, -T::one())?;
        entry.kind = SlotKind::Delta;
        Ok(())
    }

    fn delta(&self, track: Track, slot: usize) -> Option<&M> {
        self.slots[track.index()][slot]
            .as_ref()
            .filter(|s| s.kind == SlotKind::Delta)
            .map(|s| &s.matrix)
    }

    fn pair(&self, slot: usize) -> OptimizerResult<(&M, &M, T)> {
        match (
            self.delta(Track::Variable, slot),
            self.delta(Track::Gradient, slot),
            self.rho[slot],
        ) {
            (Some(s), Some(y), Some(rho)) => Ok((s, y, rho)),
            _ => Err(OptimizerError::protocol_violation(
                "two_loop",
                format!("slot {slot} holds no complete (s, y, rho) triple"),
            )),
        }
    }

    fn two_loop(&self, gradient: &M, count: usize, capacity: usize, m: usize) -> OptimizerResult<M> {
        let mut q = M::create_like(gradient);
        q.assign_from(gradient)?;

        let mut alpha = vec![T::zero(); m];
        let mut gamma = T::one();

        for term in 1..=m {
            let slot = slot_for(count + 1 - term, capacity);
            let (s, y, rho) = self.pair(slot)?;
            trace!("first loop: term {term} -> slot {slot}");

            alpha[term - 1] = rho * s.dot_product(&q)?;
            q.axpby(-alpha[term - 1], y, T::one())?;
            if term == 1 {
                gamma = T::one() / (rho * y.dot_product(y)?);
            }
        }

        q.scale_in_place(gamma);

        for term in (1..=m).rev() {
            let slot = slot_for(count + 1 - term, capacity);
            let (s, y, rho) = self.pair(slot)?;
            trace!("second loop: term {term} -> slot {slot}");

            let beta = rho * y.dot_product(&q)?;
            q.axpby(alpha[term - 1] - beta, s, T::one())?;
        }

        // The sign convention here follows the textbook recursion; whether
        // the ALMO driver expects -q or q has not been re-derived.
        q.scale_in_place(-T::one());
        Ok(q)
    }

    fn release(self) -> usize {
        let mut released = 0;
        for slot in self.slots.into_iter().flatten().flatten() {
            slot.matrix.release();
            released += 1;
        }
        released
    }
}

/// Circular L-BFGS history of variable/gradient pairs per spin channel.
///
/// # Examples
///
/// ```rust
/// use almoscf_optim::HistoryStore;
/// use nalgebra::DMatrix;
///
/// let x = |v: f64| vec![DMatrix::from_element(1, 1, v)];
///
/// let mut store = HistoryStore::new(1, 2).unwrap();
/// store.seed(&x(1.0), &x(2.0)).unwrap();
///
/// let direction = store.compute_direction(&x(1.1), &x(1.8)).unwrap();
/// assert!((direction[0][(0, 0)] - 0.9).abs() < 1e-12);
/// ```
#[derive(Debug)]
pub struct HistoryStore<T: Scalar, M> {
    config: LbfgsConfig<T>,
    capacity: usize,
    push_count: [usize; 2],
    usable_pairs: usize,
    state: HistoryState,
    spins: Vec<SpinHistory<T, M>>,
}

impl<T: Scalar, M: SparseMatrix<T>> HistoryStore<T, M> {
    /// Creates a store for `spin_count` channels keeping `history_length`
    /// pairs each, with the default configuration otherwise.
    pub fn new(spin_count: usize, history_length: usize) -> OptimizerResult<Self> {
        Self::with_config(
            spin_count,
            LbfgsConfig::default().with_history_length(history_length),
        )
    }

    /// Creates a store from a full configuration.
    pub fn with_config(spin_count: usize, config: LbfgsConfig<T>) -> OptimizerResult<Self> {
        if spin_count == 0 {
            return Err(OptimizerError::invalid_argument(
                "spin_count",
                "0",
                "at least one spin channel is required",
            ));
        }
        let tolerance = config.curvature_tolerance;
        if Float::is_nan(tolerance) || tolerance < T::zero() {
            return Err(OptimizerError::invalid_argument(
                "curvature_tolerance",
                tolerance.to_string(),
                "must be non-negative",
            ));
        }

        let capacity = config.history_length.max(1);
        debug!("L-BFGS history created: {spin_count} spin(s), {capacity} slot(s)");

        Ok(Self {
            config,
            capacity,
            push_count: [0; 2],
            usable_pairs: 0,
            state: HistoryState::Created,
            spins: (0..spin_count).map(|_| SpinHistory::new(capacity)).collect(),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &LbfgsConfig<T> {
        &self.config
    }

    /// Number of spin channels.
    pub fn spin_count(&self) -> usize {
        self.spins.len()
    }

    /// Effective number of slots per spin and track.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of delta pushes recorded on `track`.
    pub fn push_count(&self, track: Track) -> usize {
        self.push_count[track.index()]
    }

    /// Number of pairs the next recursion will use.
    pub fn usable_pairs(&self) -> usize {
        self.usable_pairs
    }

    /// Current lifecycle state.
    pub fn state(&self) -> HistoryState {
        self.state
    }

    /// Storage slot of counter value `counter`; `None` for 0, which no push
    /// ever produces.
    pub fn slot_index(&self, counter: usize) -> Option<usize> {
        counter.checked_sub(1).map(|c| c % self.capacity)
    }

    /// Curvature scalar of `slot` in `spin`, if a complete pair lives there.
    pub fn rho(&self, spin: usize, slot: usize) -> Option<T> {
        self.spins.get(spin)?.rho.get(slot).copied().flatten()
    }

    /// Matrix stored in `slot` of `track` for `spin`.
    pub fn stored(&self, spin: usize, track: Track, slot: usize) -> Option<&M> {
        self.slot(spin, track, slot).map(|s| &s.matrix)
    }

    /// Content kind of `slot` of `track` for `spin`.
    pub fn slot_kind(&self, spin: usize, track: Track, slot: usize) -> Option<SlotKind> {
        self.slot(spin, track, slot).map(|s| s.kind)
    }

    fn slot(&self, spin: usize, track: Track, slot: usize) -> Option<&Slot<M>> {
        self.spins.get(spin)?.slots[track.index()].get(slot)?.as_ref()
    }

    /// Summary of the store for diagnostics.
    pub fn summary(&self) -> HashMap<String, String> {
        let mut summary = HashMap::new();
        summary.insert("spin_count".to_string(), self.spin_count().to_string());
        summary.insert("capacity".to_string(), self.capacity.to_string());
        summary.insert("push_count".to_string(), self.push_count[0].to_string());
        summary.insert("usable_pairs".to_string(), self.usable_pairs.to_string());
        summary.insert("state".to_string(), format!("{:?}", self.state));
        summary
    }

    fn check_spin_len(&self, parameter: &str, len: usize) -> OptimizerResult<()> {
        if len == self.spins.len() {
            Ok(())
        } else {
            Err(OptimizerError::invalid_argument(
                parameter,
                format!("{len} matrices"),
                format!("expected one matrix per spin ({})", self.spins.len()),
            ))
        }
    }

    fn check_lockstep(&self, operation: &str) -> OptimizerResult<()> {
        let [variable, gradient] = self.push_count;
        if variable == gradient {
            Ok(())
        } else {
            warn!("L-BFGS tracks out of step in {operation}: {variable} vs {gradient}");
            Err(OptimizerError::protocol_violation(
                operation,
                format!("variable track at {variable} pushes, gradient track at {gradient}"),
            ))
        }
    }

    /// Checks a variable/gradient pair: one matrix per spin, each variable
    /// compatible with its gradient.
    fn check_pair(&self, variable: &[M], gradient: &[M]) -> OptimizerResult<()> {
        self.check_spin_len("variable", variable.len())?;
        self.check_spin_len("gradient", gradient.len())?;
        for (x, g) in variable.iter().zip(gradient) {
            x.check_compatible(g)?;
        }
        Ok(())
    }

    /// Checks, without modifying anything, that `matrices` can be pushed
    /// onto `slot` of `track`: every input is compatible with all populated
    /// slots of its spin, and with `expect_seed` the target slot holds a seed
    /// on every spin.
    fn check_push(
        &self,
        operation: &str,
        track: Track,
        slot: usize,
        matrices: &[M],
        expect_seed: bool,
    ) -> OptimizerResult<()> {
        self.check_spin_len("matrices", matrices.len())?;
        for (index, (spin, matrix)) in self.spins.iter().zip(matrices).enumerate() {
            let slots = &spin.slots[track.index()];
            if expect_seed && !slots[slot].as_ref().is_some_and(|s| s.kind == SlotKind::Seed) {
                return Err(OptimizerError::protocol_violation(
                    operation,
                    format!("{track:?} slot {slot} of spin {index} was not seeded"),
                ));
            }
            for stored in slots.iter().flatten() {
                stored.matrix.check_compatible(matrix)?;
            }
        }
        Ok(())
    }

    /// Stores the initial point.
    ///
    /// Only valid before any delta has been recorded; seeding twice simply
    /// replaces the seed.
    pub fn seed(&mut self, variable: &[M], gradient: &[M]) -> OptimizerResult<()> {
        if self.push_count.iter().any(|&c| c > 0) {
            return Err(OptimizerError::protocol_violation(
                "seed",
                "history already holds deltas; reset the store before reseeding",
            ));
        }
        self.check_pair(variable, gradient)?;
        self.check_push("seed", Track::Variable, 0, variable, false)?;
        self.check_push("seed", Track::Gradient, 0, gradient, false)?;

        self.push_seed(Track::Variable, variable)?;
        self.push_seed(Track::Gradient, gradient)
    }

    /// Copies `matrices` into the slot the next delta push of `track` will
    /// land on, without advancing the counter.
    pub fn push_seed(&mut self, track: Track, matrices: &[M]) -> OptimizerResult<()> {
        let slot = slot_for(self.push_count[track.index()] + 1, self.capacity);
        self.check_push("push_seed", track, slot, matrices, false)?;

        for (spin, matrix) in self.spins.iter_mut().zip(matrices) {
            spin.seed_slot(track, slot, matrix)?;
        }
        self.state = HistoryState::Seeded;
        Ok(())
    }

    /// Advances `track` and replaces the seed in its slot by `new - seed`.
    pub fn push_delta(&mut self, track: Track, matrices: &[M]) -> OptimizerResult<()> {
        let count = self.push_count[track.index()] + 1;
        let slot = slot_for(count, self.capacity);
        self.check_push("push_delta", track, slot, matrices, true)?;

        for (spin, matrix) in self.spins.iter_mut().zip(matrices) {
            spin.delta_slot(track, slot, matrix)?;
        }
        self.push_count[track.index()] = count;
        Ok(())
    }

    /// Computes `ρ = 1 / <s, y>` for the most recent pair of every spin.
    pub fn update_rho(&mut self) -> OptimizerResult<()> {
        self.check_lockstep("update_rho")?;
        let count = self.push_count[0];
        if count == 0 {
            return Err(OptimizerError::protocol_violation(
                "update_rho",
                "no delta has been pushed",
            ));
        }
        let slot = slot_for(count, self.capacity);
        let policy = self.config.curvature_policy;
        let tolerance = self.config.curvature_tolerance;

        let mut degenerate = false;
        for (index, spin) in self.spins.iter_mut().enumerate() {
            let (s, y) = match (
                spin.delta(Track::Variable, slot),
                spin.delta(Track::Gradient, slot),
            ) {
                (Some(s), Some(y)) => (s, y),
                _ => {
                    return Err(OptimizerError::protocol_violation(
                        "update_rho",
                        format!("slot {slot} of spin {index} holds no delta pair"),
                    ))
                }
            };

            let sy = s.dot_product(y)?;
            let rho = T::one() / sy;

            let breakdown = match policy {
                CurvaturePolicy::Unguarded => false,
                CurvaturePolicy::Restart => {
                    let scale = Float::sqrt(s.dot_product(s)? * y.dot_product(y)?);
                    !Float::is_finite(rho) || Float::abs(sy) <= tolerance * scale
                }
            };

            if breakdown {
                warn!("L-BFGS curvature breakdown on spin {index}: <s, y> = {sy}");
                spin.rho[slot] = None;
                degenerate = true;
            } else {
                debug!("L-BFGS rho[spin {index}][slot {slot}] = {rho}");
                spin.rho[slot] = Some(rho);
            }
        }

        if degenerate {
            warn!("L-BFGS history restarted after {count} pushes");
            self.usable_pairs = 0;
        } else {
            self.usable_pairs = (self.usable_pairs + 1).min(self.capacity);
        }
        Ok(())
    }

    /// Runs the two-loop recursion on `gradient` without touching the store.
    pub fn two_loop(&self, gradient: &[M]) -> OptimizerResult<Vec<M>> {
        let (count, m) = self.recursion_bounds(gradient)?;
        self.spins
            .iter()
            .zip(gradient)
            .map(|(spin, g)| spin.two_loop(g, count, self.capacity, m))
            .collect()
    }

    /// Same as [`two_loop`](Self::two_loop) with spin channels processed in
    /// parallel.
    #[cfg(feature = "parallel")]
    pub fn two_loop_parallel(&self, gradient: &[M]) -> OptimizerResult<Vec<M>>
    where
        M: Send + Sync,
    {
        use rayon::prelude::*;

        let (count, m) = self.recursion_bounds(gradient)?;
        self.spins
            .par_iter()
            .zip(gradient.par_iter())
            .map(|(spin, g)| spin.two_loop(g, count, self.capacity, m))
            .collect()
    }

    fn recursion_bounds(&self, gradient: &[M]) -> OptimizerResult<(usize, usize)> {
        self.check_lockstep("two_loop")?;
        self.check_spin_len("gradient", gradient.len())?;
        let count = self.push_count[0];
        let m = self.usable_pairs.min(count).min(self.capacity);
        trace!("two-loop recursion over {m} pair(s) at push {count}");
        Ok((count, m))
    }

    /// Records the new point and returns one search direction per spin.
    pub fn compute_direction(&mut self, variable: &[M], gradient: &[M]) -> OptimizerResult<Vec<M>> {
        self.begin_cycle(variable, gradient)?;
        let direction = self.two_loop(gradient)?;
        self.finish_cycle(variable, gradient)?;
        Ok(direction)
    }

    /// Same as [`compute_direction`](Self::compute_direction) with the
    /// recursion run in parallel over spin channels.
    #[cfg(feature = "parallel")]
    pub fn compute_direction_parallel(
        &mut self,
        variable: &[M],
        gradient: &[M],
    ) -> OptimizerResult<Vec<M>>
    where
        M: Send + Sync,
    {
        self.begin_cycle(variable, gradient)?;
        let direction = self.two_loop_parallel(gradient)?;
        self.finish_cycle(variable, gradient)?;
        Ok(direction)
    }

    fn begin_cycle(&mut self, variable: &[M], gradient: &[M]) -> OptimizerResult<()> {
        if self.state != HistoryState::Seeded {
            return Err(OptimizerError::protocol_violation(
                "compute_direction",
                "store has not been seeded",
            ));
        }
        self.check_lockstep("compute_direction")?;
        self.check_pair(variable, gradient)?;

        // Nothing below may fail once the first delta is written.
        let slot = slot_for(self.push_count[0] + 1, self.capacity);
        self.check_push("compute_direction", Track::Variable, slot, variable, true)?;
        self.check_push("compute_direction", Track::Gradient, slot, gradient, true)?;

        self.push_delta(Track::Variable, variable)?;
        self.push_delta(Track::Gradient, gradient)?;
        self.update_rho()
    }

    fn finish_cycle(&mut self, variable: &[M], gradient: &[M]) -> OptimizerResult<()> {
        self.push_seed(Track::Variable, variable)?;
        self.push_seed(Track::Gradient, gradient)?;
        debug!(
            "L-BFGS cycle {} done, {} usable pair(s)",
            self.push_count[0], self.usable_pairs
        );
        Ok(())
    }

    /// Releases every stored matrix and returns to [`HistoryState::Created`].
    pub fn reset(&mut self) -> usize {
        let capacity = self.capacity;
        let released = self
            .spins
            .iter_mut()
            .map(|spin| std::mem::replace(spin, SpinHistory::new(capacity)).release())
            .sum::<usize>();
        self.push_count = [0; 2];
        self.usable_pairs = 0;
        self.state = HistoryState::Created;
        released
    }

    /// Releases every populated slot through the backend and consumes the
    /// store. Returns the number of matrices released.
    pub fn release(self) -> usize {
        let released: usize = self.spins.into_iter().map(SpinHistory::release).sum();
        debug!("L-BFGS history released {released} matrices");
        released
    }
}
