//! Simulated annealing refinement of a reconstruction.
//!
//! A Metropolis chain perturbs the current best volume voxel-wise, scores
//! candidates by the L1 distance between per-angle-normalized projections
//! (optionally biased toward a prior field), and cools the temperature one
//! step per accepted transition until the floor is reached.

use limitomo_core::{utils, CoreError, CoreResult, ProjectionGeometry, Sinogram, TomographyEngine, Volume};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::projector::Projector;

/// Energy sentinel before any trial has been scored. Large enough that the
/// first finite trial is always accepted.
pub const INITIAL_ENERGY: f64 = 1e31;

/// Cooling schedule and trial-sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnealConfig {
    /// Starting temperature.
    pub initial_temperature: f64,
    /// Terminal temperature; the chain stops at or below it.
    pub floor_temperature: f64,
    /// Temperature decrement applied on each accepted transition.
    pub cooling_step: f64,
    /// Standard deviation of the per-voxel Gaussian perturbation.
    pub perturbation_sd: f64,
    /// Weight of the prior-field term in the trial energy.
    pub prior_weight: f64,
    /// Hard cap on candidate trials, in case acceptance stalls.
    pub max_iterations: usize,
    /// RNG seed; runs are deterministic per seed.
    pub seed: u64,
}

impl Default for AnnealConfig {
    fn default() -> Self {
        Self {
            initial_temperature: 100.0,
            floor_temperature: 10.0,
            cooling_step: 1.0,
            perturbation_sd: 10.0,
            prior_weight: 1.0,
            max_iterations: 100_000,
            seed: 0,
        }
    }
}

impl AnnealConfig {
    fn validate(&self) -> CoreResult<()> {
        if !self.initial_temperature.is_finite() || self.initial_temperature <= 0.0 {
            return Err(CoreError::validation("initial temperature must be positive"));
        }
        if !self.floor_temperature.is_finite() || self.floor_temperature <= 0.0 {
            return Err(CoreError::validation("floor temperature must be positive"));
        }
        if !self.cooling_step.is_finite() || self.cooling_step <= 0.0 {
            return Err(CoreError::validation("cooling step must be positive"));
        }
        if !self.perturbation_sd.is_finite() || self.perturbation_sd <= 0.0 {
            return Err(CoreError::validation("perturbation sd must be positive"));
        }
        if self.prior_weight < 0.0 {
            return Err(CoreError::validation("prior weight must be non-negative"));
        }
        if self.max_iterations == 0 {
            return Err(CoreError::validation("iteration cap must be >= 1"));
        }
        Ok(())
    }
}

/// Where the chain is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnnealingPhase {
    /// Constructed, no trial scored yet.
    Init,
    /// At least one trial scored, floor not reached.
    Iterating,
    /// Terminal: temperature at or below the floor.
    Cooled,
}

/// The chain's mutable scalar state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnnealingState {
    /// Lifecycle phase.
    pub phase: AnnealingPhase,
    /// Current temperature.
    pub temperature: f64,
    /// Energy of the current best volume ([`INITIAL_ENERGY`] until the first
    /// acceptance).
    pub energy: f64,
}

impl AnnealingState {
    /// Fresh state at `initial_temperature` with the sentinel energy.
    #[must_use]
    pub fn new(initial_temperature: f64) -> Self {
        Self {
            phase: AnnealingPhase::Init,
            temperature: initial_temperature,
            energy: INITIAL_ENERGY,
        }
    }

    /// Whether the chain has reached the terminal temperature.
    #[must_use]
    pub fn is_cooled(&self, floor: f64) -> bool {
        self.temperature <= floor
    }

    fn accept(&mut self, energy: f64, cooling_step: f64) {
        self.energy = energy;
        self.temperature -= cooling_step;
    }
}

/// One accepted transition of the chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Energy before the transition.
    pub previous_energy: f64,
    /// Energy after the transition.
    pub energy: f64,
    /// `energy - previous_energy`.
    pub delta: f64,
    /// Acceptance probability that admitted the transition.
    pub probability: f64,
    /// Temperature at which the transition was accepted.
    pub temperature: f64,
}

/// Result of a finished (or budget-capped) chain.
#[derive(Debug, Clone)]
pub struct AnnealingOutcome {
    /// The final accepted trial.
    pub volume: Volume,
    /// Final scalar state. `phase` is `Cooled` on normal termination and
    /// `Iterating` when the iteration cap cut the chain short.
    pub state: AnnealingState,
    /// Candidate trials scored.
    pub iterations: usize,
    /// Trials accepted.
    pub accepted: usize,
    /// Accepted transitions, in order.
    pub transitions: Vec<Transition>,
}

/// Metropolis acceptance probability `min(1, exp((current - trial) / t))`.
///
/// Overflow saturates at 1 and undefined ratios (such as equal energies at
/// zero temperature) clamp to 1 instead of propagating NaN.
#[must_use]
pub fn acceptance_probability(current: f64, trial: f64, temperature: f64) -> f64 {
    let ratio = ((current - trial) / temperature).exp();
    if ratio.is_nan() {
        1.0
    } else {
        ratio.min(1.0)
    }
}

/// Sequential annealing chain over engine-projected trials.
pub struct AnnealingOptimizer<'e> {
    engine: &'e dyn TomographyEngine,
    config: AnnealConfig,
}

impl<'e> AnnealingOptimizer<'e> {
    /// Creates an optimizer after validating `config`.
    pub fn new(engine: &'e dyn TomographyEngine, config: AnnealConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self { engine, config })
    }

    /// Refines `initial` against the observed sinogram.
    ///
    /// When `prior` is given, each trial's energy additionally pays
    /// `prior_weight` times its L1 distance to the prior field, biasing the
    /// chain toward statistically expected structure.
    pub fn refine(
        &self,
        initial: &Volume,
        observed: &Sinogram,
        prior: Option<&Volume>,
    ) -> CoreResult<AnnealingOutcome> {
        if let Some(prior) = prior {
            if prior.geometry() != initial.geometry() {
                return Err(CoreError::validation(
                    "prior field geometry does not match the reconstruction",
                ));
            }
        }
        let geometry = observed.geometry().clone();
        let observed_norm = utils::normalize_per_angle(observed.data());

        let perturbation = Normal::new(0.0, self.config.perturbation_sd)
            .map_err(|_| CoreError::validation("perturbation sd must be positive and finite"))?;
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let mut best = initial.clone();
        let mut state = AnnealingState::new(self.config.initial_temperature);
        let mut transitions = Vec::new();
        let mut iterations = 0usize;
        let mut accepted = 0usize;

        while !state.is_cooled(self.config.floor_temperature) {
            if iterations >= self.config.max_iterations {
                warn!(
                    iterations,
                    temperature = state.temperature,
                    "iteration cap reached before the cooling floor"
                );
                break;
            }
            iterations += 1;
            state.phase = AnnealingPhase::Iterating;

            let mut trial = best.clone();
            for voxel in trial.data_mut().iter_mut() {
                *voxel += perturbation.sample(&mut rng) as f32;
            }

            let trial_projection = self.project(&trial, &geometry)?;
            let trial_norm = utils::normalize_per_angle(trial_projection.data());
            let mut trial_energy = l1_distance(&trial_norm, &observed_norm);
            if let Some(prior) = prior {
                trial_energy += self.config.prior_weight * l1_distance(trial.data(), prior.data());
            }

            let probability = acceptance_probability(state.energy, trial_energy, state.temperature);
            let roll: f64 = rng.gen();
            if roll <= probability {
                transitions.push(Transition {
                    previous_energy: state.energy,
                    energy: trial_energy,
                    delta: trial_energy - state.energy,
                    probability,
                    temperature: state.temperature,
                });
                debug!(
                    iteration = iterations,
                    energy = trial_energy,
                    probability,
                    temperature = state.temperature,
                    "transition accepted"
                );
                state.accept(trial_energy, self.config.cooling_step);
                best = trial;
                accepted += 1;
            }
        }

        if state.is_cooled(self.config.floor_temperature) {
            state.phase = AnnealingPhase::Cooled;
        }
        info!(
            iterations,
            accepted,
            final_energy = state.energy,
            phase = ?state.phase,
            "annealing finished"
        );
        Ok(AnnealingOutcome {
            volume: best,
            state,
            iterations,
            accepted,
            transitions,
        })
    }

    fn project(&self, volume: &Volume, geometry: &ProjectionGeometry) -> CoreResult<Sinogram> {
        let mut projector = Projector::new(self.engine);
        projector.set_input_volume(volume)?;
        projector.project_onto(geometry)
    }
}

fn l1_distance(a: &Array3<f32>, b: &Array3<f32>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from((x - y).abs()))
        .sum()
}
