//! Allocation optimizer.
//!
//! Pipeline for one call: validate inputs, bounds check, build the model,
//! classify it, dispatch to the matching backend, validate the allocation
//! against the exact law. Configuration and backends are explicit values held
//! by the optimizer; there is no global solver state.

use ct_core::{
    Allocation, Error, MipBackend, Result, SolverConfig, SolverFamily, TerminationStatus, Trial,
};
use ct_prob::{InversionConfig, SpectralConfig, TrialEnrollment, ccdf, normal_quantile, pmf_auto};
use ct_solver::{OuterApproximation, SpatialBranchAndBound};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::model::{CenterTerms, build_model, center_terms, normal_probability, total_moments};
use crate::report::{BoundsCheck, DesignReport, DesignWarning, Route, SolveSummary};

/// Largest accepted gap between the inversion and spectral probabilities.
const CROSS_CHECK_TOL: f64 = 1e-6;

/// Optimizer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignConfig {
    /// Passed verbatim to the backend.
    pub solver: SolverConfig,
    /// Spectral PMF settings for the cross-check.
    pub spectral: SpectralConfig,
    /// Inversion settings for the exact success probability.
    pub inversion: InversionConfig,
    /// Recompute the exact probability from the spectral PMF as well.
    pub cross_check: bool,
}

impl Default for DesignConfig {
    fn default() -> Self {
        Self {
            solver: SolverConfig::default(),
            spectral: SpectralConfig::default(),
            inversion: InversionConfig::default(),
            cross_check: true,
        }
    }
}

/// The two backend capabilities the optimizer dispatches between.
#[derive(Clone)]
pub struct Backends {
    convex: Arc<dyn MipBackend>,
    nonconvex: Arc<dyn MipBackend>,
}

impl Backends {
    /// Pair a convex-capable and a nonconvex-capable backend.
    ///
    /// A general nonconvex backend may fill the convex slot; the reverse is
    /// rejected.
    pub fn new(convex: Arc<dyn MipBackend>, nonconvex: Arc<dyn MipBackend>) -> Result<Self> {
        if nonconvex.family() != SolverFamily::NonconvexMixedInteger {
            return Err(Error::Validation(format!(
                "backend '{}' ({}) cannot solve nonconvex models",
                nonconvex.name(),
                nonconvex.family()
            )));
        }
        Ok(Self { convex, nonconvex })
    }

    /// Backend for the convex route.
    pub fn convex(&self) -> &dyn MipBackend {
        self.convex.as_ref()
    }

    /// Backend for the nonconvex route.
    pub fn nonconvex(&self) -> &dyn MipBackend {
        self.nonconvex.as_ref()
    }
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            convex: Arc::new(OuterApproximation::new()),
            nonconvex: Arc::new(SpatialBranchAndBound::new()),
        }
    }
}

impl fmt::Debug for Backends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backends")
            .field("convex", &self.convex.name())
            .field("nonconvex", &self.nonconvex.name())
            .finish()
    }
}

/// Cost-minimizing center allocation under a success-probability target.
#[derive(Debug, Clone, Default)]
pub struct AllocationOptimizer {
    config: DesignConfig,
    backends: Backends,
}

impl AllocationOptimizer {
    /// Optimizer with the reference backends.
    pub fn new(config: DesignConfig) -> Self {
        Self { config, backends: Backends::default() }
    }

    /// Optimizer with caller-supplied backends.
    pub fn with_backends(config: DesignConfig, backends: Backends) -> Self {
        Self { config, backends }
    }

    /// Active configuration.
    pub fn config(&self) -> &DesignConfig {
        &self.config
    }

    /// Active backends.
    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    /// Normal-approximation `P(N > ntarget)` with every country at `l`.
    pub fn lower_bound_test(&self, trial: &Trial, ntarget: f64) -> f64 {
        normal_probability(&center_terms(trial), &trial.lower_bounds(), ntarget)
    }

    /// Normal-approximation `P(N > ntarget)` with every country at `u`.
    pub fn upper_bound_test(&self, trial: &Trial, ntarget: f64) -> f64 {
        normal_probability(&center_terms(trial), &trial.upper_bounds(), ntarget)
    }

    /// Cheapest allocation whose normal-approximation success probability
    /// `P(N > ntarget)` is at least `ps`.
    pub fn optimize(&self, trial: &Trial, ntarget: f64, ps: f64) -> Result<DesignReport> {
        let start = Instant::now();
        validate_inputs(trial, ntarget, ps)?;
        self.config.solver.validate()?;

        let terms = center_terms(trial);
        let lower = trial.lower_bounds();
        let upper = trial.upper_bounds();
        let bounds = BoundsCheck {
            at_lower: normal_probability(&terms, &lower, ntarget),
            at_upper: normal_probability(&terms, &upper, ntarget),
        };
        tracing::info!(
            ntarget,
            ps,
            at_lower = bounds.at_lower,
            at_upper = bounds.at_upper,
            "bounds check"
        );

        if bounds.at_lower >= ps {
            tracing::info!(allocation = ?lower, "lower bounds meet the target; no solve needed");
            let allocation = Allocation::new(lower);
            return self.finish(
                trial,
                &terms,
                allocation,
                Route::MinimumAllocation,
                (ntarget, ps, bounds),
                None,
                Vec::new(),
                start,
            );
        }
        if bounds.at_upper < ps {
            return Err(Error::Infeasible { achievable: bounds.at_upper, required: ps });
        }

        let model = build_model(trial, ntarget, ps)?;
        // `z < 0` keeps the chance constraint strictly concave. From `z = 0`
        // (`ps >= 0.5`) on, the nonconvex backend owns the model.
        let (route, backend) = if normal_quantile(ps) < 0.0 && model.is_convex() {
            (Route::Convex, self.backends.convex())
        } else {
            (Route::Nonconvex, self.backends.nonconvex())
        };
        tracing::info!(%route, backend = backend.name(), family = %backend.family(), "dispatch");

        let outcome = backend.solve(&model, &self.config.solver)?;
        tracing::info!(
            backend = backend.name(),
            status = %outcome.status,
            nodes = outcome.statistics.nodes,
            cuts = outcome.statistics.cuts,
            objective = ?outcome.objective_value,
            "backend finished"
        );

        let usable = outcome.status == TerminationStatus::Optimal || outcome.status.is_limit();
        let x = match &outcome.solution {
            Some(x) if usable => x,
            _ => {
                return Err(Error::Solver {
                    backend: backend.name().to_string(),
                    status: outcome.status.clone(),
                });
            }
        };
        if !model.is_feasible(x, self.config.solver.feasibility_tol.max(1e-9)) {
            return Err(Error::Solver {
                backend: backend.name().to_string(),
                status: TerminationStatus::Other(format!("returned infeasible point {x:?}")),
            });
        }
        let centers = x
            .iter()
            .map(|&v| u32::try_from(v))
            .collect::<std::result::Result<Vec<u32>, _>>()
            .map_err(|e| Error::Computation(format!("backend point {x:?} is out of range: {e}")))?;

        let mut warnings = Vec::new();
        if outcome.status.is_limit() {
            let warning = DesignWarning::NotProvenOptimal {
                status: outcome.status.clone(),
                relative_gap: outcome.relative_gap(),
            };
            tracing::warn!(%warning, "using best-found allocation");
            warnings.push(warning);
        }

        let summary = SolveSummary::new(backend.name(), backend.family(), &outcome);
        self.finish(
            trial,
            &terms,
            Allocation::new(centers),
            route,
            (ntarget, ps, bounds),
            Some(summary),
            warnings,
            start,
        )
    }

    /// Post-solve validation and report assembly.
    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        trial: &Trial,
        terms: &[CenterTerms],
        allocation: Allocation,
        route: Route,
        (ntarget, ps, bounds): (f64, f64, BoundsCheck),
        solve: Option<SolveSummary>,
        mut warnings: Vec<DesignWarning>,
        start: Instant,
    ) -> Result<DesignReport> {
        trial.check_centers(&allocation.centers)?;
        let (mean, variance) = total_moments(terms, &allocation.centers);
        let normal = normal_probability(terms, &allocation.centers, ntarget);
        let expected_cost = ct_prob::expected_cost(trial, &allocation.centers)?;

        let law = TrialEnrollment::new(trial, &allocation.centers)?;
        let exact = ccdf(&law, ntarget, &self.config.inversion)?;

        let spectral = if self.config.cross_check {
            let p = pmf_auto(&law, &self.config.spectral)?;
            let k = ntarget.floor() as usize;
            let below: f64 = p.iter().take(k.saturating_add(1)).sum();
            let spectral = (1.0 - below).max(0.0);
            if (spectral - exact).abs() > CROSS_CHECK_TOL {
                let warning = DesignWarning::CrossCheckMismatch { inversion: exact, spectral };
                tracing::warn!(%warning, "exact probability cross-check");
                warnings.push(warning);
            }
            Some(spectral)
        } else {
            None
        };

        if exact < normal {
            let warning = DesignWarning::ApproximationOptimistic { normal, exact };
            tracing::warn!(allocation = %allocation, %warning, "design may under-deliver");
            warnings.push(warning);
        }
        tracing::info!(
            allocation = %allocation,
            expected_cost,
            pos_normal = normal,
            pos_exact = exact,
            "design validated"
        );

        Ok(DesignReport {
            allocation,
            route,
            ntarget,
            ps,
            z: normal_quantile(ps),
            expected_cost,
            mean,
            variance,
            normal_probability: normal,
            exact_probability: exact,
            spectral_probability: spectral,
            bounds,
            solve,
            warnings,
            duration_seconds: start.elapsed().as_secs_f64(),
        })
    }
}

fn validate_inputs(trial: &Trial, ntarget: f64, ps: f64) -> Result<()> {
    if !ntarget.is_finite() || ntarget <= 0.0 {
        return Err(Error::Validation(format!("ntarget must be finite and > 0, got {ntarget}")));
    }
    if !(ps > 0.0 && ps < 1.0) {
        return Err(Error::Validation(format!("ps must lie in (0, 1), got {ps}")));
    }
    if trial.td() <= 0.0 {
        return Err(Error::Validation(format!(
            "trial duration must be > 0, got {}",
            trial.td()
        )));
    }
    for (i, country) in trial.countries().iter().enumerate() {
        country.validate().map_err(|e| match e {
            Error::Validation(msg) => Error::Validation(format!("country {i}: {msg}")),
            other => other,
        })?;
    }
    Ok(())
}
