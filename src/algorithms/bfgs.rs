//! BFGS minimization of the mean squared residual through `argmin`.
//!
//! The objective is exposed to `argmin` as a `CostFunction` + `Gradient` pair
//! over `ndarray` parameter vectors. When a search region is configured the
//! iterates are not projected; instead the cost is evaluated at the nearest
//! point of the region plus a quadratic penalty on the distance outside it,
//! which keeps the problem smooth for the line search.

use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use argmin::core::observers::{Observe, ObserverMode};
use argmin::core::{CostFunction, Error, Executor, Gradient, State, TerminationReason, KV};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::BFGS;
use ndarray::{array, Array1, Array2};
use tracing::{debug, warn};

use crate::algorithms::bounds::SearchBounds;
use crate::algorithms::objective::MeanSquaredResidual;
use crate::algorithms::SolverOutcome;
use crate::core::Point2D;
use crate::utils::config::EstimatorConfig;
use crate::validation::error::{EstimationError, EstimationResult};

pub type Param = Array1<f64>;
pub type InvHessian = Array2<f64>;
pub type MoreThuenteLS = MoreThuenteLineSearch<Param, Param, f64>;
pub type BfgsMoreThuente = BFGS<MoreThuenteLS, f64>;

const ALGORITHM: &str = "BFGS";

fn to_point(p: &Param) -> Point2D {
    Point2D::new(p[0], p[1])
}

/// Bridges [`MeanSquaredResidual`] to `argmin`.
///
/// Every finite cost evaluation is recorded so that a backend failure can
/// still report the best point the solver reached.
pub struct ArgMinAdapter<'a> {
    objective: MeanSquaredResidual<'a>,
    bounds: Option<SearchBounds>,
    best: &'a BestPoint,
}

/// Lowest finite cost evaluated so far and where it was found
pub type BestPoint = RefCell<Option<(Point2D, f64)>>;

impl<'a> ArgMinAdapter<'a> {
    pub fn new(
        objective: MeanSquaredResidual<'a>,
        bounds: Option<SearchBounds>,
        best: &'a BestPoint,
    ) -> Self {
        Self {
            objective,
            bounds,
            best,
        }
    }

    /// Penalized objective at `p`
    pub fn penalized_value(&self, p: &Point2D) -> f64 {
        match &self.bounds {
            Some(bounds) => {
                let inside = bounds.clamp(p);
                let outside = inside.distance_to(p);
                self.objective.value(&inside) + outside * outside
            }
            None => self.objective.value(p),
        }
    }

    fn penalized_gradient(&self, p: &Point2D) -> Param {
        match &self.bounds {
            Some(bounds) => {
                let inside = bounds.clamp(p);
                let g = self.objective.gradient(&inside);
                // clamped coordinates do not move the inner objective
                let gx = if inside.x == p.x { g.x } else { 0.0 };
                let gy = if inside.y == p.y { g.y } else { 0.0 };
                array![gx + 2.0 * (p.x - inside.x), gy + 2.0 * (p.y - inside.y)]
            }
            None => {
                let g = self.objective.gradient(p);
                array![g.x, g.y]
            }
        }
    }

    fn record(&self, p: Point2D, cost: f64) {
        let mut best = self.best.borrow_mut();
        let improved = match *best {
            Some((_, best_cost)) => cost < best_cost,
            None => true,
        };
        if improved {
            *best = Some((p, cost));
        }
    }
}

impl CostFunction for ArgMinAdapter<'_> {
    type Param = Param;
    type Output = f64;

    fn cost(&self, param: &Self::Param) -> Result<Self::Output, Error> {
        let p = to_point(param);
        let value = self.penalized_value(&p);
        if !value.is_finite() || !p.is_finite() {
            return Err(EstimationError::NumericDivergence {
                algorithm: ALGORITHM.to_string(),
                x: p.x,
                y: p.y,
            }
            .into());
        }
        self.record(p, value);
        Ok(value)
    }
}

impl Gradient for ArgMinAdapter<'_> {
    type Param = Param;
    type Gradient = Param;

    fn gradient(&self, param: &Self::Param) -> Result<Self::Gradient, Error> {
        let g = self.penalized_gradient(&to_point(param));
        if g.iter().any(|v| !v.is_finite()) {
            return Err(EstimationError::NumericDivergence {
                algorithm: ALGORITHM.to_string(),
                x: param[0],
                y: param[1],
            }
            .into());
        }
        Ok(g)
    }
}

/// Counts completed iterations, which outlive a run that ends in an error
#[derive(Debug, Clone, Default)]
struct IterationCounter(Arc<AtomicU64>);

impl IterationCounter {
    fn completed(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl<I: State> Observe<I> for IterationCounter {
    fn observe_iter(&mut self, _state: &I, _kv: &KV) -> Result<(), Error> {
        self.0.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Outcome of a run the backend aborted: the best finite point evaluated if
/// it beats the start, otherwise the start itself
fn early_stop_outcome(
    best: Option<(Point2D, f64)>,
    start: Point2D,
    start_cost: f64,
    iterations: u64,
) -> SolverOutcome {
    let position = match best {
        Some((position, cost)) if cost < start_cost => position,
        _ => start,
    };
    SolverOutcome {
        position,
        iterations,
        converged: false,
    }
}

/// Construct BFGS with More-Thuente line search and the configured tolerances
pub fn build_solver(config: &EstimatorConfig) -> EstimationResult<BfgsMoreThuente> {
    let linesearch = MoreThuenteLS::new();
    let solver = BFGS::new(linesearch)
        .with_tolerance_grad(config.gradient_tolerance)?
        .with_tolerance_cost(config.cost_tolerance)?;
    Ok(solver)
}

/// Minimize from `seed`, returning the terminal iterate
pub fn minimize(
    objective: MeanSquaredResidual<'_>,
    seed: Point2D,
    bounds: Option<SearchBounds>,
    config: &EstimatorConfig,
) -> EstimationResult<SolverOutcome> {
    let start = objective.step_off_anchor(&seed).unwrap_or(seed);
    let best = BestPoint::new(None);
    let problem = ArgMinAdapter::new(objective, bounds, &best);
    let start_cost = problem.penalized_value(&start);

    if problem.penalized_gradient(&start).iter().all(|g| g.abs() < config.gradient_tolerance) {
        debug!(x = start.x, y = start.y, "start point is already stationary");
        return Ok(SolverOutcome {
            position: start,
            iterations: 0,
            converged: true,
        });
    }

    let solver = build_solver(config)?;
    let init: Param = array![start.x, start.y];
    let inv_hessian: InvHessian = Array2::eye(2);
    let max_iters = config.max_iterations;
    let counter = IterationCounter::default();

    let run = Executor::new(problem, solver)
        .configure(|state| state.param(init).inv_hessian(inv_hessian).max_iters(max_iters))
        .add_observer(counter.clone(), ObserverMode::Always)
        .run();

    match run {
        Ok(result) => {
            let state = result.state();
            let iterations = state.get_iter();
            let converged = !matches!(
                state.get_termination_reason(),
                Some(TerminationReason::MaxItersReached) | None
            );
            let param = state
                .get_best_param()
                .or_else(|| state.get_param())
                .cloned()
                .ok_or_else(|| EstimationError::SolverFailure {
                    algorithm: ALGORITHM.to_string(),
                    details: "solver finished without a parameter vector".to_string(),
                })?;
            let position = to_point(&param);
            if !position.is_finite() {
                return Err(EstimationError::NumericDivergence {
                    algorithm: ALGORITHM.to_string(),
                    x: position.x,
                    y: position.y,
                });
            }
            Ok(SolverOutcome {
                position,
                iterations,
                converged,
            })
        }
        Err(err) => {
            // A line search that gives up still leaves the best point it evaluated
            let outcome = early_stop_outcome(best.take(), start, start_cost, counter.completed());
            warn!(
                error = %err,
                x = outcome.position.x,
                y = outcome.position.y,
                iterations = outcome.iterations,
                "BFGS stopped early, keeping best finite iterate"
            );
            Ok(outcome)
        }
    }
}
