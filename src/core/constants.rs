//! Solver defaults and numeric thresholds

/// Default tolerance on the change of the objective between iterations
pub const DEFAULT_COST_TOLERANCE: f64 = 1e-4;

/// Default tolerance on the gradient norm
pub const DEFAULT_GRADIENT_TOLERANCE: f64 = 1e-8;

/// Iteration cap; a backstop, not a normal exit path for a 2-parameter problem
pub const DEFAULT_MAX_ITERATIONS: u64 = 100_000_000;

/// Extra room around the anchors' bounding box when the search region is bounded
pub const DEFAULT_BOUNDS_MARGIN: f64 = 1.0;

/// Decimal places kept by fixed-precision position storage
pub const PERSISTED_DECIMALS: u32 = 2;

/// Below this point-to-anchor distance the distance gradient is treated as zero
pub const ZERO_DISTANCE_EPSILON: f64 = 1e-12;
