//! # lp-inference
//!
//! Estimation over assembled panels: weighted two-way fixed-effects OLS and
//! instrumented 2SLS with cluster-robust or heteroskedasticity-robust errors,
//! plus extraction of coefficient paths across age buckets.
//!
//! Specifications are independent; [`EstimationEngine::fit_many`] runs them in
//! parallel and keeps each failure with its own spec.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod econometrics;
pub mod estimation;
pub mod path;

pub use econometrics::{CovarianceMode, FirstStage, FixedEffectsSolver};
pub use estimation::{
    AGE_COLUMN, Coefficient, EstimationEngine, EstimationResult, EstimationSpec, FixedEffects, INTERCEPT, Instrumented,
    SampleFilter, YEAR_COLUMN,
};
pub use path::{CoefficientPathExtractor, CoefficientRecord, CoefficientTable, KeyResult, key_result, stars};
