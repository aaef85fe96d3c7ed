//! Econometrics kernels behind [`crate::EstimationEngine`].
//!
//! - **HDFE**: weighted multi-way fixed-effect absorption (MAP).
//! - **Linear**: collinearity screening, OLS and 2SLS on transformed columns.
//! - **Covariance**: cluster-robust (Liang–Zeger) and White sandwiches.

pub mod covariance;
pub mod hdfe;
pub mod linear;

pub use covariance::{CovarianceMode, cluster_robust_cov, heteroskedastic_cov};
pub use hdfe::FixedEffectsSolver;
pub use linear::{FirstStage, independent_columns, least_squares, two_stage};
