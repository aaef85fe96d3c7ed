//! # lp-core
//!
//! Shared foundation for lifepath: the error type, the numeric "missing"
//! conventions, domain key types and the columnar [`Frame`] handed between
//! panel assembly and estimation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod frame;
pub mod math;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use frame::Frame;
pub use math::{MISSING, is_present, safe_div, safe_ln, sample_std, sum_present, symmetric_growth};
pub use traits::IntoFrame;
pub use types::{AgeBracket, AgeBucket, SectorCode, SizeClass, Year};
