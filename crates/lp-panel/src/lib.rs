//! # lp-panel
//!
//! Panel assembly for cohort life-path analysis.
//!
//! Raw firm-dynamics tables are cleaned into a [`BasePanel`], auxiliary series
//! (regulation index, sector GDP, entry counts) are built alongside, and the
//! [`CohortPanelAssembler`] joins them onto lagged keys to produce the wide
//! life-path panel consumed by estimation.
//!
//! ```no_run
//! use lp_panel::{BasePanel, CohortPanelAssembler, PanelVariant, SectorEntryAggregator, SectorLevel};
//!
//! # fn run(raw: &[lp_panel::RawFirmRecord]) -> lp_core::Result<()> {
//! let base = BasePanel::build(PanelVariant::SectorAge, raw)?;
//! let entry = SectorEntryAggregator::new(SectorLevel::AsPanel, false).aggregate(&base)?;
//! let panel = CohortPanelAssembler::new(&[], &[], &entry)?.assemble(&base)?;
//! # let _ = panel;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cohort;
pub mod derive;
pub mod entry;
pub mod gdp;
pub mod join;
pub mod lag;
pub mod observation;
pub mod patterns;
pub mod regulation;
pub mod robust;

pub use cohort::{CohortLifePathRecord, CohortPanel, CohortPanelAssembler, CohortSummary, SUMMARY_VARS};
pub use derive::{DerivedRates, derive_rates, reallocation_rate};
pub use entry::{EntryKey, EntryRecord, SectorEntryAggregator, SectorLevel};
pub use gdp::{GdpRecord, WideGdpTable};
pub use join::UniqueIndex;
pub use lag::{LagColumn, LagValues, LagVar};
pub use observation::{
    BasePanel, FirmCounts, Metric, Observation, PanelKey, PanelVariant, RawFirmRecord, missing_counts,
};
pub use patterns::{PatternPanel, PatternRecord, build_patterns};
pub use regulation::{
    DocumentMeasure, IndustryProbability, RegulationIndexBuilder, RegulationIndexRow, RegulationRecord,
    ShiftShareContribution,
};
pub use robust::{AnchorValues, CohortRobustAssembler, RobustCohortRecord, RobustPanel};
