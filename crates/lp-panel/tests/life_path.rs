//! End-to-end assembly over a small synthetic fixture: 3 sectors × 5 years × 3 ages.

use approx::assert_relative_eq;
use lp_core::{Error, IntoFrame, MISSING, SectorCode, Year};
use lp_panel::{
    BasePanel, CohortPanelAssembler, FirmCounts, GdpRecord, LagVar, PanelVariant, RawFirmRecord, RegulationRecord,
    SectorEntryAggregator, SectorLevel,
};

const SECTORS: [&str; 3] = ["2111", "2211", "2311"];
const YEARS: std::ops::RangeInclusive<Year> = 2000..=2004;
const AGES: [(&str, f64); 3] = [("a) 0", 2.0), ("b) 1", 3.0), ("c) 2", 5.0)];

fn restriction(year: Year, sector_2: u32) -> f64 {
    10.0 * f64::from(sector_2 - 20) + f64::from(year - 1999)
}

fn raw_fixture() -> Vec<RawFirmRecord> {
    let mut raw = Vec::new();
    for year in YEARS {
        for sector in SECTORS {
            for (label, firms) in AGES {
                raw.push(RawFirmRecord {
                    year,
                    sector: sector.to_string(),
                    fage: Some(label.to_string()),
                    fsize: None,
                    counts: FirmCounts { firms, emp: 10.0 * firms, denom: 10.0 * firms, ..FirmCounts::default() },
                });
            }
        }
    }
    raw
}

fn regulation() -> Vec<RegulationRecord> {
    let mut out = Vec::new();
    for year in YEARS {
        for sector_2 in [21, 22, 23] {
            out.push(RegulationRecord {
                year,
                sector: SectorCode::new(sector_2),
                restrictions_coarse: MISSING,
                restrictions_fine: restriction(year, sector_2),
                restrictions_fine_prev: MISSING,
                bartik_iv: 0.1 * f64::from(year - 1999),
            });
        }
    }
    out
}

fn gdp() -> Vec<GdpRecord> {
    YEARS
        .flat_map(|year| {
            [21, 22, 23].map(|s| GdpRecord { year, sector: SectorCode::new(s), gdp: 100.0 + f64::from(year - 2000) })
        })
        .collect()
}

#[test]
fn pre_cohort_level_matches_hand_computed_restriction() {
    let base = BasePanel::build(PanelVariant::SectorAge, &raw_fixture()).unwrap();
    assert_eq!(base.len(), 3 * 5 * 3);

    let entry = SectorEntryAggregator::new(SectorLevel::AsPanel, false).aggregate(&base).unwrap();
    let panel = CohortPanelAssembler::new(&regulation(), &gdp(), &entry).unwrap().assemble(&base).unwrap();

    let age_2: Vec<_> = panel.records().iter().filter(|r| r.key().age.map(|a| a.get()) == Some(2)).collect();
    assert_eq!(age_2.len(), 15);
    for r in age_2 {
        let key = r.key();
        let sector_2 = key.sector.two_digit().code();
        let summary = r.summary(LagVar::LogRestriction);
        if key.year - 3 >= 2000 {
            let expected = restriction(key.year - 3, sector_2).ln();
            assert_relative_eq!(summary.pre_cohort_level, expected, epsilon = 1e-12);
            let change = restriction(key.year, sector_2).ln() - expected;
            assert_relative_eq!(summary.level_change, change, epsilon = 1e-12);
            assert_relative_eq!(summary.avg_change, change / 2.0, epsilon = 1e-12);
            assert_relative_eq!(summary.avg_change_post_entry, change, epsilon = 1e-12);
        } else {
            assert!(summary.pre_cohort_level.is_nan(), "no regulation before 2000 for {key:?}");
        }
        assert_eq!(r.cohort(), Some(key.year - 2));
    }
}

#[test]
fn entry_rates_and_growth_are_joined_per_lag() {
    let base = BasePanel::build(PanelVariant::SectorAge, &raw_fixture()).unwrap();
    let entry = SectorEntryAggregator::new(SectorLevel::AsPanel, false).aggregate(&base).unwrap();
    let panel = CohortPanelAssembler::new(&regulation(), &gdp(), &entry)
        .unwrap()
        .with_max_lag(3)
        .assemble(&base)
        .unwrap();

    let r = panel.records().iter().find(|r| r.key().year == 2004).unwrap();
    for lag in 0..=3 {
        assert_relative_eq!(r.lag(LagVar::EntryRate, lag), 0.25, epsilon = 1e-12);
    }
    assert!(r.lag(LagVar::EntryRate, 4).is_nan());
    assert_relative_eq!(r.lag(LagVar::LogGdp, 2), 102.0_f64.ln(), epsilon = 1e-12);
    assert_relative_eq!(r.lag(LagVar::ChgBartikIv, 0), 0.1, epsilon = 1e-12);
    // constant employment: growth is exactly zero
    assert_eq!(r.lag(LagVar::EmpGrowth, 0), 0.0);

    let frame = panel.to_frame().unwrap();
    assert_eq!(frame.n_rows(), 45);
    assert!(frame.has_column("L_3_entry_rate"));
    assert!(!frame.has_column("L_4_entry_rate"));
}

#[test]
fn duplicate_entry_key_fails_fast() {
    let base = BasePanel::build(PanelVariant::SectorAge, &raw_fixture()).unwrap();
    let mut entry = SectorEntryAggregator::new(SectorLevel::AsPanel, false).aggregate(&base).unwrap();
    entry.push(entry[0]);
    let err = CohortPanelAssembler::new(&regulation(), &gdp(), &entry).unwrap_err();
    assert!(matches!(err, Error::JoinCardinality { .. }), "{err}");
}
