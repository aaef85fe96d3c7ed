//! Recovery and reproducibility of the fixed-effects estimators on synthetic panels.

use lp_core::{Error, Frame, MISSING};
use lp_inference::{CovarianceMode, EstimationEngine, EstimationSpec, FixedEffects, SampleFilter};

/// Deterministic uniform(−0.5, 0.5) stream.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64 - 0.5
    }
}

const N_ENTITIES: usize = 40;
const N_YEARS: usize = 15;

/// y = α_e + γ_t + 1.5·x1 − 0.7·x2 + ε, plus an IV block:
/// d = z + u, y_iv = α_e + γ_t + 2·d + 3·u.
fn panel() -> Frame {
    let mut rng_x = Lcg(7);
    let mut rng_e = Lcg(11);
    let mut rng_z = Lcg(13);
    let mut rng_u = Lcg(17);
    let names = [
        "sector", "sector_2", "year", "age", "firms", "x1", "x2", "x_dup", "entity_level", "y", "z", "d", "y_iv",
    ];
    let mut rows = Vec::new();
    for e in 0..N_ENTITIES {
        let alpha = (e as f64) * 0.3 - 4.0;
        for t in 0..N_YEARS {
            let gamma = (t as f64 * 0.9).sin();
            let x1 = rng_x.next() * 2.0 + 0.05 * t as f64;
            let x2 = rng_x.next() * 3.0;
            let eps = rng_e.next() * 0.05;
            let y = alpha + gamma + 1.5 * x1 - 0.7 * x2 + eps;
            let z = rng_z.next() * 3.0;
            let u = rng_u.next();
            let d = z + u;
            let y_iv = alpha + gamma + 2.0 * d + 3.0 * u;
            rows.push(vec![
                1000.0 + e as f64,
                (e / 4) as f64,
                2000.0 + t as f64,
                (t % 8) as f64,
                1.0 + (e % 5) as f64,
                x1,
                x2,
                2.0 * x1,
                alpha * 2.0,
                y,
                z,
                d,
                y_iv,
            ]);
        }
    }
    Frame::from_rows(names.iter().map(|n| n.to_string()).collect(), rows).unwrap()
}

fn two_way() -> FixedEffects {
    FixedEffects::two_way("sector", "year")
}

#[test]
fn weighted_two_way_fe_recovers_slopes() {
    let spec = EstimationSpec::new("recovery", "y", &["x1", "x2"])
        .weighted("firms")
        .absorb(two_way())
        .covariance(CovarianceMode::Clustered("sector_2".into()));
    let res = EstimationEngine::new().fit(&panel(), &spec).unwrap();

    let b1 = res.coefficient("x1").unwrap();
    let b2 = res.coefficient("x2").unwrap();
    assert!((b1.estimate - 1.5).abs() < 0.02, "x1 = {}", b1.estimate);
    assert!((b2.estimate + 0.7).abs() < 0.02, "x2 = {}", b2.estimate);
    assert!(b1.lower < 1.5 + 0.02 && b1.upper > 1.5 - 0.02);
    assert!(b1.p_value < 1e-6);
    assert_eq!(res.n_obs, N_ENTITIES * N_YEARS);
    assert_eq!(res.n_clusters, Some(N_ENTITIES / 4));
    assert_eq!(res.df_absorbed, N_ENTITIES + N_YEARS - 1);
    assert!(res.r_squared_within > 0.99);
}

#[test]
fn collinear_and_absorbed_regressors_are_dropped() {
    let spec = EstimationSpec::new("collinear", "y", &["x1", "x_dup", "entity_level", "x2"]).absorb(two_way());
    let res = EstimationEngine::new().fit(&panel(), &spec).unwrap();
    assert_eq!(res.dropped, vec!["x_dup".to_string(), "entity_level".to_string()]);
    let names: Vec<&str> = res.coefficients.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["x1", "x2"]);
    assert!((res.coefficient("x1").unwrap().estimate - 1.5).abs() < 0.02);
}

#[test]
fn fitting_twice_is_identical() {
    let frame = panel();
    let spec = EstimationSpec::new("repro", "y", &["x1", "x_dup", "x2"])
        .weighted("firms")
        .absorb(two_way())
        .covariance(CovarianceMode::Clustered("sector_2".into()));
    let engine = EstimationEngine::new();
    let a = engine.fit(&frame, &spec).unwrap();
    let b = engine.fit(&frame, &spec).unwrap();
    assert_eq!(a, b);

    let many = engine.fit_many(&frame, &[spec.clone(), spec]);
    for (id, r) in many {
        assert_eq!(id, "repro");
        assert_eq!(r.unwrap(), a);
    }
}

#[test]
fn iv_recovers_structural_effect_under_fixed_effects() {
    let spec = EstimationSpec::new("iv", "y_iv", &[])
        .instrument("d", "z")
        .absorb(two_way())
        .covariance(CovarianceMode::HeteroskedasticRobust);
    let res = EstimationEngine::new().fit(&panel(), &spec).unwrap();
    let b = res.coefficient("d").unwrap();
    assert!((b.estimate - 2.0).abs() < 0.15, "iv = {}", b.estimate);
    let fs = res.first_stage.unwrap();
    assert!(fs.f_stat > 100.0, "F = {}", fs.f_stat);
    assert!(fs.partial_r_squared > 0.8);

    let ols = EstimationEngine::new().fit(&panel(), &EstimationSpec::new("ols", "y_iv", &["d"]).absorb(two_way())).unwrap();
    let bias_ols = (ols.coefficient("d").unwrap().estimate - 2.0).abs();
    assert!(bias_ols > (b.estimate - 2.0).abs(), "OLS should be more biased than IV");
}

#[test]
fn undefined_values_and_filters_shrink_the_sample() {
    let frame = panel();
    let mut y = frame.column("y").unwrap().to_vec();
    y[0] = MISSING;
    y[1] = f64::ln(-1.0);
    let mut cols: Vec<(String, Vec<f64>)> =
        frame.names().iter().map(|n| (n.clone(), frame.column(n).unwrap().to_vec())).collect();
    for (name, values) in &mut cols {
        if name == "y" {
            *values = y.clone();
        }
    }
    let frame = Frame::from_columns(cols).unwrap();

    let spec = EstimationSpec::new("filtered", "y", &["x1", "x2"]).absorb(two_way());
    let res = EstimationEngine::new().fit(&frame, &spec).unwrap();
    assert_eq!(res.n_obs, N_ENTITIES * N_YEARS - 2);

    let by_age = spec.clone().filter(SampleFilter { ages: Some(vec![3]), ..SampleFilter::default() });
    let res = EstimationEngine::new().fit(&frame, &by_age).unwrap();
    // ages cycle 0..8 over 15 years: age 3 occurs at t = 3 and t = 11
    assert_eq!(res.n_obs, N_ENTITIES * 2);

    let empty = spec.filter(SampleFilter { year_min: Some(2100), ..SampleFilter::default() });
    let err = EstimationEngine::new().fit(&frame, &empty).unwrap_err();
    assert!(matches!(err, Error::EmptySample { .. }));
}

/// y = α_e + γ_t + δ_age + 1.2·x + ε with x loading on age, so the slope is
/// biased unless the age buckets are absorbed.
fn age_panel() -> Frame {
    let mut rng = Lcg(23);
    let names = [
        "sector", "year", "age", "firms", "x", "y", "age_1", "age_2", "age_3", "age_4", "age_5", "age_6", "age_7",
    ];
    let mut rows = Vec::new();
    for e in 0..30usize {
        for t in 0..12usize {
            let age = (e + 3 * t) % 8;
            let delta = [0.0, 1.0, 2.5, 3.0, 4.5, 5.0, 6.5, 8.0][age];
            let x = 0.5 * age as f64 + rng.next();
            let y = 0.2 * e as f64 + (t as f64).cos() + delta + 1.2 * x + 0.05 * rng.next();
            let mut row = vec![e as f64, 1990.0 + t as f64, age as f64, 1.0 + (t % 3) as f64, x, y];
            row.extend((1..8).map(|a| if age == a { 1.0 } else { 0.0 }));
            rows.push(row);
        }
    }
    Frame::from_rows(names.iter().map(|n| n.to_string()).collect(), rows).unwrap()
}

#[test]
fn age_dummies_absorb_age_effects() {
    let frame = age_panel();
    let engine = EstimationEngine::new();
    let plain = EstimationSpec::new("plain", "y", &["x"]).weighted("firms").absorb(two_way());
    let biased = engine.fit(&frame, &plain).unwrap();
    assert!((biased.coefficient("x").unwrap().estimate - 1.2).abs() > 0.1);

    let fe = FixedEffects { age_dummies: true, ..two_way() };
    let absorbed = engine.fit(&frame, &plain.clone().absorb(fe)).unwrap();
    let b = absorbed.coefficient("x").unwrap();
    assert!((b.estimate - 1.2).abs() < 0.02, "x = {}", b.estimate);
    // 30 sectors + 12 years + 8 ages, one shared normalization
    assert_eq!(absorbed.df_absorbed, 30 + 12 + 8 - 1);
    assert_eq!(biased.df_absorbed, 30 + 12 - 1);

    // Same model with explicit age dummies as regressors: identical slope, and the
    // robust variance differs only through the absorbed count in n/(n − a).
    let dummies = ["x", "age_1", "age_2", "age_3", "age_4", "age_5", "age_6", "age_7"];
    let explicit = engine
        .fit(&frame, &EstimationSpec::new("explicit", "y", &dummies).weighted("firms").absorb(two_way()))
        .unwrap();
    let e = explicit.coefficient("x").unwrap();
    assert!((e.estimate - b.estimate).abs() < 1e-8, "{} vs {}", e.estimate, b.estimate);
    let n = frame.n_rows() as f64;
    let expected = ((n - 41.0) / (n - 49.0)).sqrt();
    let ratio = b.std_error / e.std_error;
    assert!((ratio - expected).abs() < 1e-6, "se ratio {} vs {}", ratio, expected);
}
