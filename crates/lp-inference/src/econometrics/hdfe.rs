//! Fixed-effect absorption for weighted panels by alternating projections.
//!
//! One sweep replaces `v` by `v − E_w[v | level_d]` for every dimension `d` in
//! turn. At the fixed point each level's weighted residual mean is zero in every
//! dimension, which is the within transformation of weighted least squares with
//! the full dummy sets. Sweeps are accelerated with Irons–Tuck extrapolation;
//! an extrapolated point is an affine combination of two sweeps, so it stays in
//! `v + span(dummies)`.
//!
//! # References
//!
//! - Gaure (2013), "OLS with multiple high dimensional category variables."
//! - Bergé (2018), "Efficient estimation of maximum likelihood models with
//!   multiple fixed-effects: the R package FENmlm."

use std::collections::BTreeSet;

use lp_core::{Error, Result};

/// Largest weighted level mean tolerated at convergence, relative to the
/// largest absolute entry of the column being absorbed (floored at 1).
const DEFAULT_TOL: f64 = 1e-10;

const DEFAULT_MAX_SWEEPS: usize = 5_000;

/// One absorbed dimension.
#[derive(Debug, Clone)]
struct Dimension {
    /// Level of each observation.
    level: Vec<usize>,
    /// Observations of each level.
    members: Vec<Vec<usize>>,
    /// Total weight of each level.
    mass: Vec<f64>,
}

impl Dimension {
    fn new(level: Vec<usize>, weights: &[f64]) -> Self {
        let n_levels = level.iter().max().map_or(0, |m| m + 1);
        let mut members = vec![Vec::new(); n_levels];
        let mut mass = vec![0.0; n_levels];
        for (i, (&g, &w)) in level.iter().zip(weights).enumerate() {
            members[g].push(i);
            mass[g] += w;
        }
        Self { level, members, mass }
    }

    fn n_used(&self) -> usize {
        self.members.iter().filter(|m| !m.is_empty()).count()
    }

    /// Weighted mean of `v` within each level; empty levels get 0.
    fn level_means(&self, v: &[f64], weights: &[f64]) -> Vec<f64> {
        self.members
            .iter()
            .zip(&self.mass)
            .map(|(idx, &mass)| {
                if idx.is_empty() {
                    0.0
                } else {
                    idx.iter().map(|&i| weights[i] * v[i]).sum::<f64>() / mass
                }
            })
            .collect()
    }

    fn project(&self, v: &mut [f64], weights: &[f64]) {
        let means = self.level_means(v, weights);
        for (x, &g) in v.iter_mut().zip(&self.level) {
            *x -= means[g];
        }
    }
}

/// Path-halving disjoint sets over level nodes.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    fn root(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn join(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.root(a), self.root(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// Absorbs one or more fixed-effect dimensions from weighted data.
///
/// Each dimension maps an observation index to a 0-based level. For two
/// dimensions the absorbed degrees of freedom are exact (levels used minus
/// connected components of the bipartite level graph); for more they are
/// conservative (levels used minus one).
#[derive(Debug, Clone)]
pub struct FixedEffectsSolver {
    dims: Vec<Dimension>,
    weights: Vec<f64>,
    tol: f64,
    max_sweeps: usize,
}

impl FixedEffectsSolver {
    /// Unit weights.
    pub fn new(groups: Vec<Vec<usize>>) -> Result<Self> {
        let n = groups.first().map_or(0, Vec::len);
        Self::weighted(groups, vec![1.0; n])
    }

    /// Strictly positive observation weights.
    pub fn weighted(groups: Vec<Vec<usize>>, weights: Vec<f64>) -> Result<Self> {
        let Some(n) = groups.first().map(Vec::len) else {
            return Err(Error::Validation("no fixed-effect dimension to absorb".into()));
        };
        if n == 0 {
            return Err(Error::Validation("cannot absorb fixed effects from zero observations".into()));
        }
        if let Some((d, g)) = groups.iter().enumerate().find(|(_, g)| g.len() != n) {
            return Err(Error::Validation(format!("dimension {} has {} levels assigned, expected {}", d, g.len(), n)));
        }
        if weights.len() != n {
            return Err(Error::Validation(format!("{} weights for {} observations", weights.len(), n)));
        }
        if !weights.iter().all(|w| w.is_finite() && *w > 0.0) {
            return Err(Error::Validation("weights must be finite and strictly positive".into()));
        }

        let dims = groups.into_iter().map(|level| Dimension::new(level, &weights)).collect();
        Ok(Self { dims, weights, tol: DEFAULT_TOL, max_sweeps: DEFAULT_MAX_SWEEPS })
    }

    /// Convergence tolerance on weighted level means, as a fraction of the
    /// column's largest absolute entry. Columns with no entry above 1 in
    /// magnitude are held to `tol` itself.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Budget of accelerated rounds; each round costs three sweeps.
    pub fn with_max_sweeps(mut self, max_sweeps: usize) -> Self {
        self.max_sweeps = max_sweeps;
        self
    }

    fn sweep(&self, v: &mut [f64]) {
        for d in &self.dims {
            d.project(v, &self.weights);
        }
    }

    fn converged(&self, v: &[f64], tol: f64) -> bool {
        self.dims
            .iter()
            .all(|d| d.level_means(v, &self.weights).iter().all(|m| m.abs() < tol))
    }

    /// Absolute bound on level means for column `v`.
    fn tolerance_for(&self, v: &[f64]) -> f64 {
        self.tol * v.iter().fold(1.0_f64, |m, x| m.max(x.abs()))
    }

    /// `v` with every fixed effect absorbed.
    pub fn partial_out(&self, v: &[f64]) -> Result<Vec<f64>> {
        if v.len() != self.weights.len() {
            return Err(Error::Validation(format!(
                "column has {} rows, solver has {}",
                v.len(),
                self.weights.len()
            )));
        }
        let tol = self.tolerance_for(v);
        let mut x = v.to_vec();
        self.sweep(&mut x);
        // a single projection is exact
        if self.dims.len() == 1 {
            return Ok(x);
        }

        for _ in 0..self.max_sweeps {
            if self.converged(&x, tol) {
                return Ok(x);
            }
            let mut x1 = x.clone();
            self.sweep(&mut x1);
            let mut x2 = x1.clone();
            self.sweep(&mut x2);

            let (mut num, mut den) = (0.0, 0.0);
            for i in 0..x.len() {
                let step = x2[i] - x1[i];
                let curvature = step - (x1[i] - x[i]);
                num += step * curvature;
                den += curvature * curvature;
            }
            if den > f64::MIN_POSITIVE {
                let alpha = num / den;
                for (xi, (a, b)) in x.iter_mut().zip(x1.iter().zip(&x2)) {
                    *xi = b - alpha * (b - a);
                }
            } else {
                x = x2;
            }
            self.sweep(&mut x);
        }

        log::warn!("fixed-effect absorption stopped after {} sweeps without converging", self.max_sweeps);
        Ok(x)
    }

    /// Degrees of freedom absorbed by the fixed effects.
    pub fn degrees_of_freedom_absorbed(&self) -> usize {
        let used: usize = self.dims.iter().map(Dimension::n_used).sum();
        let redundant = match self.dims.as_slice() {
            [a, b] => Self::mobility_groups(a, b),
            _ => 1,
        };
        used.saturating_sub(redundant)
    }

    /// Connected components of the bipartite graph linking co-observed levels.
    fn mobility_groups(a: &Dimension, b: &Dimension) -> usize {
        let offset = a.members.len();
        let mut sets = DisjointSet::new(offset + b.members.len());
        for (&ga, &gb) in a.level.iter().zip(&b.level) {
            sets.join(ga, offset + gb);
        }
        let roots: BTreeSet<usize> = a.level.iter().map(|&g| sets.root(g)).collect();
        roots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: &[f64], b: &[f64], tol: f64) {
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!((x - y).abs() < tol, "[{}] {} vs {}", i, x, y);
        }
    }

    #[test]
    fn test_one_dimension_is_exact() {
        let solver = FixedEffectsSolver::new(vec![vec![0, 0, 0, 1, 1, 1]]).unwrap();
        let r = solver.partial_out(&[1.0, 2.0, 3.0, 10.0, 20.0, 30.0]).unwrap();
        close(&r, &[-1.0, 0.0, 1.0, -10.0, 0.0, 10.0], 1e-12);
    }

    #[test]
    fn test_weighted_level_mean() {
        // weights (1, 3) on values (0, 4): weighted mean 3
        let solver = FixedEffectsSolver::weighted(vec![vec![0, 0]], vec![1.0, 3.0]).unwrap();
        close(&solver.partial_out(&[0.0, 4.0]).unwrap(), &[-3.0, 1.0], 1e-12);
    }

    #[test]
    fn test_additive_two_way_effects_vanish() {
        let firm = vec![0, 0, 0, 1, 1, 1];
        let year = vec![0, 1, 2, 0, 1, 2];
        let solver = FixedEffectsSolver::weighted(vec![firm, year], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        // 5·firm + year + 6
        let r = solver.partial_out(&[6.0, 7.0, 8.0, 11.0, 12.0, 13.0]).unwrap();
        close(&r, &[0.0; 6], 1e-8);
    }

    #[test]
    fn test_unbalanced_weighted_means_are_zero() {
        let firm = vec![0, 0, 0, 1, 1];
        let year = vec![0, 1, 2, 1, 2];
        let w = vec![2.0, 1.0, 1.0, 3.0, 1.0];
        let solver = FixedEffectsSolver::weighted(vec![firm, year], w.clone()).unwrap();
        let r = solver.partial_out(&[10.0, 20.0, 30.0, 25.0, 35.0]).unwrap();
        let wsum = |idx: &[usize]| idx.iter().map(|&i| w[i] * r[i]).sum::<f64>();
        assert!(wsum(&[0, 1, 2]).abs() < 1e-8);
        assert!(wsum(&[3, 4]).abs() < 1e-8);
        assert!(wsum(&[1, 3]).abs() < 1e-8);
        assert!(wsum(&[2, 4]).abs() < 1e-8);
        // year 0 has a single observation
        assert!(r[0].abs() < 1e-8);
    }

    #[test]
    fn test_three_dimensions_converge() {
        let a: Vec<usize> = (0..24).map(|i| i % 4).collect();
        let b: Vec<usize> = (0..24).map(|i| i / 4).collect();
        let c: Vec<usize> = (0..24).map(|i| (i * 7) % 3).collect();
        let v: Vec<f64> = (0..24).map(|i| 2.0 * a[i] as f64 - b[i] as f64 + 0.5 * c[i] as f64).collect();
        let solver = FixedEffectsSolver::new(vec![a, b, c]).unwrap().with_max_sweeps(500);
        close(&solver.partial_out(&v).unwrap(), &[0.0; 24], 1e-8);
        assert_eq!(solver.degrees_of_freedom_absorbed(), 4 + 6 + 3 - 1);
    }

    #[test]
    fn test_large_scale_columns_converge() {
        // 30 × 12 unbalanced panel, uneven weights, values near 3e7
        let (mut firm, mut year, mut w) = (Vec::new(), Vec::new(), Vec::new());
        for e in 0..30usize {
            for t in 0..12usize {
                if (5 * e + t) % 7 != 0 {
                    firm.push(e);
                    year.push(t);
                    w.push(1.0 + ((e + t) % 4) as f64);
                }
            }
        }
        let n = firm.len();
        let additive: Vec<f64> = (0..n).map(|i| 3e7 + 1e5 * firm[i] as f64 + 2e5 * year[i] as f64).collect();
        let noisy: Vec<f64> = (0..n).map(|i| additive[i] + 1e3 * ((i * 7919) % 1000) as f64).collect();
        let solver = FixedEffectsSolver::weighted(vec![firm, year], w).unwrap().with_max_sweeps(25);

        let r = solver.partial_out(&noisy).unwrap();
        let tol = solver.tolerance_for(&noisy);
        assert!(tol > 1e-3 && tol < 1e-2);
        assert!(solver.converged(&r, tol));

        let r = solver.partial_out(&additive).unwrap();
        assert!(r.iter().all(|x| x.abs() < 0.1), "{:?}", r.iter().fold(0.0_f64, |m, x| m.max(x.abs())));
    }

    #[test]
    fn test_small_columns_keep_the_absolute_floor() {
        let solver = FixedEffectsSolver::new(vec![vec![0, 1]]).unwrap().with_tol(1e-6);
        assert_eq!(solver.tolerance_for(&[0.25, -0.5]), 1e-6);
        assert_eq!(solver.tolerance_for(&[0.0, -4.0]), 4e-6);
    }

    #[test]
    fn test_absorbed_degrees_of_freedom() {
        let one = FixedEffectsSolver::new(vec![vec![0, 0, 1, 1, 2, 2]]).unwrap();
        assert_eq!(one.degrees_of_freedom_absorbed(), 2);

        let firm: Vec<usize> = (0..12).map(|i| i / 4).collect();
        let year: Vec<usize> = (0..12).map(|i| i % 4).collect();
        let connected = FixedEffectsSolver::new(vec![firm, year]).unwrap();
        assert_eq!(connected.degrees_of_freedom_absorbed(), 3 + 4 - 1);

        // two firms never share a year: two mobility groups
        let split = FixedEffectsSolver::new(vec![vec![0, 0, 1, 1], vec![0, 1, 2, 3]]).unwrap();
        assert_eq!(split.degrees_of_freedom_absorbed(), 4);

        // unused level 1 is not counted
        let gap = FixedEffectsSolver::new(vec![vec![0, 0, 2, 2]]).unwrap();
        assert_eq!(gap.degrees_of_freedom_absorbed(), 1);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(FixedEffectsSolver::new(vec![]).is_err());
        assert!(FixedEffectsSolver::new(vec![vec![]]).is_err());
        assert!(FixedEffectsSolver::new(vec![vec![0, 1], vec![0]]).is_err());
        assert!(FixedEffectsSolver::weighted(vec![vec![0, 1]], vec![1.0, 0.0]).is_err());
        let solver = FixedEffectsSolver::new(vec![vec![0, 0, 1, 1]]).unwrap();
        assert!(solver.partial_out(&[1.0, 2.0]).is_err());
    }
}
