//! Per-cluster up/down gene selection.
//!
//! Statistical clusters keep genes with adjusted p at or below the cutoff,
//! split by fold-change sign and ranked by adjusted p. Coefficient clusters
//! take the `n_genes` largest and `n_genes` smallest scores with no cutoff; a
//! row landing in both (fewer than twice `n_genes` scored rows) stays on the
//! side its sign points to, zero counting as up. In both cases the ranked list
//! is cut to `n_genes` first and unresolved symbols are dropped afterwards, so
//! a set can come out shorter than `n_genes`.

use std::collections::HashSet;
use std::fmt;

use tracing::{info, warn};

use crate::diffexp::ClusterStatistics;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub const ALL: [Direction; 2] = [Direction::Up, Direction::Down];

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SelectionParams {
    pub n_genes: usize,
    pub significance: f64,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self { n_genes: 250, significance: 0.05 }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClusterGeneSet {
    pub cluster: String,
    pub up: Vec<String>,
    pub down: Vec<String>,
}

impl ClusterGeneSet {
    pub fn genes(&self, direction: Direction) -> &[String] {
        match direction {
            Direction::Up => &self.up,
            Direction::Down => &self.down,
        }
    }
}

/// Picks the up and down gene lists for one cluster. `symbols` is the
/// resolved `Symbol` column aligned with the statistics rows.
pub fn select(
    cluster: &str,
    stats: &ClusterStatistics,
    symbols: &[Option<String>],
    params: &SelectionParams,
) -> ClusterGeneSet {
    let (up_rank, down_rank) = match stats {
        ClusterStatistics::Statistical { fold_change, adjusted_p } => (
            rank_significant(fold_change, adjusted_p, params.significance, |fc| fc > 0.0),
            rank_significant(fold_change, adjusted_p, params.significance, |fc| fc < 0.0),
        ),
        ClusterStatistics::Coefficient { score } => rank_coefficients(score, params.n_genes),
    };

    let mut up = top_symbols(&up_rank, symbols, params.n_genes);
    let mut down = top_symbols(&down_rank, symbols, params.n_genes);

    let conflicting: HashSet<String> = up
        .iter()
        .filter(|g| down.contains(g))
        .cloned()
        .collect();
    if !conflicting.is_empty() {
        warn!(
            "cluster {}: {} symbols ranked both up and down, dropping {:?}",
            cluster,
            conflicting.len(),
            conflicting
        );
        up.retain(|g| !conflicting.contains(g));
        down.retain(|g| !conflicting.contains(g));
    }

    for (direction, genes) in [(Direction::Up, &up), (Direction::Down, &down)] {
        if genes.is_empty() {
            info!("cluster {} {}: empty", cluster, direction);
        } else {
            info!("cluster {} {}: {} genes ({})", cluster, direction, genes.len(), stats.method());
        }
    }

    ClusterGeneSet { cluster: cluster.to_string(), up, down }
}

/// Row indices passing the cutoff with the wanted sign, most significant first.
fn rank_significant(
    fold_change: &[Option<f64>],
    adjusted_p: &[Option<f64>],
    significance: f64,
    sign: impl Fn(f64) -> bool,
) -> Vec<usize> {
    let mut candidates: Vec<(usize, f64)> = fold_change
        .iter()
        .zip(adjusted_p)
        .enumerate()
        .filter_map(|(i, pair)| match pair {
            (Some(fc), Some(p)) if *p <= significance && sign(*fc) => Some((i, *p)),
            _ => None,
        })
        .collect();
    // stable: equal p values keep row order
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));
    candidates.into_iter().map(|(i, _)| i).collect()
}

/// (the `n_genes` largest scores descending, the `n_genes` smallest ascending)
fn rank_coefficients(score: &[Option<f64>], n_genes: usize) -> (Vec<usize>, Vec<usize>) {
    let mut scored: Vec<(usize, f64)> = score
        .iter()
        .enumerate()
        .filter_map(|(i, s)| s.filter(|v| !v.is_nan()).map(|v| (i, v)))
        .collect();

    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    let up: Vec<(usize, f64)> = scored.iter().copied().take(n_genes).collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));
    let down: Vec<(usize, f64)> = scored.into_iter().take(n_genes).collect();

    let in_down: HashSet<usize> = down.iter().map(|(i, _)| *i).collect();
    let in_up: HashSet<usize> = up.iter().map(|(i, _)| *i).collect();
    (
        up.into_iter()
            .filter(|(i, s)| *s >= 0.0 || !in_down.contains(i))
            .map(|(i, _)| i)
            .collect(),
        down.into_iter()
            .filter(|(i, s)| *s < 0.0 || !in_up.contains(i))
            .map(|(i, _)| i)
            .collect(),
    )
}

fn top_symbols(ranked: &[usize], symbols: &[Option<String>], n_genes: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    ranked
        .iter()
        .take(n_genes)
        .filter_map(|&i| symbols.get(i).and_then(|s| s.as_deref()))
        .filter(|s| seen.insert(*s))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<Option<String>> {
        (0..n).map(|i| Some(format!("G{}", i))).collect()
    }

    fn params(n_genes: usize) -> SelectionParams {
        SelectionParams { n_genes, significance: 0.05 }
    }

    #[test]
    fn statistical_filters_by_p_and_sign() {
        let stats = ClusterStatistics::Statistical {
            fold_change: vec![Some(2.0), Some(-1.0), Some(0.5), Some(3.0), Some(-4.0), Some(1.0)],
            adjusted_p: vec![Some(0.04), Some(0.001), Some(0.2), Some(0.01), Some(0.05), None],
        };
        let set = select("1", &stats, &names(6), &params(250));
        assert_eq!(set.up, vec!["G3", "G0"]);
        assert_eq!(set.down, vec!["G1", "G4"]);
    }

    #[test]
    fn statistical_ties_keep_row_order() {
        let stats = ClusterStatistics::Statistical {
            fold_change: vec![Some(1.0), Some(1.0), Some(1.0)],
            adjusted_p: vec![Some(0.02), Some(0.01), Some(0.02)],
        };
        let set = select("1", &stats, &names(3), &params(250));
        assert_eq!(set.up, vec!["G1", "G0", "G2"]);
        assert!(set.down.is_empty());
    }

    #[test]
    fn truncation_happens_before_null_symbols_drop() {
        let stats = ClusterStatistics::Statistical {
            fold_change: vec![Some(1.0); 4],
            adjusted_p: vec![Some(0.001), Some(0.002), Some(0.003), Some(0.004)],
        };
        let symbols = vec![Some("A".to_string()), None, Some("C".to_string()), Some("D".to_string())];
        let set = select("1", &stats, &symbols, &params(3));
        assert_eq!(set.up, vec!["A", "C"]);
    }

    #[test]
    fn coefficient_takes_extremes_in_order() {
        let score = vec![0.5, -0.3, 0.9, -1.2, 0.5, 0.1, -0.3, -0.05];
        let stats = ClusterStatistics::Coefficient { score: score.into_iter().map(Some).collect() };
        let set = select("0", &stats, &names(8), &params(3));
        assert_eq!(set.up, vec!["G2", "G0", "G4"]);
        assert_eq!(set.down, vec!["G3", "G1", "G6"]);
    }

    #[test]
    fn coefficient_applies_no_threshold() {
        let stats = ClusterStatistics::Coefficient { score: vec![Some(1e-9), Some(-1e-9), None] };
        let set = select("0", &stats, &names(3), &params(250));
        assert_eq!(set.up, vec!["G0"]);
        assert_eq!(set.down, vec!["G1"]);
    }

    #[test]
    fn coefficient_same_sign_scores_fill_both_directions() {
        let stats = ClusterStatistics::Coefficient { score: (1..=10).map(|v| Some(v as f64)).collect() };
        let set = select("0", &stats, &names(10), &params(3));
        assert_eq!(set.up, vec!["G9", "G8", "G7"]);
        assert_eq!(set.down, vec!["G0", "G1", "G2"]);
    }

    #[test]
    fn coefficient_overlap_stays_on_its_sign_side() {
        let stats = ClusterStatistics::Coefficient {
            score: vec![Some(-0.5), Some(0.2), Some(0.4), Some(0.9)],
        };
        // rows 1 and 2 rank in both top-3 lists; positive, so they stay up
        let set = select("0", &stats, &names(4), &params(3));
        assert_eq!(set.up, vec!["G3", "G2", "G1"]);
        assert_eq!(set.down, vec!["G0"]);
    }

    #[test]
    fn never_emits_unresolved_or_duplicate_symbols() {
        let stats = ClusterStatistics::Coefficient {
            score: vec![Some(5.0), Some(4.0), Some(3.0), Some(2.0)],
        };
        let symbols = vec![Some("A".to_string()), None, Some("A".to_string()), Some("B".to_string())];
        let set = select("0", &stats, &symbols, &params(250));
        assert_eq!(set.up, vec!["A", "B"]);
    }

    #[test]
    fn up_and_down_are_disjoint_even_on_symbol_collisions() {
        let stats = ClusterStatistics::Statistical {
            fold_change: vec![Some(2.0), Some(-2.0), Some(1.0), Some(-1.0)],
            adjusted_p: vec![Some(0.01); 4],
        };
        // rows 0 and 1 resolve to the same canonical symbol
        let symbols = vec![
            Some("SHARED".to_string()),
            Some("SHARED".to_string()),
            Some("UPONLY".to_string()),
            Some("DOWNONLY".to_string()),
        ];
        let set = select("3", &stats, &symbols, &params(250));
        assert_eq!(set.up, vec!["UPONLY"]);
        assert_eq!(set.down, vec!["DOWNONLY"]);
    }

    #[test]
    fn disjoint_for_many_random_like_inputs() {
        // deterministic pseudo-random walk over both methods
        let mut x: u64 = 0x2545_F491_4F6C_DD1D;
        for round in 0..50 {
            let n = 40;
            let mut fc = Vec::with_capacity(n);
            let mut p = Vec::with_capacity(n);
            for _ in 0..n {
                x ^= x << 13;
                x ^= x >> 7;
                x ^= x << 17;
                fc.push(Some((x % 2001) as f64 / 100.0 - 10.0));
                p.push(Some((x % 1000) as f64 / 10_000.0));
            }
            let stats = if round % 2 == 0 {
                ClusterStatistics::Statistical { fold_change: fc, adjusted_p: p }
            } else {
                ClusterStatistics::Coefficient { score: fc }
            };
            let set = select("r", &stats, &names(n), &params(25));
            assert!(set.up.iter().all(|g| !set.down.contains(g)));
            assert!(set.up.len() <= 25 && set.down.len() <= 25);
        }
    }

    #[test]
    fn direction_labels() {
        assert_eq!(Direction::Up.to_string(), "up");
        assert_eq!(Direction::ALL, [Direction::Up, Direction::Down]);
    }
}
