//! Monthly cross-asset correlation builder.
//!
//! A month's daily returns are pivoted into a sparse `asset → day → return`
//! panel. Pairs are correlated on pairwise-complete observations: only the
//! days where both assets have a valid return count, independent of how
//! sparse any other asset is.

use super::AssetOrder;
use crate::error::{PairExclusion, RowRejection};
use crate::models::{AssetId, CorrelationEdge, DailyReturn, MonthKey};
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

// ── Grouping ──────────────────────────────────────────────────────────────────

/// Split daily rows into calendar months, preserving row order within a month.
pub fn group_by_month(rows: Vec<DailyReturn>) -> BTreeMap<MonthKey, Vec<DailyReturn>> {
    let mut months: BTreeMap<MonthKey, Vec<DailyReturn>> = BTreeMap::new();
    for row in rows {
        months.entry(MonthKey::from_date(row.day)).or_default().push(row);
    }
    months
}

// ── Panel ─────────────────────────────────────────────────────────────────────

/// Sparse per-month return panel.
#[derive(Debug, Clone, Default)]
pub struct MonthPanel {
    /// Every asset with at least one well-formed row in the month, even if
    /// its log return is null.
    assets: BTreeSet<AssetId>,
    /// Valid returns only. Missing days are absent, never zero.
    series: BTreeMap<AssetId, BTreeMap<NaiveDate, f64>>,
}

impl MonthPanel {
    /// Build the panel, dropping malformed rows. Rows outside `month` are ignored.
    pub fn build(month: MonthKey, rows: &[DailyReturn]) -> (Self, Vec<RowRejection>) {
        let mut panel = MonthPanel::default();
        let mut rejected = Vec::new();
        let mut seen: BTreeSet<(&str, NaiveDate)> = BTreeSet::new();

        for row in rows.iter().filter(|r| month.contains(r.day)) {
            // A malformed row never claims its (asset, day) slot.
            if row.log_return.is_some_and(|r| !r.is_finite()) {
                rejected.push(RowRejection::NonFinite {
                    asset: row.asset.clone(),
                    day: row.day,
                });
                continue;
            }
            if !seen.insert((row.asset.as_str(), row.day)) {
                rejected.push(RowRejection::DuplicateObservation {
                    asset: row.asset.clone(),
                    day: row.day,
                });
                continue;
            }

            if let Some(r) = row.log_return {
                panel
                    .series
                    .entry(row.asset.clone())
                    .or_default()
                    .insert(row.day, r);
            }
            panel.assets.insert(row.asset.clone());
        }

        (panel, rejected)
    }

    pub fn assets(&self) -> &BTreeSet<AssetId> {
        &self.assets
    }

    /// Returns of `a` and `b` on the days both have a value, in day order.
    pub fn aligned(&self, a: &str, b: &str) -> (Vec<f64>, Vec<f64>) {
        let (Some(sa), Some(sb)) = (self.series.get(a), self.series.get(b)) else {
            return (Vec::new(), Vec::new());
        };
        sa.iter()
            .filter_map(|(day, x)| sb.get(day).map(|y| (*x, *y)))
            .unzip()
    }
}

// ── Pearson ───────────────────────────────────────────────────────────────────

/// Pearson correlation of two equally long samples.
///
/// None when fewer than two points, or when either side is constant.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    if is_constant(xs) || is_constant(ys) {
        return None;
    }

    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }

    let denom = (sxx * syy).sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return None;
    }
    Some((sxy / denom).clamp(-1.0, 1.0))
}

fn is_constant(xs: &[f64]) -> bool {
    xs.windows(2).all(|w| w[0] == w[1])
}

/// Correlate one pair over its shared days.
pub fn correlate_pair(
    panel: &MonthPanel,
    a: &str,
    b: &str,
    min_overlap: usize,
) -> Result<f64, PairExclusion> {
    let required = min_overlap.max(2);
    let (xs, ys) = panel.aligned(a, b);
    if xs.len() < required {
        return Err(PairExclusion::InsufficientData {
            overlap: xs.len(),
            required,
        });
    }
    pearson(&xs, &ys).ok_or(PairExclusion::DegenerateVariance)
}

// ── Month builder ─────────────────────────────────────────────────────────────

/// Everything needed to build one month, owned so it can move to a worker.
#[derive(Debug, Clone)]
pub struct MonthContext {
    pub month: MonthKey,
    pub rows: Vec<DailyReturn>,
    pub min_overlap: usize,
    pub asset_order: AssetOrder,
}

#[derive(Debug, Clone, Default)]
pub struct CorrelationOutcome {
    pub edges: Vec<CorrelationEdge>,
    /// Active assets in the configured order.
    pub assets: Vec<AssetId>,
    pub insufficient_pairs: usize,
    pub degenerate_pairs: usize,
    pub rejected: Vec<RowRejection>,
}

/// All qualifying pairwise correlations for one month.
///
/// Pairs are emitted once, `asset_i` before `asset_j` in `asset_order`, and
/// the output order is deterministic for a given input.
pub fn monthly_correlations(ctx: &MonthContext) -> CorrelationOutcome {
    let (panel, rejected) = MonthPanel::build(ctx.month, &ctx.rows);

    let mut assets: Vec<AssetId> = panel.assets().iter().cloned().collect();
    ctx.asset_order.sort(&mut assets);

    let mut outcome = CorrelationOutcome {
        rejected,
        ..Default::default()
    };

    for (i, a) in assets.iter().enumerate() {
        for b in &assets[i + 1..] {
            match correlate_pair(&panel, a, b, ctx.min_overlap) {
                Ok(corr) => outcome.edges.push(CorrelationEdge {
                    month: ctx.month,
                    asset_i: a.clone(),
                    asset_j: b.clone(),
                    corr,
                }),
                Err(PairExclusion::InsufficientData { .. }) => outcome.insufficient_pairs += 1,
                Err(PairExclusion::DegenerateVariance) => outcome.degenerate_pairs += 1,
            }
        }
    }

    outcome.assets = assets;
    outcome
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn jan(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    pub(crate) fn row(asset: &str, day: NaiveDate, r: Option<f64>) -> DailyReturn {
        DailyReturn {
            asset: asset.to_string(),
            day,
            close: 1.0,
            log_return: r,
        }
    }

    /// A and B move together, C is orthogonal to both, over Jan 1..=28.
    pub(crate) fn three_asset_january() -> Vec<DailyReturn> {
        let mut rows = Vec::new();
        for t in 0..28u32 {
            let a = if t % 2 == 0 { 0.01 } else { -0.01 };
            let c = if (t / 2) % 2 == 0 { 0.02 } else { -0.02 };
            rows.push(row("A", jan(t + 1), Some(a)));
            rows.push(row("B", jan(t + 1), Some(3.0 * a)));
            rows.push(row("C", jan(t + 1), Some(c)));
        }
        rows
    }

    fn ctx(rows: Vec<DailyReturn>, min_overlap: usize) -> MonthContext {
        MonthContext {
            month: MonthKey::from_date(jan(1)),
            rows,
            min_overlap,
            asset_order: AssetOrder::Lexical,
        }
    }

    /// Deterministic pseudo-random returns with gaps.
    fn noisy_rows(assets: usize, seed: u64) -> Vec<DailyReturn> {
        let mut state = seed;
        let mut next = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            ((state >> 32) as f64) / (u32::MAX as f64) - 0.25
        };
        let mut rows = Vec::new();
        for k in 0..assets {
            for day in 1..=31 {
                let x = next();
                if x > 0.6 {
                    continue; // gap
                }
                rows.push(row(&format!("asset{k:02}"), jan(day), Some(x * 0.1)));
            }
        }
        rows
    }

    #[test]
    fn test_pearson_basic() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert!((pearson(&xs, &[2.0, 4.0, 6.0, 8.0]).unwrap() - 1.0).abs() < 1e-12);
        assert!((pearson(&xs, &[8.0, 6.0, 4.0, 2.0]).unwrap() + 1.0).abs() < 1e-12);
        assert_eq!(pearson(&xs, &[1.0, 1.0, 1.0, 1.0]), None);
        assert_eq!(pearson(&[1.0], &[2.0]), None);
        assert_eq!(pearson(&xs, &[1.0, 2.0]), None);
    }

    #[test]
    fn test_three_asset_scenario_correlations() {
        let out = monthly_correlations(&ctx(three_asset_january(), 10));
        assert_eq!(out.edges.len(), 3);
        let get = |i: &str, j: &str| {
            out.edges
                .iter()
                .find(|e| e.asset_i == i && e.asset_j == j)
                .map(|e| e.corr)
                .unwrap()
        };
        assert!((get("A", "B") - 1.0).abs() < 1e-9);
        assert!(get("A", "C").abs() < 1e-9);
        assert!(get("B", "C").abs() < 1e-9);
    }

    #[test]
    fn test_pairwise_complete_not_listwise() {
        // D only overlaps A on the first 12 days; A–B still uses all 28.
        let mut rows = three_asset_january();
        for t in 0..12u32 {
            rows.push(row("D", jan(t + 1), Some(if t % 3 == 0 { 0.05 } else { -0.01 })));
        }
        let (panel, _) = MonthPanel::build(MonthKey::from_date(jan(1)), &rows);
        assert_eq!(panel.aligned("A", "B").0.len(), 28);
        assert_eq!(panel.aligned("A", "D").0.len(), 12);

        let out = monthly_correlations(&ctx(rows, 20));
        assert!(out.edges.iter().all(|e| e.asset_j != "D"));
        assert_eq!(out.insufficient_pairs, 3);
    }

    #[test]
    fn test_single_day_asset_is_active_but_unpaired() {
        let mut rows = three_asset_january();
        rows.push(row("E", jan(15), None));
        let out = monthly_correlations(&ctx(rows, 2));
        assert_eq!(out.assets, ["A", "B", "C", "E"]);
        assert!(out.edges.iter().all(|e| e.asset_i != "E" && e.asset_j != "E"));
        assert_eq!(out.insufficient_pairs, 3);
    }

    #[test]
    fn test_constant_series_is_degenerate() {
        let mut rows = three_asset_january();
        for t in 0..28u32 {
            rows.push(row("Z", jan(t + 1), Some(0.1)));
        }
        let out = monthly_correlations(&ctx(rows, 2));
        assert_eq!(out.degenerate_pairs, 3);
        assert_eq!(out.edges.len(), 3);
    }

    #[test]
    fn test_malformed_rows_dropped() {
        let mut rows = three_asset_january();
        rows.push(row("A", jan(29), Some(f64::NAN)));
        rows.push(row("B", jan(29), Some(f64::INFINITY)));
        rows.push(row("C", jan(1), Some(9.0)));
        let out = monthly_correlations(&ctx(rows, 2));
        assert_eq!(out.rejected.len(), 3);
        assert!(matches!(out.rejected[2], RowRejection::DuplicateObservation { .. }));
        // The duplicate did not replace C's first observation.
        let ab = out.edges.iter().find(|e| e.asset_i == "A" && e.asset_j == "B").unwrap();
        assert!((ab.corr - 1.0).abs() < 1e-9);
        let ac = out.edges.iter().find(|e| e.asset_i == "A" && e.asset_j == "C").unwrap();
        assert!(ac.corr.abs() < 1e-9);
    }

    #[test]
    fn test_nan_row_does_not_shadow_valid_observation() {
        let mut rows = vec![row("A", jan(5), Some(f64::NAN))];
        rows.extend(three_asset_january());
        let month = MonthKey::from_date(jan(1));

        let (panel, rejected) = MonthPanel::build(month, &rows);
        assert_eq!(
            rejected,
            vec![RowRejection::NonFinite { asset: "A".into(), day: jan(5) }]
        );
        let (xs, ys) = panel.aligned("A", "B");
        assert_eq!(xs.len(), 28);
        assert_eq!(ys.len(), 28);
    }

    #[test]
    fn test_fewer_than_two_assets_yields_nothing() {
        let rows: Vec<_> = three_asset_january().into_iter().filter(|r| r.asset == "A").collect();
        let out = monthly_correlations(&ctx(rows, 2));
        assert!(out.edges.is_empty());
        assert_eq!(out.assets.len(), 1);
    }

    #[test]
    fn test_pairs_unique_ordered_and_in_range() {
        let out = monthly_correlations(&ctx(noisy_rows(12, 7), 5));
        assert!(!out.edges.is_empty());
        let mut seen = BTreeSet::new();
        for e in &out.edges {
            assert!(e.asset_i < e.asset_j);
            assert!(seen.insert((e.asset_i.clone(), e.asset_j.clone())));
            assert!(!seen.contains(&(e.asset_j.clone(), e.asset_i.clone())));
            assert!((-1.0..=1.0).contains(&e.corr));
        }
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let first = monthly_correlations(&ctx(noisy_rows(8, 42), 5));
        let mut shuffled = noisy_rows(8, 42);
        shuffled.reverse();
        let second = monthly_correlations(&ctx(shuffled, 5));
        assert_eq!(first.edges.len(), second.edges.len());
        for (a, b) in first.edges.iter().zip(&second.edges) {
            assert_eq!(a.asset_i, b.asset_i);
            assert_eq!(a.asset_j, b.asset_j);
            assert_eq!(a.corr.to_bits(), b.corr.to_bits());
        }
    }

    #[test]
    fn test_case_insensitive_pair_order() {
        let rows: Vec<_> = three_asset_january()
            .into_iter()
            .map(|mut r| {
                if r.asset == "A" {
                    r.asset = "b_lower".into();
                }
                if r.asset == "B" {
                    r.asset = "A_upper".into();
                }
                r
            })
            .collect();
        let mut c = ctx(rows, 2);
        c.asset_order = AssetOrder::CaseInsensitive;
        let out = monthly_correlations(&c);
        assert_eq!(out.assets, ["A_upper", "b_lower", "C"]);
        assert!(out.edges.iter().any(|e| e.asset_i == "b_lower" && e.asset_j == "C"));
    }

    #[test]
    fn test_group_by_month() {
        let rows = vec![
            row("A", jan(31), Some(0.1)),
            row("A", NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(), Some(0.2)),
            row("B", jan(2), None),
        ];
        let months = group_by_month(rows);
        assert_eq!(months.len(), 2);
        assert_eq!(months.values().next().unwrap().len(), 2);
    }
}
