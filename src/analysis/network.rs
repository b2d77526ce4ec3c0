//! Thresholded correlation graph and its structural summary.

use crate::models::{AssetId, CorrelationEdge, MonthKey, NetworkMetrics};
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use std::collections::{BTreeMap, HashMap};

/// Undirected simple graph over a month's active assets.
///
/// Isolated assets are kept as nodes so the ratios below are taken over the
/// full asset universe, not just the connected part. Edge weights hold the
/// correlation that produced the link.
#[derive(Debug, Clone, Default)]
pub struct AssetGraph {
    graph: UnGraph<AssetId, f64>,
    /// Ordered symbol lookup; iteration order is the asset order.
    nodes: BTreeMap<AssetId, NodeIndex>,
}

impl AssetGraph {
    pub fn with_nodes<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<AssetId>,
    {
        let mut graph = Self::default();
        for n in nodes {
            graph.add_node(&n.into());
        }
        graph
    }

    /// Nodes = `nodes` plus any edge endpoint; edges = pairs with |corr| ≥ threshold.
    pub fn from_correlations<'a, I>(nodes: I, edges: &[CorrelationEdge], threshold: f64) -> Self
    where
        I: IntoIterator<Item = &'a AssetId>,
    {
        let mut graph = Self::with_nodes(nodes.into_iter().cloned());
        for e in edges {
            if e.corr.is_finite() && e.corr.abs() >= threshold {
                graph.add_edge(&e.asset_i, &e.asset_j, e.corr);
            }
        }
        graph
    }

    pub fn add_node(&mut self, asset: &str) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(asset) {
            return idx;
        }
        let idx = self.graph.add_node(asset.to_string());
        self.nodes.insert(asset.to_string(), idx);
        idx
    }

    /// Self-loops are ignored; a repeated edge keeps the latest weight.
    pub fn add_edge(&mut self, a: &str, b: &str, weight: f64) {
        if a == b {
            return;
        }
        let ia = self.add_node(a);
        let ib = self.add_node(b);
        self.graph.update_edge(ia, ib, weight);
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn degree(&self, asset: &str) -> usize {
        self.nodes
            .get(asset)
            .map_or(0, |&idx| self.graph.neighbors(idx).count())
    }

    pub fn edge_weight(&self, a: &str, b: &str) -> Option<f64> {
        let (ia, ib) = (self.nodes.get(a)?, self.nodes.get(b)?);
        self.graph
            .find_edge(*ia, *ib)
            .and_then(|e| self.graph.edge_weight(e).copied())
    }

    pub fn has_edge(&self, a: &str, b: &str) -> bool {
        self.edge_weight(a, b).is_some()
    }

    /// Fraction of neighbour pairs that are linked; 0 below degree 2.
    pub fn local_clustering(&self, asset: &str) -> f64 {
        let Some(&idx) = self.nodes.get(asset) else {
            return 0.0;
        };
        let neighbours: Vec<NodeIndex> = self.graph.neighbors(idx).collect();
        let k = neighbours.len();
        if k < 2 {
            return 0.0;
        }
        let mut links = 0usize;
        for (i, &u) in neighbours.iter().enumerate() {
            for &v in &neighbours[i + 1..] {
                if self.graph.find_edge(u, v).is_some() {
                    links += 1;
                }
            }
        }
        links as f64 / (k * (k - 1) / 2) as f64
    }

    /// Node count of the largest connected component (0 for an empty graph).
    pub fn largest_component(&self) -> usize {
        let mut components = UnionFind::<usize>::new(self.graph.node_count());
        for e in self.graph.edge_references() {
            components.union(e.source().index(), e.target().index());
        }

        let mut sizes: HashMap<usize, usize> = HashMap::new();
        for root in components.into_labeling() {
            *sizes.entry(root).or_default() += 1;
        }
        sizes.into_values().max().unwrap_or(0)
    }

    fn assets(&self) -> impl Iterator<Item = &AssetId> {
        self.nodes.keys()
    }
}

/// Structural summary of one month's graph. Every ratio is guarded: an
/// undefined denominator yields 0.
pub fn network_metrics(month: MonthKey, graph: &AssetGraph) -> NetworkMetrics {
    let n = graph.node_count();
    if n == 0 {
        return NetworkMetrics::empty(month);
    }

    let n_edges = graph.edge_count();
    let possible = n * (n - 1) / 2;
    let density = if possible > 0 {
        n_edges as f64 / possible as f64
    } else {
        0.0
    };

    let max_degree = graph
        .assets()
        .map(|node| graph.degree(node))
        .max()
        .unwrap_or(0);

    let avg_clustering = graph
        .assets()
        .map(|node| graph.local_clustering(node))
        .sum::<f64>()
        / n as f64;

    NetworkMetrics {
        month,
        n_assets: n,
        n_edges,
        density,
        avg_degree: 2.0 * n_edges as f64 / n as f64,
        max_degree,
        avg_clustering,
        lcc_size: graph.largest_component(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::correlation::tests::{jan, three_asset_january};
    use crate::analysis::{AssetOrder, MonthContext, monthly_correlations};

    fn month() -> MonthKey {
        MonthKey::from_date(jan(1))
    }

    fn edge(i: &str, j: &str, corr: f64) -> CorrelationEdge {
        CorrelationEdge {
            month: month(),
            asset_i: i.into(),
            asset_j: j.into(),
            corr,
        }
    }

    fn nodes(names: &[&str]) -> Vec<AssetId> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_three_asset_scenario_metrics() {
        let out = monthly_correlations(&MonthContext {
            month: month(),
            rows: three_asset_january(),
            min_overlap: 10,
            asset_order: AssetOrder::Lexical,
        });
        let graph = AssetGraph::from_correlations(&out.assets, &out.edges, 0.5);
        let m = network_metrics(month(), &graph);

        assert_eq!(m.n_assets, 3);
        assert_eq!(m.n_edges, 1);
        assert!((m.density - 1.0 / 3.0).abs() < 1e-12);
        assert!((m.avg_degree - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(m.max_degree, 1);
        assert_eq!(m.avg_clustering, 0.0);
        assert_eq!(m.lcc_size, 2);
        assert!(graph.has_edge("A", "B"));
    }

    #[test]
    fn test_threshold_uses_absolute_value() {
        let edges = [edge("A", "B", -0.8), edge("A", "C", 0.49), edge("B", "C", 0.5)];
        let graph = AssetGraph::from_correlations(&nodes(&["A", "B", "C"]), &edges, 0.5);
        assert!(graph.has_edge("A", "B"));
        assert!(!graph.has_edge("A", "C"));
        assert!(graph.has_edge("C", "B"));
    }

    #[test]
    fn test_triangle_plus_isolated() {
        let edges = [edge("A", "B", 0.9), edge("A", "C", 0.9), edge("B", "C", 0.9)];
        let graph = AssetGraph::from_correlations(&nodes(&["A", "B", "C", "D"]), &edges, 0.5);
        let m = network_metrics(month(), &graph);
        assert_eq!(m.n_assets, 4);
        assert_eq!(m.n_edges, 3);
        assert!((m.density - 0.5).abs() < 1e-12);
        assert_eq!(m.max_degree, 2);
        assert!((m.avg_clustering - 0.75).abs() < 1e-12);
        assert_eq!(m.lcc_size, 3);
    }

    #[test]
    fn test_partial_clustering() {
        // Star on A plus one B–C link: A sees 1 of 3 neighbour pairs linked.
        let mut g = AssetGraph::with_nodes(["A", "B", "C", "D"]);
        g.add_edge("A", "B", 0.9);
        g.add_edge("A", "C", 0.9);
        g.add_edge("A", "D", 0.9);
        g.add_edge("B", "C", 0.9);
        assert!((g.local_clustering("A") - 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(g.local_clustering("B"), 1.0);
        assert_eq!(g.local_clustering("D"), 0.0);
    }

    #[test]
    fn test_largest_of_several_components() {
        let mut g = AssetGraph::with_nodes(["A", "B", "C", "D", "E", "F"]);
        g.add_edge("A", "B", 0.8);
        g.add_edge("C", "D", 0.8);
        g.add_edge("D", "E", 0.8);
        assert_eq!(g.largest_component(), 3);

        // Bridging the two groups merges them.
        g.add_edge("B", "E", 0.8);
        assert_eq!(g.largest_component(), 5);
        assert_eq!(network_metrics(month(), &g).lcc_size, 5);
    }

    #[test]
    fn test_self_loops_and_duplicates_ignored() {
        let mut g = AssetGraph::with_nodes(["A", "B"]);
        g.add_edge("A", "A", 1.0);
        g.add_edge("A", "B", 0.6);
        g.add_edge("B", "A", -0.7);
        assert_eq!(g.edge_count(), 1);
        assert_eq!(g.degree("A"), 1);
        assert_eq!(g.edge_weight("A", "B"), Some(-0.7));
    }

    #[test]
    fn test_isolated_and_empty_months() {
        let g = AssetGraph::with_nodes(["A", "B", "C"]);
        let m = network_metrics(month(), &g);
        assert_eq!((m.n_assets, m.n_edges, m.max_degree, m.lcc_size), (3, 0, 0, 1));
        assert_eq!(m.density, 0.0);
        assert_eq!(m.avg_degree, 0.0);

        let single = network_metrics(month(), &AssetGraph::with_nodes(["A"]));
        assert_eq!(single.density, 0.0);
        assert_eq!(single.lcc_size, 1);

        let empty = network_metrics(month(), &AssetGraph::default());
        assert_eq!(empty, NetworkMetrics::empty(month()));
    }

    #[test]
    fn test_degree_sum_and_bounds_hold() {
        let names: Vec<String> = (0..9).map(|i| format!("n{i}")).collect();
        let mut g = AssetGraph::with_nodes(names.clone());
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                if (a.len() + b.as_bytes()[1] as usize + i) % 3 == 0 {
                    g.add_edge(a, b, 1.0);
                }
            }
        }
        let m = network_metrics(month(), &g);
        let degree_sum: usize = names.iter().map(|n| g.degree(n)).sum();
        assert_eq!(degree_sum, 2 * m.n_edges);
        assert!(m.n_edges <= m.n_assets * (m.n_assets - 1) / 2);
        assert!((0.0..=1.0).contains(&m.density));
        assert!(m.lcc_size >= 1 && m.lcc_size <= m.n_assets);
    }
}
