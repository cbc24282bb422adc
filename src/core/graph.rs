//! Fold a focal address's transfers into a node/edge flow graph.
//!
//! Counterparty nodes are keyed by `(address, direction)`, so an address that
//! both sent to and received from the focal address shows up twice: once on
//! the inbound side (level 0) and once on the outbound side (level 2).

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde::Serialize;

use super::aggregate::{AggregateRequest, Aggregator};
use super::filter::FilterSettings;
use super::format::{compact_amount, short_addr};
use super::{Asset, Direction, TransferRecord};
use crate::config::TraceConfig;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub real_address: String,
    pub level: u8,
    pub is_focal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgeTransfer {
    pub amount: Decimal,
    pub display_amount: String,
    pub time: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    pub id: String,
    pub from: String,
    pub to: String,
    pub asset: Asset,
    pub direction: Direction,
    pub sum: Decimal,
    pub count: usize,
    pub label: String,
    pub transfers: Vec<EdgeTransfer>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Graph {
    pub focal_address: String,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl Graph {
    /// Build the graph for `address`. Node and edge order follows first
    /// appearance in `transfers`.
    pub fn build(address: &str, transfers: &[TransferRecord]) -> Self {
        let focal_id = format!("{address}_center");
        let mut nodes = vec![GraphNode {
            id: focal_id.clone(),
            label: short_addr(address),
            real_address: address.to_string(),
            level: 1,
            is_focal: true,
        }];
        let mut node_ids: HashSet<String> = HashSet::from([focal_id.clone()]);
        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut edge_index: HashMap<String, usize> = HashMap::new();

        for tx in transfers {
            let node_id = format!("{}_{}", tx.other_party, tx.direction);
            if node_ids.insert(node_id.clone()) {
                nodes.push(GraphNode {
                    id: node_id.clone(),
                    label: short_addr(&tx.other_party),
                    real_address: tx.other_party.clone(),
                    level: match tx.direction {
                        Direction::In => 0,
                        Direction::Out => 2,
                    },
                    is_focal: false,
                });
            }

            let edge_id = format!("{}-{}-{}", tx.other_party, tx.direction, tx.asset);
            let slot = *edge_index.entry(edge_id.clone()).or_insert_with(|| {
                let (from, to) = match tx.direction {
                    Direction::In => (node_id.clone(), focal_id.clone()),
                    Direction::Out => (focal_id.clone(), node_id.clone()),
                };
                edges.push(GraphEdge {
                    id: edge_id,
                    from,
                    to,
                    asset: tx.asset,
                    direction: tx.direction,
                    sum: Decimal::ZERO,
                    count: 0,
                    label: String::new(),
                    transfers: Vec::new(),
                });
                edges.len() - 1
            });

            let edge = &mut edges[slot];
            edge.sum += tx.raw_amount;
            edge.count += 1;
            edge.transfers.push(EdgeTransfer {
                amount: tx.raw_amount,
                display_amount: tx.display_amount.clone(),
                time: tx.display_time.clone(),
                hash: tx.hash.clone(),
            });
        }

        for edge in &mut edges {
            edge.label = edge_label(edge);
        }

        Self {
            focal_address: address.to_string(),
            nodes,
            edges,
        }
    }

    /// Number of distinct counterparty addresses, regardless of direction.
    pub fn distinct_counterparties(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| !n.is_focal)
            .map(|n| n.real_address.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

fn edge_label(edge: &GraphEdge) -> String {
    let mut label = format!("{} {}", compact_amount(edge.sum), edge.asset);
    if edge.count > 1 {
        label.push_str(&format!(" ({} transfers)", edge.count));
    }
    label
}

/// Aggregate the recent history of `address` under `settings` and fold it
/// into a graph.
pub async fn trace(aggregator: &Aggregator, address: &str, settings: FilterSettings, config: &TraceConfig) -> Graph {
    let request = AggregateRequest::new(config.target_count, settings).within_days(config.lookback_days);
    let transfers = aggregator.aggregate(address, &request).await;
    Graph::build(address, &transfers)
}
