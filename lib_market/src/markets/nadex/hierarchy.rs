//! # Market Hierarchy & Instrument Catalog
//!
//! The instrument universe comes from two endpoints: the full hierarchy
//! tree (to find the tradeable market ids under the five-minute binaries
//! branch) and one navigation call per market id (to list its instruments
//! and their underlyings). The catalog keeps arrival order throughout,
//! because subscription order (and therefore table-id assignment) follows
//! catalog iteration order.

use serde::Deserialize;
use serde_json::Value;

use crate::error::RelayError;

use super::apicall::NadexApiClient;

/// Hierarchy branch whose children are the tradeable market universe.
const ROOT_NODE_NAME: &str = "5 minute binaries";
/// Asset-class child of the root branch we subscribe.
const ASSET_NODE_NAME: &str = "forex";

/// Ordered instrument universe: market → underlying → instruments.
/// Rebuilt wholesale on every refresh, never mutated in place.
#[derive(Debug, Clone, Default)]
pub struct InstrumentCatalog {
    /// Markets in hierarchy order.
    pub markets: Vec<MarketEntry>,
}

/// One top-level market and its underlyings.
#[derive(Debug, Clone)]
pub struct MarketEntry {
    /// Hierarchy id of the market.
    pub market_id: u64,
    /// Underlyings in first-seen order.
    pub underlyings: Vec<UnderlyingEntry>,
}

/// One underlying and the instruments priced off it.
#[derive(Debug, Clone)]
pub struct UnderlyingEntry {
    /// Underlying epic.
    pub underlying: String,
    /// Instrument epics in arrival order.
    pub epics: Vec<String>,
}

impl InstrumentCatalog {
    /// Top-level market ids in catalog order.
    pub fn market_ids(&self) -> Vec<u64> {
        self.markets.iter().map(|m| m.market_id).collect()
    }

    /// Every instrument epic in subscription order.
    pub fn epics(&self) -> impl Iterator<Item = &str> {
        self.markets
            .iter()
            .flat_map(|m| m.underlyings.iter())
            .flat_map(|u| u.epics.iter())
            .map(String::as_str)
    }

    /// Number of instruments across all markets.
    pub fn instrument_count(&self) -> usize {
        self.epics().count()
    }

    /// Number of distinct underlyings across all markets.
    pub fn underlying_count(&self) -> usize {
        self.markets.iter().map(|m| m.underlyings.len()).sum()
    }

    /// Whether the catalog holds no markets.
    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct NavigationResponse {
    #[serde(default)]
    markets: Vec<NavMarket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NavMarket {
    #[serde(default)]
    epic: String,
    #[serde(default)]
    underlying_epic: String,
}

/// Walks the hierarchy tree down to the asset-class node and returns its
/// children's ids, in tree order. Node-name matching is case-insensitive.
pub fn extract_market_ids(tree: &Value) -> Vec<u64> {
    let top_level = match tree.get("topLevelNodes").and_then(Value::as_array) {
        Some(nodes) => nodes,
        None => return Vec::new(),
    };

    let children_of = |node: &Value, name: &str| -> Option<Vec<Value>> {
        node.get("children")
            .and_then(Value::as_array)
            .and_then(|children| {
                children
                    .iter()
                    .find(|c| node_name_is(c, name))
                    .and_then(|c| c.get("children"))
                    .and_then(Value::as_array)
                    .cloned()
            })
    };

    for node in top_level {
        if !node_name_is(node, ROOT_NODE_NAME) {
            continue;
        }
        if let Some(markets) = children_of(node, ASSET_NODE_NAME) {
            return markets.iter().filter_map(node_id).collect();
        }
    }
    Vec::new()
}

fn node_name_is(node: &Value, expected: &str) -> bool {
    node.get("name")
        .and_then(Value::as_str)
        .map(|n| n.eq_ignore_ascii_case(expected))
        .unwrap_or(false)
}

fn node_id(node: &Value) -> Option<u64> {
    match node.get("id") {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
}

fn market_entry(market_id: u64, markets: &[NavMarket]) -> MarketEntry {
    let mut underlyings: Vec<UnderlyingEntry> = Vec::new();
    for market in markets {
        if market.epic.is_empty() || market.underlying_epic.is_empty() {
            continue;
        }
        match underlyings
            .iter_mut()
            .find(|u| u.underlying == market.underlying_epic)
        {
            Some(entry) => entry.epics.push(market.epic.clone()),
            None => underlyings.push(UnderlyingEntry {
                underlying: market.underlying_epic.clone(),
                epics: vec![market.epic.clone()],
            }),
        }
    }
    MarketEntry {
        market_id,
        underlyings,
    }
}

impl NadexApiClient {
    /// Fetches the hierarchy tree and assembles a fresh catalog. Any
    /// failing call fails the whole fetch; the caller decides whether
    /// that is fatal (bootstrap) or a skipped cycle (resubscription).
    pub async fn fetch_catalog(&self) -> Result<InstrumentCatalog, RelayError> {
        let tree = self.get_json(self.tree_url()).await?;
        let market_ids = extract_market_ids(&tree);
        if market_ids.is_empty() {
            return Err(RelayError::Catalog(format!(
                "no '{ASSET_NODE_NAME}' markets under '{ROOT_NODE_NAME}'"
            )));
        }

        let mut catalog = InstrumentCatalog::default();
        for market_id in market_ids {
            let nav: NavigationResponse =
                serde_json::from_value(self.get_json(&self.navigation_url(market_id)).await?)
                    .map_err(|e| RelayError::Catalog(format!("navigation {market_id}: {e}")))?;
            catalog.markets.push(market_entry(market_id, &nav.markets));
        }

        log::info!(
            "catalog: {} market(s), {} underlying(s), {} instrument(s)",
            catalog.markets.len(),
            catalog.underlying_count(),
            catalog.instrument_count()
        );
        Ok(catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn market_ids_come_from_the_forex_branch_in_order() {
        let tree = json!({
            "topLevelNodes": [
                { "name": "Daily Markets", "children": [] },
                {
                    "name": "5 Minute Binaries",
                    "children": [
                        { "name": "Indices", "children": [{ "id": 900 }] },
                        {
                            "name": "Forex",
                            "children": [
                                { "id": 101, "name": "EUR/USD" },
                                { "id": "102", "name": "GBP/USD" },
                                { "name": "broken, no id" }
                            ]
                        }
                    ]
                }
            ]
        });
        assert_eq!(extract_market_ids(&tree), vec![101, 102]);
    }

    #[test]
    fn missing_branches_yield_no_ids() {
        assert!(extract_market_ids(&json!({})).is_empty());
        assert!(extract_market_ids(&json!({ "topLevelNodes": [] })).is_empty());
        let no_forex = json!({
            "topLevelNodes": [{ "name": "5 minute binaries", "children": [] }]
        });
        assert!(extract_market_ids(&no_forex).is_empty());
    }

    #[test]
    fn navigation_grouping_keeps_arrival_order_and_skips_incomplete_rows() {
        let markets = vec![
            NavMarket { epic: "NB.I.EURUSD-1.IP".into(), underlying_epic: "CS.EURUSD".into() },
            NavMarket { epic: "NB.I.GBPUSD-1.IP".into(), underlying_epic: "CS.GBPUSD".into() },
            NavMarket { epic: "NB.I.EURUSD-2.IP".into(), underlying_epic: "CS.EURUSD".into() },
            NavMarket { epic: String::new(), underlying_epic: "CS.USDJPY".into() },
        ];
        let entry = market_entry(101, &markets);

        assert_eq!(entry.underlyings.len(), 2);
        assert_eq!(entry.underlyings[0].underlying, "CS.EURUSD");
        assert_eq!(
            entry.underlyings[0].epics,
            vec!["NB.I.EURUSD-1.IP", "NB.I.EURUSD-2.IP"]
        );
        assert_eq!(entry.underlyings[1].epics, vec!["NB.I.GBPUSD-1.IP"]);
    }

    #[test]
    fn catalog_iteration_order_is_subscription_order() {
        let catalog = InstrumentCatalog {
            markets: vec![
                MarketEntry {
                    market_id: 101,
                    underlyings: vec![UnderlyingEntry {
                        underlying: "CS.EURUSD".into(),
                        epics: vec!["A".into(), "B".into()],
                    }],
                },
                MarketEntry {
                    market_id: 102,
                    underlyings: vec![UnderlyingEntry {
                        underlying: "CS.GBPUSD".into(),
                        epics: vec!["C".into()],
                    }],
                },
            ],
        };
        let epics: Vec<&str> = catalog.epics().collect();
        assert_eq!(epics, vec!["A", "B", "C"]);
        assert_eq!(catalog.market_ids(), vec![101, 102]);
        assert_eq!(catalog.instrument_count(), 3);
        assert!(!catalog.is_empty());
    }
}
