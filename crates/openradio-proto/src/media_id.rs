//! Ids of the browse tree nodes.
//!
//! A node id is a fixed prefix naming the node kind, optionally followed by a
//! parameter: `__COUNTRY_STATIONS__DE`, `__RADIO_STATIONS_IN_CATEGORY__12`,
//! `__SEARCH_FROM_APP__jazz`.  Playable entries use the station id instead.

use serde::{Deserialize, Serialize};

pub const ROOT: &str = "__ROOT__";
pub const ALL_CATEGORIES: &str = "__ALL_CATEGORIES__";
pub const STATIONS_IN_CATEGORY: &str = "__RADIO_STATIONS_IN_CATEGORY__";
pub const COUNTRIES_LIST: &str = "__COUNTRIES_LIST__";
pub const COUNTRY_STATIONS: &str = "__COUNTRY_STATIONS__";
pub const FAVORITES: &str = "__FAVORITES_LIST__";
pub const LOCALS: &str = "__LOCAL_RADIO_STATIONS_LIST__";
pub const SEARCH: &str = "__SEARCH_FROM_APP__";
pub const POPULAR: &str = "__POPULAR_STATIONS__";
pub const RECENTLY_ADDED: &str = "__RECENT_ADDED_STATIONS__";

/// Media id that never resolves to a station.
pub const NO_DATA: &str = "-1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Root,
    AllCategories,
    StationsInCategory,
    CountriesList,
    CountryStations,
    Favorites,
    Locals,
    Search,
    Popular,
    RecentlyAdded,
}

impl NodeKind {
    pub const ALL: [NodeKind; 10] = [
        NodeKind::Root,
        NodeKind::AllCategories,
        NodeKind::StationsInCategory,
        NodeKind::CountriesList,
        NodeKind::CountryStations,
        NodeKind::Favorites,
        NodeKind::Locals,
        NodeKind::Search,
        NodeKind::Popular,
        NodeKind::RecentlyAdded,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            NodeKind::Root => ROOT,
            NodeKind::AllCategories => ALL_CATEGORIES,
            NodeKind::StationsInCategory => STATIONS_IN_CATEGORY,
            NodeKind::CountriesList => COUNTRIES_LIST,
            NodeKind::CountryStations => COUNTRY_STATIONS,
            NodeKind::Favorites => FAVORITES,
            NodeKind::Locals => LOCALS,
            NodeKind::Search => SEARCH,
            NodeKind::Popular => POPULAR,
            NodeKind::RecentlyAdded => RECENTLY_ADDED,
        }
    }

    /// Node id carrying `param`.
    pub fn with_param(self, param: &str) -> String {
        format!("{}{}", self.prefix(), param)
    }
}

/// Split a node id into its kind and parameter.  Returns `None` for ids that
/// are not browse nodes (station ids, unknown strings).
pub fn split(id: &str) -> Option<(NodeKind, &str)> {
    NodeKind::ALL
        .iter()
        .find_map(|kind| id.strip_prefix(kind.prefix()).map(|param| (*kind, param)))
}
