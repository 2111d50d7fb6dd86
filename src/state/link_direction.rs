use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of a page's link set a crawl follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    /// Links on the page (page -> target)
    #[default]
    Outbound,

    /// Backlinks (source -> page)
    Inbound,
}

impl LinkDirection {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Outbound => "outbound",
            Self::Inbound => "inbound",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "outbound" => Some(Self::Outbound),
            "inbound" => Some(Self::Inbound),
            _ => None,
        }
    }

    /// Orients an edge between the crawled page and one of its neighbors
    pub fn edge(&self, crawled: i64, neighbor: i64) -> (i64, i64) {
        match self {
            Self::Outbound => (crawled, neighbor),
            Self::Inbound => (neighbor, crawled),
        }
    }
}

impl fmt::Display for LinkDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
