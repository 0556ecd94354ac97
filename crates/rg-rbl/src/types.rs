use serde::{Deserialize, Serialize};

/// One upstream DNS block-list, as loaded from the servers file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rbl {
    pub name: String,
    pub host: String,
    #[serde(default)]
    pub description: String,
}

/// A synthetic zone that fans out to many RBLs. The member list is fully
/// expanded at load time; a `"*"` selector never survives past loading.
#[derive(Debug, Clone)]
pub struct AggregateZone {
    pub domain: String,
    pub description: Option<String>,
    pub rbls: Vec<Rbl>,
}
