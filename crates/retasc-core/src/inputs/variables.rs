use serde::{Deserialize, Serialize};

use crate::value::{Map, Params};

/// A single value made of fixed template variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Variables {
    pub variables: Map,
}

impl Variables {
    pub fn values(&self) -> Vec<Params> {
        vec![self.variables.clone()]
    }
}
