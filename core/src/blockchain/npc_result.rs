use crate::blockchain::spend_bundle_conditions::SpendBundleConditions;
use crate::errors::ErrorCode;
use serde::{Deserialize, Serialize};

/// Outcome of running a generator: either an error or the parsed conditions.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Debug)]
pub struct NpcResult {
    pub error: Option<ErrorCode>,
    pub conds: Option<SpendBundleConditions>,
}
impl NpcResult {
    #[must_use]
    pub fn from_error(error: ErrorCode) -> Self {
        Self {
            error: Some(error),
            conds: None,
        }
    }
    #[must_use]
    pub fn from_conds(conds: SpendBundleConditions) -> Self {
        Self {
            error: None,
            conds: Some(conds),
        }
    }
    #[must_use]
    pub fn cost(&self) -> u64 {
        self.conds.as_ref().map_or(0, |c| c.cost)
    }
}
