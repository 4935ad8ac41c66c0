use crate::types::{CriteriaResult, FeedGroup};

/// How the field and method judgments combine into a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombineRule {
    /// Either judgment suffices.
    Any,
    /// Both judgments are required.
    All,
}

impl CombineRule {
    fn apply(self, field: bool, method: bool) -> bool {
        match self {
            CombineRule::Any => field || method,
            CombineRule::All => field && method,
        }
    }
}

/// Combination rule per feed group. A new group only needs a row here.
pub const RULES: &[(FeedGroup, CombineRule)] = &[
    (FeedGroup::HighQuality, CombineRule::Any),
    (FeedGroup::Other, CombineRule::All),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub accepted: bool,
    pub degraded: bool,
}

pub fn rule_for(group: FeedGroup) -> CombineRule {
    RULES
        .iter()
        .find(|(g, _)| *g == group)
        .map(|(_, rule)| *rule)
        .unwrap_or(CombineRule::All)
}

/// Decide acceptance for an entry of `group`. A missing judgment counts as
/// a non-match and marks the evaluation degraded.
pub fn evaluate(group: FeedGroup, criteria: &CriteriaResult) -> Evaluation {
    let field = criteria.field_match.matched.unwrap_or(false);
    let method = criteria.method_match.matched.unwrap_or(false);

    Evaluation {
        accepted: rule_for(group).apply(field, method),
        degraded: criteria.field_match.is_missing() || criteria.method_match.is_missing(),
    }
}
