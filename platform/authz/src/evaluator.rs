use crate::types::{PolicyDocument, ResolvedScopes};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Evaluate a resolved chain against the caller's policy documents.
///
/// Each scope level passes iff at least one rule across all documents covers
/// it: the rule's scope equals the level, its verb set permits the action's
/// verb, and its resource matcher accepts the action's resource. The chain is
/// allowed iff every level passes; one failing level denies the whole chain.
/// Pure and deterministic, no side effects.
pub fn evaluate(chain: &ResolvedScopes, documents: &[PolicyDocument]) -> Decision {
    for (scope, action) in &chain.0 {
        let permitted = documents
            .iter()
            .flat_map(|doc| doc.rules.iter())
            .filter(|rule| rule.scope == *scope)
            .any(|rule| rule.verbs.permits(action.verb) && rule.resource.matches(&action.resource));
        if !permitted {
            return Decision::Deny;
        }
    }
    Decision::Allow
}
