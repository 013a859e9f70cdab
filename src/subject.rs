//! Subject collaborator: translates an opaque external agent identifier
//! into the core's `SubjectId`.

use crate::types::SubjectId;

/// Resolves an external agent identifier to a stable `SubjectId`. A real
/// deployment might look this up in an agent registry, deduplicate
/// aliases, or assign anonymous ids; the default implementation treats
/// the identifier as already canonical.
pub trait Subject: Send + Sync {
    fn resolve(&self, agent_id: &str) -> SubjectId;
}

/// Pass-through resolver: the external identifier is already a valid
/// `SubjectId`.
#[derive(Debug, Default)]
pub struct PassthroughSubject;

impl Subject for PassthroughSubject {
    fn resolve(&self, agent_id: &str) -> SubjectId {
        SubjectId(agent_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_preserves_identifier() {
        let resolver = PassthroughSubject;
        assert_eq!(resolver.resolve("agent-42"), SubjectId("agent-42".to_string()));
    }
}
