//! Participant identifier derivation
//!
//! Participants only ever type their display name. The identifier handed to
//! the survey platform is a UUIDv5 of the case-folded name inside a
//! study-specific namespace, so the same person always maps to the same id
//! and nobody can compute another participant's id without the namespace.

use uuid::Uuid;

/// Derive the identifier for `name` inside `namespace`
///
/// Case-folding happens before hashing: "Alice" and "alice" collide on
/// purpose. Surrounding whitespace is significant, as in the survey flow.
pub fn derive(namespace: &Uuid, name: &str) -> Uuid {
    let folded = name.to_lowercase();
    Uuid::new_v5(namespace, folded.as_bytes())
}

/// Parse an identifier received from an external caller
pub fn parse(s: &str) -> Result<Uuid, uuid::Error> {
    Uuid::parse_str(s.trim())
}

/// Identifier service bound to one study namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identifier {
    namespace: Uuid,
}

impl Identifier {
    pub fn new(namespace: Uuid) -> Self {
        Self { namespace }
    }

    /// Namespace with no configured value; ids are stable for this process only
    pub fn ephemeral() -> Self {
        Self::new(Uuid::new_v4())
    }

    /// Namespace in use, logged when it was drawn at random
    pub fn namespace(&self) -> Uuid {
        self.namespace
    }

    pub fn derive(&self, name: &str) -> Uuid {
        derive(&self.namespace, name)
    }
}
