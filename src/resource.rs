use crate::error::Error;

/// Names the critical section a [`crate::Lease`] protects.
///
/// Equality of `name` implies contention: two [`LeaseResource`]s built from
/// the same string refer to the same lock on a given backend. The name is
/// immutable once constructed and is used verbatim as a Redis key, a
/// ZooKeeper path segment, a Mongo collection name, and a SQL unique
/// column value, so it must stay printable and stable across calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseResource {
    name: String,
}

impl LeaseResource {
    /// Build a resource from a non-empty, printable name.
    pub fn new(name: impl Into<String>) -> Result<Self, Error> {
        let name = name.into();
        if name.is_empty() || name.chars().any(|c| c.is_control()) {
            return Err(Error::InvalidResource(name));
        }
        Ok(Self { name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for LeaseResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_name() {
        assert!(LeaseResource::new("").is_err());
    }

    #[test]
    fn rejects_control_characters() {
        assert!(LeaseResource::new("bad\nname").is_err());
    }

    #[test]
    fn accepts_printable_name() {
        let r = LeaseResource::new("nightly-report").unwrap();
        assert_eq!(r.name(), "nightly-report");
        assert_eq!(r.to_string(), "nightly-report");
    }
}
