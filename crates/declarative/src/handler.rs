//! Field handlers: the unit of convergence for one slice of a resource's
//! configuration.

/// One independently convergeable aspect of a resource.
///
/// A handler owns a set of configuration keys and names the handlers that
/// must finish before it runs. The `action` is whatever the owning resource
/// dispatches on when the handler is executed, typically a small `Copy`
/// enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler<A> {
    name: &'static str,
    keys: Vec<&'static str>,
    after: Vec<&'static str>,
    action: A,
}

impl<A> Handler<A> {
    /// Create a handler owning `keys`.
    pub fn new(name: &'static str, keys: &[&'static str], action: A) -> Self {
        Self {
            name,
            keys: keys.to_vec(),
            after: Vec::new(),
            action,
        }
    }

    /// Declare that this handler runs after `predecessor`.
    pub fn after(mut self, predecessor: &'static str) -> Self {
        if !self.after.contains(&predecessor) {
            self.after.push(predecessor);
        }
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn keys(&self) -> &[&'static str] {
        &self.keys
    }

    pub fn predecessors(&self) -> &[&'static str] {
        &self.after
    }

    pub fn action(&self) -> &A {
        &self.action
    }

    pub fn owns(&self, key: &str) -> bool {
        self.keys.contains(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_after_deduplicates() {
        let h = Handler::new("flag", &["mapPublicIpOnLaunch"], ())
            .after("create")
            .after("create");
        assert_eq!(h.predecessors(), &["create"]);
        assert!(h.owns("mapPublicIpOnLaunch"));
        assert!(!h.owns("cidrBlock"));
    }
}
