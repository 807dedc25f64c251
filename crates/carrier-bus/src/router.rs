use carrier_core::{Error, Result};
use std::collections::HashMap;

/// Maps logical message types to destination queue addresses.
///
/// Mappings are exact type names, supplied at configuration time; there are
/// no wildcards. A send for an unmapped type fails immediately with a
/// routing error.
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: HashMap<String, String>,
}

impl Router {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a type → destination mapping
    pub fn map(&mut self, message_type: impl Into<String>, destination: impl Into<String>) {
        self.routes.insert(message_type.into(), destination.into());
    }

    /// The destination for a message type
    pub fn get_destination(&self, message_type: &str) -> Result<&str> {
        self.routes
            .get(message_type)
            .map(String::as_str)
            .ok_or_else(|| Error::routing(message_type))
    }

    /// Number of mappings
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the router has no mappings
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_mapped_type_resolves() {
        let mut fixture = Router::new();
        fixture.map("billing.Invoice", "billing");

        let actual = fixture.get_destination("billing.Invoice").unwrap();
        let expected = "billing";
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_unmapped_type_is_a_routing_error() {
        let fixture = Router::new();
        let actual = fixture.get_destination("billing.Invoice");
        assert!(matches!(actual, Err(Error::Routing { .. })));
    }

    #[test]
    fn test_mappings_are_exact_not_wildcards() {
        let mut fixture = Router::new();
        fixture.map("billing.Invoice", "billing");

        assert!(fixture.get_destination("billing.invoice").is_err());
        assert!(fixture.get_destination("billing").is_err());
        assert_eq!(fixture.len(), 1);
    }

    #[test]
    fn test_remapping_replaces_the_destination() {
        let mut fixture = Router::new();
        fixture.map("billing.Invoice", "billing-v1");
        fixture.map("billing.Invoice", "billing-v2");

        assert_eq!(fixture.get_destination("billing.Invoice").unwrap(), "billing-v2");
    }
}
