use carrier_core::{Json, LogicalMessage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Persisted saga state: identity, revision, and the domain data.
///
/// The id never changes. The revision increases by one on every committed
/// update; storage rejects an update whose loaded revision is stale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    /// Immutable saga identity
    pub id: Uuid,
    /// Monotonically increasing revision, starting at 0
    pub revision: u64,
    /// Logical type name of the saga data
    pub data_type: String,
    /// Domain fields
    pub data: Json,
}

impl SagaInstance {
    /// Create a fresh saga instance at revision 0
    pub fn new(data_type: impl Into<String>, data: Json) -> Self {
        Self {
            id: Uuid::new_v4(),
            revision: 0,
            data_type: data_type.into(),
            data,
        }
    }

    /// Read a top-level field of the saga data
    pub fn field(&self, name: &str) -> Option<&Json> {
        self.data.get(name)
    }
}

/// A saga instance while a handler works on it
#[derive(Debug)]
pub struct ActiveSaga {
    instance: SagaInstance,
    loaded_revision: u64,
    newly_created: bool,
    completed: bool,
}

impl ActiveSaga {
    /// Wrap a loaded instance
    pub fn loaded(instance: SagaInstance) -> Self {
        let loaded_revision = instance.revision;
        Self {
            instance,
            loaded_revision,
            newly_created: false,
            completed: false,
        }
    }

    /// Wrap a freshly created instance that has not been persisted yet
    pub fn created(instance: SagaInstance) -> Self {
        Self {
            loaded_revision: instance.revision,
            instance,
            newly_created: true,
            completed: false,
        }
    }

    /// The underlying instance
    pub fn instance(&self) -> &SagaInstance {
        &self.instance
    }

    /// Mutable access to the saga data for the handler
    pub fn data_mut(&mut self) -> &mut Json {
        &mut self.instance.data
    }

    /// Read-only access to the saga data
    pub fn data(&self) -> &Json {
        &self.instance.data
    }

    /// The revision the instance had when it was loaded
    pub fn loaded_revision(&self) -> u64 {
        self.loaded_revision
    }

    /// Whether this instance was created for the current message
    pub fn is_newly_created(&self) -> bool {
        self.newly_created
    }

    /// Mark the conversation finished; the instance is deleted instead of
    /// updated when the handler returns.
    pub fn mark_complete(&mut self) {
        self.completed = true;
    }

    /// Whether the handler marked the saga complete
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn into_instance(self) -> SagaInstance {
        self.instance
    }
}

type Extractor = Arc<dyn Fn(&LogicalMessage) -> Option<Json> + Send + Sync>;

/// Extracts the value correlating a message with a saga instance.
///
/// The property path names a top-level field of the saga data; for a given
/// (saga data type, property) the value is unique per instance, enforced by
/// storage.
#[derive(Clone)]
pub struct CorrelationProperty {
    property: String,
    extract: Extractor,
}

impl CorrelationProperty {
    /// Correlate on the value produced by `extract`
    pub fn new<F>(property: impl Into<String>, extract: F) -> Self
    where
        F: Fn(&LogicalMessage) -> Option<Json> + Send + Sync + 'static,
    {
        Self {
            property: property.into(),
            extract: Arc::new(extract),
        }
    }

    /// Correlate on a top-level body field carrying the same name as the
    /// saga-data property
    pub fn from_body_field(field: impl Into<String>) -> Self {
        let field = field.into();
        let lookup = field.clone();
        Self::new(field, move |message: &LogicalMessage| {
            message.body.get(&lookup).cloned()
        })
    }

    /// The saga-data property path this value is matched against
    pub fn property(&self) -> &str {
        &self.property
    }

    /// Extract the correlation value from a message
    pub fn value_from(&self, message: &LogicalMessage) -> Option<Json> {
        (self.extract)(message)
    }
}

impl fmt::Debug for CorrelationProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationProperty")
            .field("property", &self.property)
            .finish()
    }
}

/// Canonical string form of a correlation value, used for lock ids and
/// uniqueness indexes
pub(crate) fn canonical_value(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_new_instance_starts_at_revision_zero() {
        let actual = SagaInstance::new("OrderSaga", json!({"order_id": "o-1"}));

        assert_eq!(actual.revision, 0);
        assert_eq!(actual.data_type, "OrderSaga");
        assert_eq!(actual.field("order_id"), Some(&json!("o-1")));
        assert_eq!(actual.field("missing"), None);
    }

    #[test]
    fn test_active_saga_tracks_loaded_revision() {
        let mut instance = SagaInstance::new("OrderSaga", json!({}));
        instance.revision = 4;

        let fixture = ActiveSaga::loaded(instance);

        assert_eq!(fixture.loaded_revision(), 4);
        assert!(!fixture.is_newly_created());
        assert!(!fixture.is_completed());
    }

    #[test]
    fn test_mark_complete() {
        let mut fixture = ActiveSaga::created(SagaInstance::new("OrderSaga", json!({})));
        assert!(fixture.is_newly_created());

        fixture.mark_complete();
        assert!(fixture.is_completed());
    }

    #[test]
    fn test_correlation_from_body_field() {
        let fixture = CorrelationProperty::from_body_field("order_id");
        let message = LogicalMessage::new("OrderPlaced", json!({"order_id": "o-7"}));

        let actual = fixture.value_from(&message);
        let expected = Some(json!("o-7"));
        assert_eq!(actual, expected);
        assert_eq!(fixture.property(), "order_id");
    }

    #[test]
    fn test_correlation_missing_field_yields_none() {
        let fixture = CorrelationProperty::from_body_field("order_id");
        let message = LogicalMessage::new("OrderPlaced", json!({"other": 1}));

        assert_eq!(fixture.value_from(&message), None);
    }

    #[test]
    fn test_canonical_value_strings_are_unquoted() {
        assert_eq!(canonical_value(&json!("x")), "x");
        assert_eq!(canonical_value(&json!(7)), "7");
        assert_eq!(canonical_value(&json!({"a": 1})), "{\"a\":1}");
    }
}
