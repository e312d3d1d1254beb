//! Collection item trait and the shared collection type.

use std::fmt::Debug;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A cached collection. Shared by every consumer that reads the same
/// snapshot, so cloning it never copies items.
pub type Collection<T> = Arc<Vec<T>>;

/// An element of a cached collection resource (a project, a task, ...).
///
/// Items must survive a JSON round trip because the persistent layer stores
/// them as text. The identifier is used by mutators to address single items.
pub trait Item: Debug + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier of this item within its collection.
    fn id(&self) -> String;
}

/// Untyped items: the identifier is read from an `id` field (string or
/// number). Items without one report an empty id.
impl Item for serde_json::Value {
    fn id(&self) -> String {
        match self.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_value_id_from_string_or_number() {
        assert_eq!(json!({"id": "p-1"}).id(), "p-1");
        assert_eq!(json!({"id": 42}).id(), "42");
        assert_eq!(json!({"name": "no id"}).id(), "");
    }
}
