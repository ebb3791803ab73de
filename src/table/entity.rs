use serde::{Serialize, de::DeserializeOwned};
use std::fmt;

use crate::table::types::CompositeKey;

/// A record stored in a table, addressed by a partition key and an optional
/// sort key
///
/// Key components are immutable once the entity is persisted; every other
/// attribute can be rewritten or updated in place.
///
/// # Example
///
/// ```rust
/// use dynamo_gateway::Entity;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Score {
///     user_id: String,
///     game_title: String,
///     #[serde(default)]
///     score: i64,
/// }
///
/// impl Entity for Score {
///     type PK = String;
///     type SK = String;
///
///     const PARTITION_KEY: &'static str = "user_id";
///     const SORT_KEY: Option<&'static str> = Some("game_title");
///
///     fn partition_key(&self) -> Self::PK {
///         self.user_id.clone()
///     }
///
///     fn sort_key(&self) -> Option<Self::SK> {
///         Some(self.game_title.clone())
///     }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Associated partition key type
    type PK: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + fmt::Debug;

    /// Associated sort key type
    type SK: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + fmt::Debug;

    /// Partition key attribute name
    const PARTITION_KEY: &'static str;

    /// Sort key attribute name
    const SORT_KEY: Option<&'static str> = None;

    /// Partition key
    fn partition_key(&self) -> Self::PK;

    /// Sort key
    fn sort_key(&self) -> Option<Self::SK> {
        None
    }

    /// Composite key
    fn composite_key(&self) -> CompositeKey<Self::PK, Self::SK> {
        (self.partition_key(), self.sort_key())
    }

    /// Whether `name` is one of the key attributes
    fn is_key_attribute(name: &str) -> bool {
        name == Self::PARTITION_KEY || Self::SORT_KEY == Some(name)
    }
}
