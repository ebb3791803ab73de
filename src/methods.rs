use crate::table::{CompositeKey, Entity};

/// Key-set helpers over entities and composite keys
///
/// Typical use is checking a batch read: the keys in
/// [`missing_keys`](EntityMethods::missing_keys) were requested but
/// nothing was stored under them.
pub trait EntityMethods: Entity {
    /// Composite keys of `entities`, in order
    fn keys_of(entities: &[Self]) -> Vec<CompositeKey<Self::PK, Self::SK>> {
        entities.iter().map(Entity::composite_key).collect()
    }

    /// Entities whose key is not among `keys`
    fn without_keys(entities: Vec<Self>, keys: &[CompositeKey<Self::PK, Self::SK>]) -> Vec<Self> {
        entities
            .into_iter()
            .filter(|entity| !keys.contains(&entity.composite_key()))
            .collect()
    }

    /// Keys in `requested` that none of `found` carries
    fn missing_keys(
        found: &[Self],
        requested: &[CompositeKey<Self::PK, Self::SK>],
    ) -> Vec<CompositeKey<Self::PK, Self::SK>> {
        let found = Self::keys_of(found);

        requested
            .iter()
            .filter(|key| !found.contains(key))
            .cloned()
            .collect()
    }
}

impl<T: Entity> EntityMethods for T {}
