//! Conversion between entities and raw attribute maps.

use aws_sdk_dynamodb::types::AttributeValue;
use serde::{Serialize, de::DeserializeOwned};
use serde_dynamo::{from_attribute_value, from_item, to_attribute_value, to_item};

use crate::error::Error;
use crate::table::entity::Entity;
use crate::table::types::{CompositeKey, Item};

/// Convert a value into an attribute map
pub fn marshal<T: Serialize>(value: &T) -> Result<Item, Error> {
    to_item::<_, Item>(value).map_err(Error::Encoding)
}

/// Convert an attribute map back into a value
pub fn unmarshal<T: DeserializeOwned>(item: Item) -> Result<T, Error> {
    from_item(item).map_err(Error::Decoding)
}

/// Convert a single value into an attribute value
pub fn to_value<V: Serialize>(value: &V) -> Result<AttributeValue, Error> {
    to_attribute_value::<_, AttributeValue>(value).map_err(Error::Encoding)
}

/// Key projection of an entity: its marshalled form with every non-key
/// attribute stripped
pub fn key_of<T: Entity>(entity: &T) -> Result<Item, Error> {
    key_projection::<T>(&marshal(entity)?)
}

/// Key projection of an already marshalled entity
pub fn key_projection<T: Entity>(item: &Item) -> Result<Item, Error> {
    let mut key = item.clone();
    key.retain(|name, _| T::is_key_attribute(name));

    if !key.contains_key(T::PARTITION_KEY) {
        return Err(Error::InvalidKey(format!(
            "entity has no `{}` attribute",
            T::PARTITION_KEY
        )));
    }
    if let Some(sort_key) = T::SORT_KEY {
        if !key.contains_key(sort_key) {
            return Err(Error::InvalidKey(format!(
                "entity has no `{sort_key}` attribute"
            )));
        }
    }

    Ok(key)
}

/// Key projection built from typed key values
pub fn key_item<T: Entity>(partition_key: &T::PK, sort_key: Option<&T::SK>) -> Result<Item, Error> {
    let mut item = Item::with_capacity(2);
    let _ = item.insert(T::PARTITION_KEY.to_string(), to_value(partition_key)?);

    match (T::SORT_KEY, sort_key) {
        (Some(name), Some(value)) => {
            let _ = item.insert(name.to_string(), to_value(value)?);
        }
        (Some(name), None) => {
            return Err(Error::InvalidKey(format!("sort key `{name}` is required")));
        }
        (None, Some(_)) => {
            return Err(Error::InvalidKey(
                "table has no sort key but one was given".to_string(),
            ));
        }
        (None, None) => {}
    }

    Ok(item)
}

/// Typed key back from a key projection (or any item containing the key)
pub fn key_from_item<T: Entity>(item: &Item) -> Result<CompositeKey<T::PK, T::SK>, Error> {
    let pk_attr = item.get(T::PARTITION_KEY).ok_or_else(|| {
        Error::InvalidKey(format!("item has no `{}` attribute", T::PARTITION_KEY))
    })?;
    let pk: T::PK = from_attribute_value(pk_attr.clone()).map_err(Error::Decoding)?;

    let sk: Option<T::SK> = T::SORT_KEY
        .and_then(|sk_name| item.get(sk_name))
        .map(|sk_attr| from_attribute_value(sk_attr.clone()))
        .transpose()
        .map_err(Error::Decoding)?;

    Ok((pk, sk))
}

/// Key projection of a typed composite key
pub fn composite_key_item<T: Entity>(key: &CompositeKey<T::PK, T::SK>) -> Result<Item, Error> {
    key_item::<T>(&key.0, key.1.as_ref())
}

/// Whether `returned` carries exactly the key attribute values of `requested`
pub fn key_matches(requested: &Item, returned: &Item) -> bool {
    requested
        .iter()
        .all(|(name, value)| returned.get(name) == Some(value))
}
