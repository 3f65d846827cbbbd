use std::collections::HashMap;
use std::convert::Infallible;

use fragments_core::{
    traits::{DataStore, FragmentListing, MetadataStore},
    Fragment, FragmentId, OwnerId,
};
use parking_lot::RwLock;

type Partitioned<V> = RwLock<HashMap<OwnerId, HashMap<FragmentId, V>>>;

/// Process-local store. Nothing survives a restart.
pub struct EphemeralStorage {
    metadata: Partitioned<Fragment>,
    data: Partitioned<Vec<u8>>,
}

impl EphemeralStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for EphemeralStorage {
    fn default() -> Self {
        Self {
            metadata: RwLock::new(HashMap::new()),
            data: RwLock::new(HashMap::new()),
        }
    }
}

fn remove<V>(map: &Partitioned<V>, owner: &OwnerId, id: &str) -> bool {
    let mut map = map.write();
    match map.get_mut(owner) {
        Some(inner) => {
            let removed = inner.remove(id).is_some();
            if inner.is_empty() {
                map.remove(owner);
            }
            removed
        }
        None => false,
    }
}

impl MetadataStore for EphemeralStorage {
    type Error = Infallible;

    fn read_metadata(&self, owner: &OwnerId, id: &str) -> Result<Option<Fragment>, Self::Error> {
        let map = self.metadata.read();
        Ok(map.get(owner).and_then(|inner| inner.get(id).cloned()))
    }

    fn write_metadata(&self, fragment: &Fragment) -> Result<(), Self::Error> {
        let mut map = self.metadata.write();
        map.entry(fragment.owner_id().clone())
            .or_default()
            .insert(fragment.id().to_owned(), fragment.clone());
        Ok(())
    }

    fn list_metadata(&self, owner: &OwnerId, expand: bool) -> Result<FragmentListing, Self::Error> {
        let map = self.metadata.read();
        let mut frags: Vec<&Fragment> = map
            .get(owner)
            .map(|inner| inner.values().collect())
            .unwrap_or_default();
        frags.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(if expand {
            FragmentListing::Expanded(frags.into_iter().cloned().collect())
        } else {
            FragmentListing::Ids(frags.into_iter().map(|f| f.id().to_owned()).collect())
        })
    }

    fn delete_metadata(&self, owner: &OwnerId, id: &str) -> Result<bool, Self::Error> {
        Ok(remove(&self.metadata, owner, id))
    }
}

impl DataStore for EphemeralStorage {
    type Error = Infallible;

    fn read_data(&self, owner: &OwnerId, id: &str) -> Result<Option<Vec<u8>>, Self::Error> {
        let map = self.data.read();
        Ok(map.get(owner).and_then(|inner| inner.get(id).cloned()))
    }

    fn write_data(&self, owner: &OwnerId, id: &str, data: &[u8]) -> Result<(), Self::Error> {
        let mut map = self.data.write();
        map.entry(owner.clone())
            .or_default()
            .insert(id.to_owned(), data.to_vec());
        Ok(())
    }

    fn delete_data(&self, owner: &OwnerId, id: &str) -> Result<bool, Self::Error> {
        Ok(remove(&self.data, owner, id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragments_core::{hash_identity, TypeRegistry};

    fn fragment(owner: &OwnerId, id: &str) -> Fragment {
        Fragment::from_parts(
            fragments_core::FragmentParts {
                id: Some(id.to_owned()),
                owner_id: owner.clone(),
                media_type: "text/plain".into(),
                ..Default::default()
            },
            &TypeRegistry::standard(),
        )
        .unwrap()
    }

    #[test]
    fn metadata_roundtrip_and_delete() {
        let store = EphemeralStorage::new();
        let owner = hash_identity("a@example.com").unwrap();
        let f = fragment(&owner, "one");
        store.write_metadata(&f).unwrap();
        assert_eq!(store.read_metadata(&owner, "one").unwrap(), Some(f));
        assert!(store.delete_metadata(&owner, "one").unwrap());
        assert!(!store.delete_metadata(&owner, "one").unwrap());
        assert_eq!(store.read_metadata(&owner, "one").unwrap(), None);
        assert!(store.metadata.read().is_empty());
    }

    #[test]
    fn data_overwrites_are_idempotent() {
        let store = EphemeralStorage::new();
        let owner = hash_identity("a@example.com").unwrap();
        store.write_data(&owner, "x", b"first").unwrap();
        store.write_data(&owner, "x", b"second").unwrap();
        assert_eq!(store.read_data(&owner, "x").unwrap().as_deref(), Some(&b"second"[..]));
        assert!(store.delete_data(&owner, "x").unwrap());
        assert_eq!(store.read_data(&owner, "x").unwrap(), None);
    }

    #[test]
    fn listing_is_sorted_and_partitioned() {
        let store = EphemeralStorage::new();
        let a = hash_identity("a@example.com").unwrap();
        let b = hash_identity("b@example.com").unwrap();
        for id in ["c", "a", "b"] {
            store.write_metadata(&fragment(&a, id)).unwrap();
        }
        store.write_metadata(&fragment(&b, "z")).unwrap();
        let ids = store.list_metadata(&a, false).unwrap();
        assert_eq!(ids, FragmentListing::Ids(vec!["a".into(), "b".into(), "c".into()]));
        let expanded = store.list_metadata(&b, true).unwrap();
        assert_eq!(expanded.ids(), vec!["z"]);
        assert_eq!(store.metadata.read().len(), 2);
        assert!(store
            .list_metadata(&hash_identity("nobody").unwrap(), false)
            .unwrap()
            .is_empty());
    }
}
