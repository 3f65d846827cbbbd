use std::borrow::Cow;

use serde::Serialize;

use crate::{
    errors::CoreError,
    identity::OwnerId,
    media::MediaType,
    model::{Fragment, FragmentId},
};

/// Result of listing one owner's fragments.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FragmentListing {
    Ids(Vec<FragmentId>),
    Expanded(Vec<Fragment>),
}

impl FragmentListing {
    pub fn len(&self) -> usize {
        match self {
            FragmentListing::Ids(ids) => ids.len(),
            FragmentListing::Expanded(frags) => frags.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<&str> {
        match self {
            FragmentListing::Ids(ids) => ids.iter().map(String::as_str).collect(),
            FragmentListing::Expanded(frags) => frags.iter().map(Fragment::id).collect(),
        }
    }
}

/// Fragment metadata port. Every call is scoped to one owner; an
/// implementation must never return or mutate another owner's records.
/// No async in core; callers should use spawn_blocking when invoking from
/// async contexts.
pub trait MetadataStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn read_metadata(&self, owner: &OwnerId, id: &str) -> Result<Option<Fragment>, Self::Error>;

    /// Idempotent overwrite keyed by `(fragment.owner_id(), fragment.id())`.
    fn write_metadata(&self, fragment: &Fragment) -> Result<(), Self::Error>;

    fn list_metadata(&self, owner: &OwnerId, expand: bool)
        -> Result<FragmentListing, Self::Error>;

    /// Returns false when nothing was stored under the key.
    fn delete_metadata(&self, owner: &OwnerId, id: &str) -> Result<bool, Self::Error>;
}

/// Fragment data port, keyed the same way as [`MetadataStore`].
pub trait DataStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn read_data(&self, owner: &OwnerId, id: &str) -> Result<Option<Vec<u8>>, Self::Error>;

    /// Idempotent overwrite.
    fn write_data(&self, owner: &OwnerId, id: &str, data: &[u8]) -> Result<(), Self::Error>;

    /// Returns false when nothing was stored under the key.
    fn delete_data(&self, owner: &OwnerId, id: &str) -> Result<bool, Self::Error>;
}

/// A backend providing both halves of fragment storage.
pub trait FragmentStore: MetadataStore + DataStore {}

impl<T: MetadataStore + DataStore + ?Sized> FragmentStore for T {}

/// Conversion engine seam: renders data of one media type as another and
/// prepares data for storage.
pub trait Converter {
    fn can_convert(&self, from: &MediaType, to: &MediaType) -> bool;

    /// Defined only when `can_convert(from, to)`; otherwise fails with
    /// [`CoreError::UnsupportedConversion`].
    fn convert(&self, from: &MediaType, data: &[u8], to: &MediaType)
        -> Result<Vec<u8>, CoreError>;

    /// Write-time pass applied before data is persisted. The returned bytes
    /// are what gets stored and measured.
    fn prepare<'a>(&self, media: &MediaType, data: &'a [u8]) -> Result<Cow<'a, [u8]>, CoreError>;
}
