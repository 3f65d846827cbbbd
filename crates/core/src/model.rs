use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    errors::{CoreError, ValidationError, WriteStage},
    identity::OwnerId,
    media::MediaType,
    registry::TypeRegistry,
    traits::{Converter, DataStore, FragmentListing, FragmentStore, MetadataStore},
    validate::{is_valid_fragment_id, size_from_number, validate_payload},
};

pub type FragmentId = String;

/// Metadata for one stored fragment.
///
/// A `Fragment` is an immutable value: operations that change it return a new
/// value and perform their storage side effect through the ports in
/// [`crate::traits`]. `type` never changes after construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "FragmentRecord")]
pub struct Fragment {
    id: FragmentId,
    owner_id: OwnerId,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    #[serde(rename = "type")]
    media_type: MediaType,
    size: u64,
}

/// Optional inputs for [`Fragment::from_parts`].
#[derive(Clone, Debug, Default)]
pub struct FragmentParts {
    pub id: Option<FragmentId>,
    pub owner_id: OwnerId,
    pub media_type: String,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub size: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FragmentRecord {
    id: String,
    owner_id: String,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    #[serde(rename = "type")]
    media_type: String,
    size: serde_json::Number,
}

impl TryFrom<FragmentRecord> for Fragment {
    type Error = ValidationError;

    fn try_from(r: FragmentRecord) -> Result<Self, Self::Error> {
        let owner_id = OwnerId::from_hashed(r.owner_id);
        if owner_id.is_empty() {
            return Err(ValidationError::InvalidOwner);
        }
        if !is_valid_fragment_id(&r.id) {
            return Err(ValidationError::InvalidData(format!(
                "invalid fragment id: {}",
                r.id
            )));
        }
        let media_type = MediaType::parse(&r.media_type)
            .map_err(|_| ValidationError::UnsupportedType(r.media_type.clone()))?;
        let size = size_from_number(&r.size)?;
        Ok(Self {
            id: r.id,
            owner_id,
            created: r.created,
            updated: r.updated.max(r.created),
            media_type,
            size,
        })
    }
}

fn advance(prev: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().max(prev)
}

impl Fragment {
    pub fn new(
        owner_id: OwnerId,
        media_type: &str,
        registry: &TypeRegistry,
    ) -> Result<Self, ValidationError> {
        Self::from_parts(
            FragmentParts {
                owner_id,
                media_type: media_type.to_owned(),
                ..FragmentParts::default()
            },
            registry,
        )
    }

    pub fn from_parts(parts: FragmentParts, registry: &TypeRegistry) -> Result<Self, ValidationError> {
        if parts.owner_id.is_empty() {
            return Err(ValidationError::InvalidOwner);
        }
        let media_type = MediaType::parse(&parts.media_type)
            .ok()
            .filter(|m| registry.is_supported_media(m))
            .ok_or_else(|| ValidationError::UnsupportedType(parts.media_type.clone()))?;
        let size = match parts.size {
            None => 0,
            Some(n) => u64::try_from(n).map_err(|_| ValidationError::InvalidSize(n.to_string()))?,
        };
        let id = match parts.id {
            Some(id) if is_valid_fragment_id(&id) => id,
            Some(id) => {
                return Err(ValidationError::InvalidData(format!(
                    "invalid fragment id: {id}"
                )))
            }
            None => uuid::Uuid::new_v4().to_string(),
        };
        let now = Utc::now();
        let created = parts.created.unwrap_or(now);
        let updated = parts.updated.unwrap_or(now).max(created);
        Ok(Self {
            id,
            owner_id: parts.owner_id,
            created,
            updated,
            media_type,
            size,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    pub fn updated(&self) -> DateTime<Utc> {
        self.updated
    }

    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    /// Essence of the type, without charset: `text/html; charset=utf-8` gives
    /// `text/html`.
    pub fn mime_type(&self) -> &str {
        self.media_type.essence()
    }

    pub fn is_text(&self) -> bool {
        self.media_type.is_text()
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn formats<'r>(&self, registry: &'r TypeRegistry) -> &'r [String] {
        registry.formats_for_media(&self.media_type)
    }

    /// Same fragment with `size` measured from `data` and `updated` advanced.
    #[must_use]
    pub fn with_data(&self, data: &[u8]) -> Self {
        Self {
            size: data.len() as u64,
            updated: advance(self.updated),
            ..self.clone()
        }
    }

    #[must_use]
    pub fn touched(&self) -> Self {
        Self {
            updated: advance(self.updated),
            ..self.clone()
        }
    }

    pub fn by_owner<S>(store: &S, owner: &OwnerId, expand: bool) -> Result<FragmentListing, CoreError>
    where
        S: MetadataStore + ?Sized,
    {
        let listing = store
            .list_metadata(owner, expand)
            .map_err(CoreError::storage)?;
        Ok(match listing {
            FragmentListing::Expanded(mut frags) => {
                frags.retain(|f| &f.owner_id == owner);
                FragmentListing::Expanded(frags)
            }
            ids => ids,
        })
    }

    pub fn by_id<S>(store: &S, owner: &OwnerId, id: &str) -> Result<Self, CoreError>
    where
        S: MetadataStore + ?Sized,
    {
        match store.read_metadata(owner, id).map_err(CoreError::storage)? {
            Some(f) if &f.owner_id == owner => Ok(f),
            _ => Err(CoreError::NotFound(id.to_owned())),
        }
    }

    /// Remove metadata and data for `(owner, id)`. Metadata is the existence
    /// signal, so it goes first; the fragment is gone once that succeeds.
    /// A failure removing the data afterwards is logged and the bytes are
    /// left unreachable: reporting it would make a retry return `NotFound`.
    pub fn delete<S>(store: &S, owner: &OwnerId, id: &str) -> Result<(), CoreError>
    where
        S: FragmentStore + ?Sized,
    {
        if !store
            .delete_metadata(owner, id)
            .map_err(CoreError::storage)?
        {
            return Err(CoreError::NotFound(id.to_owned()));
        }
        if let Err(e) = store.delete_data(owner, id) {
            warn!(fragment_id = id, owner = %owner, error = %e, "orphaned fragment data left behind");
        }
        Ok(())
    }

    /// Validate, prepare, and store `data` as a new fragment. Data is written
    /// before metadata; if the metadata write fails the data is removed again.
    pub fn create<S, C>(
        store: &S,
        converter: &C,
        registry: &TypeRegistry,
        owner: &OwnerId,
        media_type: &str,
        data: &[u8],
    ) -> Result<Self, CoreError>
    where
        S: FragmentStore + ?Sized,
        C: Converter + ?Sized,
    {
        let fragment = Fragment::new(owner.clone(), media_type, registry)?;
        validate_payload(&fragment.media_type, data)?;
        let prepared = converter.prepare(&fragment.media_type, data)?;
        let fragment = fragment.with_data(&prepared);

        store
            .write_data(owner, &fragment.id, &prepared)
            .map_err(|e| CoreError::Create {
                stage: WriteStage::Data,
                reason: e.to_string(),
            })?;
        if let Err(e) = store.write_metadata(&fragment) {
            let mut reason = e.to_string();
            if let Err(rollback) = store.delete_data(owner, &fragment.id) {
                reason = format!("{reason}; data rollback failed: {rollback}");
            }
            return Err(CoreError::Create {
                stage: WriteStage::Metadata,
                reason,
            });
        }
        Ok(fragment)
    }

    /// Replace the data of an existing fragment. `media_type` must equal the
    /// stored type.
    pub fn update<S, C>(
        store: &S,
        converter: &C,
        owner: &OwnerId,
        id: &str,
        media_type: &str,
        data: &[u8],
    ) -> Result<Self, CoreError>
    where
        S: FragmentStore + ?Sized,
        C: Converter + ?Sized,
    {
        let existing = Self::by_id(store, owner, id)?;
        let requested = MediaType::parse(media_type)
            .map_err(|_| ValidationError::UnsupportedType(media_type.to_owned()))?;
        if requested != existing.media_type {
            return Err(ValidationError::ImmutableFieldViolation {
                field: "type",
                stored: existing.media_type.to_string(),
                requested: requested.to_string(),
            }
            .into());
        }
        existing.set_data(store, converter, data)
    }

    /// Persist the current metadata with `updated` advanced. No data is
    /// written, so `size` of an already stored fragment comes from the
    /// stored record rather than from this value.
    pub fn save<S>(&self, store: &S) -> Result<Self, CoreError>
    where
        S: MetadataStore + ?Sized,
    {
        let existing = self.guard_type(store)?;
        let mut next = self.touched().merged_with(existing.as_ref());
        if let Some(stored) = &existing {
            next.size = stored.size;
        }
        store.write_metadata(&next).map_err(CoreError::storage)?;
        Ok(next)
    }

    /// Store new data and the metadata that describes it. If the metadata
    /// write fails the previous data is put back (or removed, when there was
    /// none), so stored `size` keeps matching the stored bytes.
    pub fn set_data<S, C>(&self, store: &S, converter: &C, data: &[u8]) -> Result<Self, CoreError>
    where
        S: FragmentStore + ?Sized,
        C: Converter + ?Sized,
    {
        validate_payload(&self.media_type, data)?;
        let existing = self.guard_type(store)?;
        let prepared = converter.prepare(&self.media_type, data)?;
        let replacing = existing.is_some();
        let previous = if replacing {
            store
                .read_data(&self.owner_id, &self.id)
                .map_err(CoreError::storage)?
        } else {
            None
        };
        let failed = |stage: WriteStage, reason: String| {
            if replacing {
                CoreError::Update { stage, reason }
            } else {
                CoreError::Create { stage, reason }
            }
        };

        store
            .write_data(&self.owner_id, &self.id, &prepared)
            .map_err(|e| failed(WriteStage::Data, e.to_string()))?;
        let next = self.with_data(&prepared).merged_with(existing.as_ref());
        if let Err(e) = store.write_metadata(&next) {
            let mut reason = e.to_string();
            let restored = match &previous {
                Some(bytes) => store.write_data(&self.owner_id, &self.id, bytes),
                None => store.delete_data(&self.owner_id, &self.id).map(drop),
            };
            if let Err(rollback) = restored {
                reason = format!("{reason}; data rollback failed: {rollback}");
            }
            return Err(failed(WriteStage::Metadata, reason));
        }
        Ok(next)
    }

    /// Stored bytes, unchanged.
    pub fn data<S>(&self, store: &S) -> Result<Vec<u8>, CoreError>
    where
        S: DataStore + ?Sized,
    {
        store
            .read_data(&self.owner_id, &self.id)
            .map_err(CoreError::storage)?
            .ok_or_else(|| CoreError::NotFound(self.id.clone()))
    }

    pub fn convert_data<S, C>(
        &self,
        store: &S,
        converter: &C,
        target: &MediaType,
    ) -> Result<Vec<u8>, CoreError>
    where
        S: DataStore + ?Sized,
        C: Converter + ?Sized,
    {
        if !converter.can_convert(&self.media_type, target) {
            return Err(CoreError::unsupported_conversion(
                self.media_type.essence(),
                target.essence(),
            ));
        }
        let data = self.data(store)?;
        converter.convert(&self.media_type, &data, target)
    }

    fn guard_type<S>(&self, store: &S) -> Result<Option<Fragment>, CoreError>
    where
        S: MetadataStore + ?Sized,
    {
        let existing = store
            .read_metadata(&self.owner_id, &self.id)
            .map_err(CoreError::storage)?;
        if let Some(stored) = &existing {
            if stored.media_type != self.media_type {
                return Err(ValidationError::ImmutableFieldViolation {
                    field: "type",
                    stored: stored.media_type.to_string(),
                    requested: self.media_type.to_string(),
                }
                .into());
            }
        }
        Ok(existing)
    }

    /// Keep the stored `created` and never move `updated` backwards.
    fn merged_with(mut self, existing: Option<&Fragment>) -> Self {
        if let Some(stored) = existing {
            self.created = stored.created;
            self.updated = self.updated.max(stored.updated);
        }
        self
    }
}
