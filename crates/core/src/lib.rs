//! Core domain model, validation, and traits for fragment storage.
//! No async and no IO within this crate.

pub mod errors;
pub mod identity;
pub mod media;
pub mod model;
pub mod negotiate;
pub mod registry;
pub mod traits;
pub mod validate;

pub use crate::errors::{CoreError, ValidationError, WriteStage};
pub use crate::identity::{hash_identity, OwnerId};
pub use crate::media::{MediaType, MediaTypeError};
pub use crate::model::{Fragment, FragmentId, FragmentParts};
pub use crate::negotiate::{negotiate, Negotiated, Representation};
pub use crate::registry::TypeRegistry;
pub use crate::traits::{Converter, DataStore, FragmentListing, FragmentStore, MetadataStore};
pub use crate::validate::{
    check_body_size, is_valid_fragment_id, validate_payload, DEFAULT_MAX_BODY_BYTES,
};
