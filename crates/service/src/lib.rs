//! Async front door for fragment operations.
//!
//! Each call is one unit of work. Storage IO and transcoding are synchronous
//! and may be slow, so they always run on the blocking pool. Updates and
//! deletes of one fragment are serialized through [`locks`].

mod locks;

use std::sync::Arc;

use fragments_convert::{ConversionEngine, ConvertOptions};
use fragments_core::{
    check_body_size, negotiate, CoreError, Fragment, FragmentListing, FragmentStore, MediaType,
    OwnerId, Representation, TypeRegistry, ValidationError, DEFAULT_MAX_BODY_BYTES,
};
use fragments_proto::FragmentInfo;
use locks::FragmentLocks;
use thiserror::Error;
use tokio::task::{spawn_blocking, JoinHandle};
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("blocking task failed: {0}")]
    Join(String),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Core(e) => e.code(),
            ServiceError::Join(_) => "E_INTERNAL",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ServiceError::Core(e) => e.status(),
            ServiceError::Join(_) => 500,
        }
    }
}

impl From<ValidationError> for ServiceError {
    fn from(e: ValidationError) -> Self {
        ServiceError::Core(e.into())
    }
}

#[derive(Clone, Debug)]
pub struct ServiceOptions {
    pub max_body_bytes: usize,
    pub convert: ConvertOptions,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            convert: ConvertOptions::default(),
        }
    }
}

/// Bytes to hand back for a read, and the type they are in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rendered {
    pub media_type: MediaType,
    pub bytes: Vec<u8>,
}

async fn joined<T>(task: JoinHandle<Result<T, CoreError>>) -> Result<T, ServiceError> {
    match task.await {
        Ok(res) => res.map_err(ServiceError::from),
        Err(join_err) => {
            error!(error = %join_err, "spawn_blocking join error");
            Err(ServiceError::Join(join_err.to_string()))
        }
    }
}

pub struct FragmentService<S> {
    store: Arc<S>,
    engine: ConversionEngine,
    registry: Arc<TypeRegistry>,
    locks: Arc<FragmentLocks>,
    options: ServiceOptions,
}

impl<S> Clone for FragmentService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            engine: self.engine.clone(),
            registry: Arc::clone(&self.registry),
            locks: Arc::clone(&self.locks),
            options: self.options.clone(),
        }
    }
}

impl<S> FragmentService<S>
where
    S: FragmentStore + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(store: S, registry: TypeRegistry, options: ServiceOptions) -> Self {
        Self::with_shared_store(Arc::new(store), registry, options)
    }

    #[must_use]
    pub fn with_shared_store(store: Arc<S>, registry: TypeRegistry, options: ServiceOptions) -> Self {
        let registry = Arc::new(registry);
        let engine = ConversionEngine::new(Arc::clone(&registry), options.convert);
        Self {
            store,
            engine,
            registry,
            locks: Arc::default(),
            options,
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&S, &ConversionEngine) -> Result<T, CoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let engine = self.engine.clone();
        joined(spawn_blocking(move || f(store.as_ref(), &engine))).await
    }

    /// Like [`Self::blocking`], holding the lock for `(owner, id)` for the
    /// whole of `f`.
    async fn blocking_exclusive<T, F>(&self, owner: OwnerId, id: String, f: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&S, &ConversionEngine, &OwnerId, &str) -> Result<T, CoreError> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let engine = self.engine.clone();
        let locks = Arc::clone(&self.locks);
        joined(spawn_blocking(move || {
            let _guard = locks.lock(&owner, &id);
            f(store.as_ref(), &engine, &owner, &id)
        }))
        .await
    }

    pub async fn create(
        &self,
        owner: &OwnerId,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<Fragment, ServiceError> {
        check_body_size(self.options.max_body_bytes, body.len())?;
        debug!(owner = %owner, media_type = content_type, bytes = body.len(), "create requested");
        let owner = owner.clone();
        let content_type = content_type.to_owned();
        let fragment = self
            .blocking(move |store, engine| {
                Fragment::create(store, engine, engine.registry(), &owner, &content_type, &body)
            })
            .await?;
        info!(
            fragment_id = fragment.id(),
            owner = %fragment.owner_id(),
            media_type = %fragment.media_type(),
            size = fragment.size(),
            "fragment created"
        );
        Ok(fragment)
    }

    pub async fn list(&self, owner: &OwnerId, expand: bool) -> Result<FragmentListing, ServiceError> {
        let owner = owner.clone();
        let listing = self
            .blocking(move |store, _| Fragment::by_owner(store, &owner, expand))
            .await?;
        debug!(count = listing.len(), expand, "fragments listed");
        Ok(listing)
    }

    pub async fn info(&self, owner: &OwnerId, id: &str) -> Result<FragmentInfo, ServiceError> {
        let owner = owner.clone();
        let id = id.to_owned();
        let fragment = self
            .blocking(move |store, _| Fragment::by_id(store, &owner, &id))
            .await?;
        Ok(FragmentInfo::new(fragment, &self.registry))
    }

    /// Read `<id>` as stored, or `<id>.<ext>` converted to the type the
    /// extension names.
    pub async fn read(&self, owner: &OwnerId, segment: &str) -> Result<Rendered, ServiceError> {
        let negotiated = negotiate(segment, &self.registry)?;
        debug!(
            owner = %owner,
            fragment_id = %negotiated.id,
            representation = ?negotiated.representation,
            "read requested"
        );
        let owner = owner.clone();
        self.blocking(move |store, engine| {
            let fragment = Fragment::by_id(store, &owner, &negotiated.id)?;
            match negotiated.representation {
                Representation::Stored => Ok(Rendered {
                    media_type: fragment.media_type().clone(),
                    bytes: fragment.data(store)?,
                }),
                Representation::As(target) => {
                    let bytes = fragment.convert_data(store, engine, &target)?;
                    Ok(Rendered {
                        media_type: target,
                        bytes,
                    })
                }
            }
        })
        .await
    }

    pub async fn update(
        &self,
        owner: &OwnerId,
        id: &str,
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<Fragment, ServiceError> {
        check_body_size(self.options.max_body_bytes, body.len())?;
        let content_type = content_type.to_owned();
        let fragment = self
            .blocking_exclusive(owner.clone(), id.to_owned(), move |store, engine, owner, id| {
                Fragment::update(store, engine, owner, id, &content_type, &body)
            })
            .await?;
        info!(
            fragment_id = fragment.id(),
            owner = %fragment.owner_id(),
            size = fragment.size(),
            "fragment updated"
        );
        Ok(fragment)
    }

    pub async fn delete(&self, owner: &OwnerId, id: &str) -> Result<(), ServiceError> {
        self.blocking_exclusive(owner.clone(), id.to_owned(), |store, _, owner, id| {
            Fragment::delete(store, owner, id)
        })
        .await?;
        info!(fragment_id = id, owner = %owner, "fragment deleted");
        Ok(())
    }

    /// Conversion targets for a content type. Unknown or unparseable types
    /// are `UnsupportedType`.
    pub fn formats(&self, content_type: &str) -> Result<Vec<String>, ServiceError> {
        let media = MediaType::parse(content_type)
            .ok()
            .filter(|m| self.registry.is_supported_media(m))
            .ok_or_else(|| ValidationError::UnsupportedType(content_type.to_owned()))?;
        Ok(self.registry.formats_for_media(&media).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragments_core::{hash_identity, DataStore};
    use fragments_storage_ephemeral::EphemeralStorage;

    fn service() -> FragmentService<EphemeralStorage> {
        FragmentService::new(
            EphemeralStorage::new(),
            TypeRegistry::standard(),
            ServiceOptions::default(),
        )
    }

    fn owner() -> OwnerId {
        hash_identity("user1@email.com").unwrap()
    }

    #[tokio::test]
    async fn create_then_read_as_stored_and_converted() {
        let svc = service();
        let f = svc
            .create(&owner(), "text/markdown", b"## Title".to_vec())
            .await
            .unwrap();
        assert_eq!(f.size(), 8);

        let raw = svc.read(&owner(), f.id()).await.unwrap();
        assert_eq!(raw.media_type.essence(), "text/markdown");
        assert_eq!(raw.bytes, b"## Title");

        let html = svc.read(&owner(), &format!("{}.html", f.id())).await.unwrap();
        assert_eq!(html.media_type.essence(), "text/html");
        assert!(String::from_utf8(html.bytes).unwrap().contains("<h2>Title</h2>"));
    }

    #[tokio::test]
    async fn read_failures_are_distinct() {
        let svc = service();
        let f = svc
            .create(&owner(), "text/plain", b"hello".to_vec())
            .await
            .unwrap();
        let missing = svc.read(&owner(), "nope").await.unwrap_err();
        assert_eq!(missing.status(), 404);
        let unknown_ext = svc
            .read(&owner(), &format!("{}.nosuchext", f.id()))
            .await
            .unwrap_err();
        assert_eq!(unknown_ext.code(), "E_UNSUPPORTED_REPRESENTATION");
        let no_route = svc
            .read(&owner(), &format!("{}.png", f.id()))
            .await
            .unwrap_err();
        assert_eq!(no_route.code(), "E_UNSUPPORTED_CONVERSION");
        assert_eq!(no_route.status(), 415);
    }

    #[tokio::test]
    async fn create_validation() {
        let svc = service();
        let err = svc.create(&owner(), "video/ogg", b"x".to_vec()).await.unwrap_err();
        assert_eq!(err.status(), 415);
        let err = svc.create(&owner(), "text/plain", Vec::new()).await.unwrap_err();
        assert_eq!(err.code(), "E_EMPTY_DATA");
        let err = svc
            .create(&owner(), "application/json", b"{oops".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E_INVALID_DATA");
        assert!(svc.list(&owner(), false).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_bodies_are_refused() {
        let svc = FragmentService::new(
            EphemeralStorage::new(),
            TypeRegistry::standard(),
            ServiceOptions {
                max_body_bytes: 4,
                ..ServiceOptions::default()
            },
        );
        let err = svc
            .create(&owner(), "text/plain", b"too long".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E_PAYLOAD_TOO_LARGE");
        assert_eq!(err.status(), 413);
    }

    #[tokio::test]
    async fn update_list_info_delete() {
        let svc = service();
        let f = svc
            .create(&owner(), "text/plain", b"v1".to_vec())
            .await
            .unwrap();
        let g = svc
            .update(&owner(), f.id(), "text/plain", b"version two".to_vec())
            .await
            .unwrap();
        assert_eq!(g.size(), 11);
        assert_eq!(g.created(), f.created());

        let err = svc
            .update(&owner(), f.id(), "text/html", b"<p>x</p>".to_vec())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E_IMMUTABLE_FIELD");

        let info = svc.info(&owner(), f.id()).await.unwrap();
        assert_eq!(info.fragment.size(), 11);
        assert_eq!(info.formats, ["text/plain"]);

        let listing = svc.list(&owner(), true).await.unwrap();
        assert_eq!(listing.ids(), vec![f.id()]);

        svc.delete(&owner(), f.id()).await.unwrap();
        assert_eq!(svc.info(&owner(), f.id()).await.unwrap_err().status(), 404);
        assert_eq!(svc.delete(&owner(), f.id()).await.unwrap_err().status(), 404);
    }

    #[tokio::test]
    async fn owners_cannot_see_each_other() {
        let svc = service();
        let other = hash_identity("user2@email.com").unwrap();
        let f = svc
            .create(&owner(), "text/plain", b"private".to_vec())
            .await
            .unwrap();
        assert!(svc.list(&other, false).await.unwrap().is_empty());
        assert_eq!(svc.read(&other, f.id()).await.unwrap_err().status(), 404);
        assert_eq!(svc.delete(&other, f.id()).await.unwrap_err().status(), 404);
        assert!(svc.read(&owner(), f.id()).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_keep_size_and_bytes_paired() {
        let svc = service();
        let f = svc
            .create(&owner(), "text/plain", b"seed".to_vec())
            .await
            .unwrap();
        let mut handles = Vec::new();
        for i in 1..=24 {
            let svc = svc.clone();
            let id = f.id().to_owned();
            handles.push(tokio::spawn(async move {
                svc.update(&owner(), &id, "text/plain", "x".repeat(i).into_bytes())
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        let info = svc.info(&owner(), f.id()).await.unwrap();
        let bytes = svc.read(&owner(), f.id()).await.unwrap().bytes;
        assert_eq!(info.fragment.size(), bytes.len() as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn update_racing_delete_never_resurrects() {
        for _ in 0..16 {
            let svc = service();
            let f = svc
                .create(&owner(), "text/plain", b"seed".to_vec())
                .await
                .unwrap();
            let id = f.id().to_owned();
            let updater = {
                let svc = svc.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    svc.update(&owner(), &id, "text/plain", b"replacement".to_vec())
                        .await
                })
            };
            let deleter = {
                let svc = svc.clone();
                let id = id.clone();
                tokio::spawn(async move { svc.delete(&owner(), &id).await })
            };
            if let Err(e) = updater.await.unwrap() {
                assert_eq!(e.status(), 404);
            }
            deleter.await.unwrap().unwrap();

            assert_eq!(svc.info(&owner(), &id).await.unwrap_err().status(), 404);
            assert_eq!(svc.store().read_data(&owner(), &id).unwrap(), None);
        }
    }

    #[test]
    fn formats_lookup() {
        let svc = service();
        assert_eq!(
            svc.formats("text/markdown; charset=utf-8").unwrap(),
            ["text/markdown", "text/html", "text/plain"]
        );
        assert_eq!(svc.formats("video/ogg").unwrap_err().status(), 415);
        assert_eq!(svc.formats("not a type").unwrap_err().status(), 415);
    }
}
