//! Session authentication state backed by the key store and the session snapshot.
//!
//! [`use_auth_state`] loads (or creates) a session's credentials and wires its signal keys to
//! the key store. The protocol layer mutates `creds` in place and calls
//! [`AuthState::save_state`] when it wants them persisted.

pub mod creds;
pub mod keys;

pub use creds::{CredentialCache, CredentialsError, MigrationReport, SnapshotLoad};
pub use keys::{KeyBatch, SignalKeyStore};

use deskcore::creds::Credentials;
use deskcore::keys::KeyCodecRegistry;
use deskcore::store::{Backend, KeyStore, SnapshotStore};
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct AuthState<C> {
    pub creds: Arc<RwLock<C>>,
    pub keys: SignalKeyStore,
    cache: CredentialCache<C>,
    load: SnapshotLoad,
}

impl<C: Credentials> AuthState<C> {
    /// Persists the credentials. See [`CredentialCache::save`].
    pub async fn save_state(&self) -> bool {
        self.cache.save().await
    }

    pub fn load_outcome(&self) -> SnapshotLoad {
        self.load
    }

    pub fn session_id(&self) -> &str {
        self.cache.session_id()
    }
}

pub async fn use_auth_state<C: Credentials>(
    session_id: &str,
    snapshots: Arc<dyn SnapshotStore>,
    keys: Arc<dyn KeyStore>,
    codecs: Arc<KeyCodecRegistry>,
) -> Result<AuthState<C>, CredentialsError> {
    let (cache, load) = CredentialCache::<C>::load(session_id, snapshots, keys.as_ref()).await?;
    Ok(AuthState {
        creds: cache.creds(),
        keys: SignalKeyStore::new(session_id, keys, codecs),
        cache,
        load,
    })
}

/// [`use_auth_state`] over a single backend with the default key codecs.
pub async fn use_backend_auth_state<C, B>(
    session_id: &str,
    backend: Arc<B>,
) -> Result<AuthState<C>, CredentialsError>
where
    C: Credentials,
    B: Backend + 'static,
{
    use_auth_state(
        session_id,
        backend.clone() as Arc<dyn SnapshotStore>,
        backend as Arc<dyn KeyStore>,
        Arc::new(KeyCodecRegistry::default()),
    )
    .await
}
