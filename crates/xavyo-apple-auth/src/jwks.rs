//! Apple public key set and the key store used to verify ID tokens.
//!
//! Apple rotates its ID token signing keys without notice. The only signal a
//! client gets is a token whose `kid` it has never seen, so the key store
//! refreshes itself from the key set endpoint when a lookup misses, and
//! retries that lookup exactly once.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::CallContext;
use crate::error::{AppleAuthError, AppleResult};

/// A JSON Web Key as published by Apple (RFC 7517).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type (Apple publishes "RSA").
    pub kty: String,

    /// Key ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,

    /// Public key use (e.g., "sig" for signature).
    #[serde(rename = "use", default, skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// Algorithm (e.g., "RS256").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// RSA modulus (`Base64URL` encoded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA exponent (`Base64URL` encoded).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
}

/// A JSON Web Key Set as defined in RFC 7517.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwkSet {
    /// Array of JWK values.
    pub keys: Vec<Jwk>,
}

/// Whether `alg` is an RSA signature algorithm.
pub(crate) fn is_rsa_algorithm(alg: Algorithm) -> bool {
    matches!(
        alg,
        Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512
    )
}

/// A verified-usable RSA public key from the key set.
#[derive(Clone)]
pub struct PublicKeyEntry {
    kid: String,
    alg: Option<Algorithm>,
    key: DecodingKey,
}

impl PublicKeyEntry {
    /// Build an entry from a JWK.
    ///
    /// # Errors
    ///
    /// Returns `AppleAuthError::KeyParse` naming the kid if the JWK is not a
    /// usable RSA signing key.
    pub fn from_jwk(jwk: &Jwk) -> AppleResult<Self> {
        let kid = jwk.kid.clone().ok_or_else(|| AppleAuthError::KeyParse {
            kid: None,
            reason: "key set entry has no kid".to_string(),
        })?;
        let invalid = |reason: String| AppleAuthError::KeyParse {
            kid: Some(kid.clone()),
            reason,
        };

        if jwk.kty != "RSA" {
            return Err(invalid(format!("unsupported key type '{}'", jwk.kty)));
        }

        let alg = match jwk.alg.as_deref() {
            Some(name) => {
                let alg = Algorithm::from_str(name)
                    .map_err(|_| invalid(format!("unknown algorithm '{name}'")))?;
                if !is_rsa_algorithm(alg) {
                    return Err(invalid(format!("algorithm {name} is not an RSA algorithm")));
                }
                Some(alg)
            }
            None => None,
        };

        let n = jwk
            .n
            .as_deref()
            .ok_or_else(|| invalid("missing modulus (n)".to_string()))?;
        let e = jwk
            .e
            .as_deref()
            .ok_or_else(|| invalid("missing exponent (e)".to_string()))?;

        let modulus = URL_SAFE_NO_PAD
            .decode(n)
            .map_err(|err| invalid(format!("invalid modulus encoding: {err}")))?;
        let exponent = URL_SAFE_NO_PAD
            .decode(e)
            .map_err(|err| invalid(format!("invalid exponent encoding: {err}")))?;
        if modulus.is_empty() || exponent.is_empty() {
            return Err(invalid("empty modulus or exponent".to_string()));
        }

        let key = DecodingKey::from_rsa_raw_components(&modulus, &exponent);

        Ok(Self { kid, alg, key })
    }

    /// Key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Algorithm the key set declares for this key, if any.
    #[must_use]
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.alg
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }
}

impl std::fmt::Debug for PublicKeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublicKeyEntry")
            .field("kid", &self.kid)
            .field("alg", &self.alg)
            .finish_non_exhaustive()
    }
}

/// Where the key store gets a fresh key set from on a lookup miss.
#[async_trait]
pub trait KeySetSource: Send + Sync {
    /// Fetch the current key set.
    async fn fetch_key_set(&self, ctx: &CallContext) -> AppleResult<JwkSet>;
}

/// One installed key set generation.
#[derive(Default)]
struct KeySnapshot {
    generation: u64,
    entries: HashMap<String, Arc<PublicKeyEntry>>,
}

/// Concurrency-safe `kid -> public key` cache.
///
/// The whole map is replaced at once on every update, so readers always see
/// exactly one key set generation. Lookups that miss refresh the map through
/// the store's [`KeySetSource`]. Concurrent misses share a single fetch.
pub struct KeyStore {
    snapshot: RwLock<Arc<KeySnapshot>>,
    refresh_gate: Mutex<()>,
    /// Key sets installed from the source; manual installs do not count.
    fetches: AtomicU64,
    source: Option<Arc<dyn KeySetSource>>,
}

impl KeyStore {
    /// Create an empty key store that refreshes from `source`.
    #[must_use]
    pub fn new(source: Arc<dyn KeySetSource>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(KeySnapshot::default())),
            refresh_gate: Mutex::new(()),
            fetches: AtomicU64::new(0),
            source: Some(source),
        }
    }

    /// Create an empty key store that never refreshes itself.
    ///
    /// Keys must be installed with [`KeyStore::replace_all`]; a miss fails
    /// immediately with `UnknownKey`.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(KeySnapshot::default())),
            refresh_gate: Mutex::new(()),
            fetches: AtomicU64::new(0),
            source: None,
        }
    }

    /// Replace every cached key with the contents of `key_set`.
    ///
    /// All entries are parsed before anything is installed: if any entry is
    /// malformed the previous keys stay in place.
    ///
    /// # Errors
    ///
    /// Returns `AppleAuthError::KeyParse` naming the first malformed entry.
    pub fn replace_all(&self, key_set: &JwkSet) -> AppleResult<()> {
        let mut entries = HashMap::with_capacity(key_set.keys.len());
        for jwk in &key_set.keys {
            let entry = PublicKeyEntry::from_jwk(jwk).map_err(|e| {
                warn!(error = %e, "Rejected Apple public key set");
                e
            })?;
            entries.insert(entry.kid.clone(), Arc::new(entry));
        }

        let key_count = entries.len();
        let generation = {
            let mut current = self.snapshot.write();
            let generation = current.generation + 1;
            *current = Arc::new(KeySnapshot {
                generation,
                entries,
            });
            generation
        };

        info!(key_count, generation, "Apple public key set installed");
        Ok(())
    }

    /// Resolve `kid`, refreshing the key set once if it is not cached.
    ///
    /// # Errors
    ///
    /// - `AppleAuthError::UnknownKey` - the kid is absent even after a refresh
    /// - any key set fetch error from the source, unchanged
    pub async fn lookup(&self, kid: &str, ctx: &CallContext) -> AppleResult<Arc<PublicKeyEntry>> {
        let seen_fetches = self.fetches.load(Ordering::Acquire);
        let seen = self.current();
        if let Some(entry) = seen.entries.get(kid) {
            debug!(kid = %kid, "Apple public key cache hit");
            return Ok(Arc::clone(entry));
        }

        let Some(source) = &self.source else {
            return Err(AppleAuthError::UnknownKey(kid.to_string()));
        };

        info!(
            kid = %kid,
            generation = seen.generation,
            "Apple public key not cached, refreshing key set"
        );
        self.refresh_after(seen_fetches, source.as_ref(), ctx).await?;

        self.get(kid).ok_or_else(|| {
            warn!(kid = %kid, "Apple public key not found after key set refresh");
            AppleAuthError::UnknownKey(kid.to_string())
        })
    }

    /// Fetch and install a new key set unless another caller fetched one
    /// after `seen_fetches` while this caller waited for the gate.
    async fn refresh_after(
        &self,
        seen_fetches: u64,
        source: &dyn KeySetSource,
        ctx: &CallContext,
    ) -> AppleResult<()> {
        let _gate = ctx.run(async { Ok(self.refresh_gate.lock().await) }).await?;

        if self.fetches.load(Ordering::Acquire) != seen_fetches {
            debug!("Apple key set fetched concurrently, skipping fetch");
            return Ok(());
        }

        let key_set = source.fetch_key_set(ctx).await?;
        self.replace_all(&key_set)?;
        self.fetches.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Cached entry for `kid`, without refreshing.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<Arc<PublicKeyEntry>> {
        self.current().entries.get(kid).cloned()
    }

    /// Number of cached keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    /// Whether no keys are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current().entries.is_empty()
    }

    /// Cached key IDs, sorted.
    #[must_use]
    pub fn key_ids(&self) -> Vec<String> {
        let mut kids: Vec<String> = self.current().entries.keys().cloned().collect();
        kids.sort();
        kids
    }

    /// Generation of the installed key set; 0 until the first install.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.current().generation
    }

    fn current(&self) -> Arc<KeySnapshot> {
        Arc::clone(&self.snapshot.read())
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.current();
        f.debug_struct("KeyStore")
            .field("generation", &current.generation)
            .field("key_count", &current.entries.len())
            .field("refreshes", &self.source.is_some())
            .finish()
    }
}
