//! Artifact publisher: immutable versioned artifacts plus a "current" pointer.
//!
//! Layout in the object store:
//!
//! ```text
//! {group}/{version}/artifact     immutable, written once by stage()
//! {group}/current/artifact       bytes of the last promoted version
//! {group}/current/VERSION        that version, as decimal text
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fleetgrid_core::{ArtifactVersion, epoch_millis, sha256_hex};
use fleetgrid_state::StateStore;

use crate::error::{DeployError, DeployResult};

/// Key/value blob storage holding artifacts.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> anyhow::Result<()>;
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
}

/// The embedded store doubles as the daemon's object store.
#[async_trait]
impl ObjectStore for StateStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> anyhow::Result<()> {
        Ok(self.put_object(key, bytes)?)
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.get_object(key)?)
    }
}

/// Metadata of a staged artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub group: String,
    pub version: ArtifactVersion,
    pub digest: String,
    pub size: u64,
}

impl Artifact {
    /// Object key of the immutable copy.
    pub fn key(&self) -> String {
        version_key(&self.group, self.version)
    }
}

pub fn version_key(group: &str, version: ArtifactVersion) -> String {
    format!("{group}/{version}/artifact")
}

pub fn current_key(group: &str) -> String {
    format!("{group}/current/artifact")
}

pub fn current_version_key(group: &str) -> String {
    format!("{group}/current/VERSION")
}

/// Writes artifacts and moves the per-group "current" pointer.
pub struct ArtifactPublisher {
    store: Arc<dyn ObjectStore>,
    last_version: AtomicU64,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            last_version: AtomicU64::new(0),
        }
    }

    /// Millisecond timestamp, bumped when the clock has not moved on.
    fn next_version(&self) -> ArtifactVersion {
        let now = epoch_millis();
        let prev = self
            .last_version
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(0);
        ArtifactVersion(now.max(prev + 1))
    }

    /// Write `bytes` under a fresh immutable version key.
    ///
    /// Versions already present in the store (written by an earlier process
    /// whose clock ran ahead) are skipped, never overwritten.
    pub async fn stage(&self, group: &str, bytes: &[u8]) -> DeployResult<Artifact> {
        let version = loop {
            let candidate = self.next_version();
            let key = version_key(group, candidate);
            let taken = self
                .store
                .get(&key)
                .await
                .map_err(|e| DeployError::Artifact(format!("reading {key}: {e:#}")))?;
            if taken.is_none() {
                break candidate;
            }
            debug!(%group, version = %candidate, "version already staged, skipping");
        };
        let artifact = Artifact {
            group: group.to_string(),
            version,
            digest: sha256_hex(bytes),
            size: bytes.len() as u64,
        };
        self.store
            .put(&artifact.key(), bytes)
            .await
            .map_err(|e| DeployError::Artifact(format!("writing {}: {e:#}", artifact.key())))?;
        info!(%group, version = %artifact.version, size = artifact.size, "artifact staged");
        Ok(artifact)
    }

    /// Look up a previously staged version.
    pub async fn describe(&self, group: &str, version: ArtifactVersion) -> DeployResult<Artifact> {
        let bytes = self
            .fetch_version(group, version)
            .await?
            .ok_or_else(|| DeployError::Artifact(format!("{group} version {version} not found")))?;
        Ok(Artifact {
            group: group.to_string(),
            version,
            digest: sha256_hex(&bytes),
            size: bytes.len() as u64,
        })
    }

    /// Copy a staged version to the current key and advance the pointer.
    pub async fn promote(&self, group: &str, version: ArtifactVersion) -> DeployResult<()> {
        let bytes = self
            .fetch_version(group, version)
            .await?
            .ok_or_else(|| DeployError::Artifact(format!("{group} version {version} not found")))?;
        self.store
            .put(&current_key(group), &bytes)
            .await
            .map_err(|e| DeployError::Artifact(format!("writing current artifact: {e:#}")))?;
        self.store
            .put(&current_version_key(group), version.to_string().as_bytes())
            .await
            .map_err(|e| DeployError::Artifact(format!("writing current version: {e:#}")))?;
        info!(%group, %version, "current artifact advanced");
        Ok(())
    }

    /// Stage and promote in one step.
    ///
    /// If staging succeeds but promotion fails, the error is returned and
    /// the versioned artifact stays in place for manual recovery.
    pub async fn publish(&self, group: &str, bytes: &[u8]) -> DeployResult<ArtifactVersion> {
        let artifact = self.stage(group, bytes).await?;
        if let Err(e) = self.promote(group, artifact.version).await {
            warn!(%group, version = %artifact.version, error = %e, "publish left a staged artifact behind");
            return Err(e);
        }
        Ok(artifact.version)
    }

    /// Bytes of the most recently promoted artifact.
    pub async fn fetch_current(&self, group: &str) -> DeployResult<Option<Vec<u8>>> {
        self.store
            .get(&current_key(group))
            .await
            .map_err(|e| DeployError::Artifact(format!("reading current artifact: {e:#}")))
    }

    pub async fn fetch_version(
        &self,
        group: &str,
        version: ArtifactVersion,
    ) -> DeployResult<Option<Vec<u8>>> {
        let key = version_key(group, version);
        self.store
            .get(&key)
            .await
            .map_err(|e| DeployError::Artifact(format!("reading {key}: {e:#}")))
    }

    /// Version the current pointer refers to, if anything was ever promoted.
    pub async fn current_version(&self, group: &str) -> DeployResult<Option<ArtifactVersion>> {
        let raw = self
            .store
            .get(&current_version_key(group))
            .await
            .map_err(|e| DeployError::Artifact(format!("reading current version: {e:#}")))?;
        let Some(raw) = raw else {
            return Ok(None);
        };
        let text = String::from_utf8_lossy(&raw);
        match text.parse::<ArtifactVersion>() {
            Ok(version) => Ok(Some(version)),
            Err(e) => {
                debug!(%group, %text, error = %e, "unreadable current version marker");
                Err(DeployError::Artifact(format!("corrupt current version marker: {text}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FlakyObjectStore;

    fn publisher() -> ArtifactPublisher {
        ArtifactPublisher::new(Arc::new(StateStore::open_in_memory().unwrap()))
    }

    #[tokio::test]
    async fn publish_then_fetch_current_roundtrip() {
        let publisher = publisher();
        let version = publisher.publish("web", b"bundle-v1").await.unwrap();

        assert_eq!(
            publisher.fetch_current("web").await.unwrap(),
            Some(b"bundle-v1".to_vec())
        );
        assert_eq!(publisher.current_version("web").await.unwrap(), Some(version));
        assert_eq!(
            publisher.fetch_version("web", version).await.unwrap(),
            Some(b"bundle-v1".to_vec())
        );
    }

    #[tokio::test]
    async fn versions_strictly_increase() {
        let publisher = publisher();
        let a = publisher.stage("web", b"a").await.unwrap();
        let b = publisher.stage("web", b"b").await.unwrap();
        let c = publisher.stage("api", b"c").await.unwrap();
        assert!(a.version < b.version);
        assert!(b.version < c.version);
    }

    #[tokio::test]
    async fn stage_never_overwrites_an_existing_version() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let publisher = ArtifactPublisher::new(store.clone());

        // Left behind by a process whose clock was a minute ahead.
        let ahead = ArtifactVersion(epoch_millis() + 60_000);
        store.put_object(&version_key("web", ahead), b"older").unwrap();
        publisher.last_version.store(ahead.0 - 1, Ordering::SeqCst);

        let staged = publisher.stage("web", b"newer").await.unwrap();
        assert_eq!(staged.version, ArtifactVersion(ahead.0 + 1));
        assert_eq!(
            publisher.fetch_version("web", ahead).await.unwrap(),
            Some(b"older".to_vec())
        );
        assert_eq!(
            publisher.fetch_version("web", staged.version).await.unwrap(),
            Some(b"newer".to_vec())
        );
    }

    #[tokio::test]
    async fn stage_does_not_move_current() {
        let publisher = publisher();
        let v1 = publisher.publish("web", b"one").await.unwrap();
        let staged = publisher.stage("web", b"two").await.unwrap();

        assert_eq!(publisher.current_version("web").await.unwrap(), Some(v1));
        assert_eq!(publisher.fetch_current("web").await.unwrap(), Some(b"one".to_vec()));

        publisher.promote("web", staged.version).await.unwrap();
        assert_eq!(
            publisher.current_version("web").await.unwrap(),
            Some(staged.version)
        );
        assert_eq!(publisher.fetch_current("web").await.unwrap(), Some(b"two".to_vec()));
    }

    #[tokio::test]
    async fn failed_current_write_keeps_versioned_copy() {
        let store = Arc::new(FlakyObjectStore::failing_on("/current/"));
        let publisher = ArtifactPublisher::new(store.clone());

        let err = publisher.publish("web", b"payload").await.unwrap_err();
        assert!(matches!(err, DeployError::Artifact(_)));

        let keys = store.keys();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("web/") && keys[0].ends_with("/artifact"));
        assert!(publisher.fetch_current("web").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn describe_reports_digest() {
        let publisher = publisher();
        let staged = publisher.stage("web", b"abc").await.unwrap();
        let described = publisher.describe("web", staged.version).await.unwrap();
        assert_eq!(described, staged);
        assert_eq!(
            described.digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );

        let missing = publisher.describe("web", ArtifactVersion(1)).await;
        assert!(matches!(missing, Err(DeployError::Artifact(_))));
    }

    #[tokio::test]
    async fn nothing_published_yet() {
        let publisher = publisher();
        assert!(publisher.fetch_current("web").await.unwrap().is_none());
        assert!(publisher.current_version("web").await.unwrap().is_none());
    }
}
