//! Stack stores: in memory, or a directory of JSON manifests.

use async_trait::async_trait;
use stackop_core::registry::KindRegistry;
use stackop_core::stack::{Stack, StackKey, StackStatus};
use stackop_core::store::StackStore;
use stackop_core::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;

/// Store backed by a map, for tests and one-shot runs.
#[derive(Default)]
pub struct MemoryStackStore {
    stacks: RwLock<BTreeMap<StackKey, Stack>>,
}

impl MemoryStackStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, stack: Stack) {
        self.stacks.write().await.insert(stack.key(), stack);
    }
}

#[async_trait]
impl StackStore for MemoryStackStore {
    async fn get(&self, key: &StackKey) -> Result<Stack> {
        self.stacks
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("stack {key}")))
    }

    async fn update_status(&self, key: &StackKey, status: &StackStatus) -> Result<()> {
        let mut stacks = self.stacks.write().await;
        let stack = stacks
            .get_mut(key)
            .ok_or_else(|| Error::NotFound(format!("stack {key}")))?;
        stack.status = Some(status.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StackKey>> {
        Ok(self.stacks.read().await.keys().cloned().collect())
    }
}

/// Store over `<root>/<namespace>/<name>.json` manifests.
///
/// Manifests are decoded through a [`KindRegistry`]; status updates rewrite
/// the manifest in place.
pub struct FileStackStore {
    root: PathBuf,
    registry: KindRegistry,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStackStore {
    pub fn new(root: impl Into<PathBuf>, registry: KindRegistry) -> Self {
        Self {
            root: root.into(),
            registry,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn path(&self, key: &StackKey) -> PathBuf {
        self.root
            .join(&key.namespace)
            .join(format!("{}.json", key.name))
    }

    async fn read(&self, key: &StackKey) -> Result<Stack> {
        let path = self.path(key);
        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("stack {key}")));
            }
            Err(e) => return Err(Error::Io(format!("reading {}: {e}", path.display()))),
        };

        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        let mut stack: Stack = self.registry.decode(value)?;

        // The file location is the identity.
        stack.metadata.namespace = Some(key.namespace.clone());
        stack.metadata.name = Some(key.name.clone());
        Ok(stack)
    }

    async fn write(&self, key: &StackKey, stack: &Stack) -> Result<()> {
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(stack)
            .map_err(|e| Error::Internal(format!("encoding stack {key}: {e}")))?;

        tokio::fs::write(&tmp, text).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "Wrote stack manifest");
        Ok(())
    }
}

#[async_trait]
impl StackStore for FileStackStore {
    async fn get(&self, key: &StackKey) -> Result<Stack> {
        self.read(key).await
    }

    async fn update_status(&self, key: &StackKey, status: &StackStatus) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut stack = self.read(key).await?;
        stack.status = Some(status.clone());
        self.write(key, &stack).await
    }

    async fn list(&self) -> Result<Vec<StackKey>> {
        let mut keys = Vec::new();
        let mut namespaces = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };

        while let Some(ns) = namespaces.next_entry().await? {
            if !ns.file_type().await?.is_dir() {
                continue;
            }
            let namespace = ns.file_name().to_string_lossy().to_string();
            let mut manifests = tokio::fs::read_dir(ns.path()).await?;
            while let Some(entry) = manifests.next_entry().await? {
                if let Some(name) = manifest_name(&entry.path()) {
                    keys.push(StackKey::new(namespace.clone(), name));
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

fn manifest_name(path: &Path) -> Option<String> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem().map(|s| s.to_string_lossy().to_string())
}
