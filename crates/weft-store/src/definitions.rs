use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use weft_core::error::{Result, WeftError};
use weft_core::traits::DefinitionStore;
use weft_core::workflow::WorkflowDefinition;

/// Definitions held in memory, keyed by id.
#[derive(Default)]
pub struct InMemoryDefinitionStore {
    definitions: RwLock<HashMap<String, WorkflowDefinition>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store without going through the async API.
    pub fn with_definitions(definitions: impl IntoIterator<Item = WorkflowDefinition>) -> Result<Self> {
        let mut map = HashMap::new();
        for definition in definitions {
            definition.validate()?;
            map.insert(definition.id.clone(), definition);
        }
        Ok(Self {
            definitions: RwLock::new(map),
        })
    }
}

impl DefinitionStore for InMemoryDefinitionStore {
    fn load(&self, id: &str) -> BoxFuture<'_, Result<WorkflowDefinition>> {
        let id = id.to_string();
        Box::pin(async move {
            self.definitions
                .read()
                .await
                .get(&id)
                .cloned()
                .ok_or(WeftError::WorkflowNotFound(id))
        })
    }

    fn save(&self, definition: WorkflowDefinition) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            definition.validate()?;
            self.definitions
                .write()
                .await
                .insert(definition.id.clone(), definition);
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<WorkflowDefinition>>> {
        Box::pin(async move {
            let mut all: Vec<_> = self.definitions.read().await.values().cloned().collect();
            all.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(all)
        })
    }
}

/// Directory of `<id>.json` files.
pub struct FileDefinitionStore {
    dir: PathBuf,
}

impl FileDefinitionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ids double as file names, so anything that could escape the directory is refused.
    fn path_for(&self, id: &str) -> Option<PathBuf> {
        if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') {
            return None;
        }
        Some(self.dir.join(format!("{}.json", id)))
    }
}

impl DefinitionStore for FileDefinitionStore {
    fn load(&self, id: &str) -> BoxFuture<'_, Result<WorkflowDefinition>> {
        let id = id.to_string();
        Box::pin(async move {
            let path = self
                .path_for(&id)
                .ok_or_else(|| WeftError::WorkflowNotFound(id.clone()))?;
            let content = match tokio::fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(WeftError::WorkflowNotFound(id))
                }
                Err(e) => return Err(e.into()),
            };
            debug!(path = %path.display(), "Loaded workflow definition");
            WorkflowDefinition::from_json(&content)
        })
    }

    fn save(&self, definition: WorkflowDefinition) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            definition.validate()?;
            let path = self.path_for(&definition.id).ok_or_else(|| {
                WeftError::Definition(format!("id '{}' is not a valid file name", definition.id))
            })?;
            tokio::fs::create_dir_all(&self.dir).await?;
            let json = serde_json::to_string_pretty(&definition)?;
            tokio::fs::write(&path, json).await?;
            Ok(())
        })
    }

    fn list(&self) -> BoxFuture<'_, Result<Vec<WorkflowDefinition>>> {
        Box::pin(async move {
            let mut entries = match tokio::fs::read_dir(&self.dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
                Err(e) => return Err(e.into()),
            };

            let mut all = Vec::new();
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let content = tokio::fs::read_to_string(&path).await?;
                match WorkflowDefinition::from_json(&content) {
                    Ok(def) => all.push(def),
                    Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable workflow"),
                }
            }
            all.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(all)
        })
    }
}
