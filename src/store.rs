use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::error::AppError;
use crate::models::{Project, ProjectPatch};

/// File name of the single project slot, mirroring the storage key the
/// browser build keeps in localStorage.
pub const STORAGE_KEY: &str = "blockstory_project_v1.json";

/// Persistence contract for project records. Two interchangeable
/// implementations exist: the single-slot [`FileStore`] (local device
/// storage model) and the id-keyed [`MemoryStore`] behind the REST API.
/// Call sites only ever see this trait.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// The active project, or `None` on a fresh install. Absence is a
    /// valid, expected state, not an error.
    async fn get(&self) -> Result<Option<Project>, AppError>;

    async fn get_by_id(&self, id: i64) -> Result<Project, AppError>;

    async fn list(&self) -> Result<Vec<Project>, AppError>;

    /// Assigns a fresh id and `createdAt`, leaves every optional section
    /// unset, and makes the new record the active project.
    async fn create(&self, name: &str) -> Result<Project, AppError>;

    /// Shallow-merges `patch` into the stored record and persists the
    /// result. Storage is left untouched when the merge is rejected.
    async fn update(&self, id: i64, patch: ProjectPatch) -> Result<Project, AppError>;

    async fn update_active(&self, patch: ProjectPatch) -> Result<Project, AppError> {
        let current = self.get().await?.ok_or(AppError::NoActiveProject)?;
        self.update(current.id, patch).await
    }
}

fn fresh_id() -> i64 {
    Utc::now().timestamp_millis()
}

/// Id-keyed in-memory store backing the REST surface.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    projects: HashMap<i64, Project>,
    active: Option<i64>,
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn get(&self) -> Result<Option<Project>, AppError> {
        let inner = self.inner.read();
        Ok(inner.active.and_then(|id| inner.projects.get(&id).cloned()))
    }

    async fn get_by_id(&self, id: i64) -> Result<Project, AppError> {
        self.inner
            .read()
            .projects
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found("project", id))
    }

    async fn list(&self) -> Result<Vec<Project>, AppError> {
        let mut projects: Vec<Project> = self.inner.read().projects.values().cloned().collect();
        projects.sort_by_key(|p| p.id);
        Ok(projects)
    }

    async fn create(&self, name: &str) -> Result<Project, AppError> {
        let mut inner = self.inner.write();
        let mut id = fresh_id();
        // Two creates within the same millisecond must not collide.
        while inner.projects.contains_key(&id) {
            id += 1;
        }
        let project = Project::new(id, name);
        inner.projects.insert(id, project.clone());
        inner.active = Some(id);
        Ok(project)
    }

    async fn update(&self, id: i64, patch: ProjectPatch) -> Result<Project, AppError> {
        let mut inner = self.inner.write();
        let existing = inner
            .projects
            .get(&id)
            .ok_or_else(|| AppError::not_found("project", id))?;
        let merged = existing.merged(patch)?;
        inner.projects.insert(id, merged.clone());
        Ok(merged)
    }
}

/// Single-slot store: one JSON document at `<data_dir>/blockstory_project_v1.json`.
/// A missing file is the fresh-install state; every successful write
/// rewrites the document so a restart resumes from the latest state.
/// `create` overwrites whatever was there (single active project).
pub struct FileStore {
    path: PathBuf,
    // Serializes read-modify-write cycles; held across fs awaits.
    write_lock: tokio::sync::Mutex<()>,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        FileStore {
            path: data_dir.into().join(STORAGE_KEY),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_slot(&self) -> Result<Option<Project>, AppError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_slot(&self, project: &Project) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_vec_pretty(project)?).await?;
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for FileStore {
    async fn get(&self) -> Result<Option<Project>, AppError> {
        self.read_slot().await
    }

    async fn get_by_id(&self, id: i64) -> Result<Project, AppError> {
        match self.read_slot().await? {
            Some(p) if p.id == id => Ok(p),
            _ => Err(AppError::not_found("project", id)),
        }
    }

    async fn list(&self) -> Result<Vec<Project>, AppError> {
        Ok(self.read_slot().await?.into_iter().collect())
    }

    async fn create(&self, name: &str) -> Result<Project, AppError> {
        let _guard = self.write_lock.lock().await;
        let project = Project::new(fresh_id(), name);
        self.write_slot(&project).await?;
        Ok(project)
    }

    async fn update(&self, id: i64, patch: ProjectPatch) -> Result<Project, AppError> {
        let _guard = self.write_lock.lock().await;
        let existing = match self.read_slot().await? {
            Some(p) if p.id == id => p,
            _ => return Err(AppError::not_found("project", id)),
        };
        let merged = existing.merged(patch)?;
        self.write_slot(&merged).await?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CharacterRef, ProjectStatus};
    use pretty_assertions::assert_eq;

    fn character_patch() -> ProjectPatch {
        ProjectPatch {
            character_ref: Some(Some(CharacterRef {
                prompt: "knight".into(),
                images: vec!["https://img.example/k.png".into()],
            })),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_then_get_returns_a_draft_with_optionals_unset() {
        let store = MemoryStore::default();
        let created = store.create("Demo").await.unwrap();
        let fetched = store.get().await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert_eq!(fetched.status, ProjectStatus::Draft);
        assert_eq!(fetched.name, "Demo");
        assert!(fetched.character_ref.is_none());
        assert!(fetched.storyboard.is_none());
        assert!(fetched.final_video.is_none());
    }

    #[tokio::test]
    async fn update_without_a_project_fails_and_leaves_storage_unchanged() {
        let store = MemoryStore::default();
        let err = store.update_active(character_patch()).await.unwrap_err();
        assert!(matches!(err, AppError::NoActiveProject));
        assert!(store.get().await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_merges_and_persists() {
        let store = MemoryStore::default();
        let created = store.create("Demo").await.unwrap();
        let updated = store.update(created.id, character_patch()).await.unwrap();
        assert!(updated.character_ref.is_some());
        assert_eq!(store.get_by_id(created.id).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let store = MemoryStore::default();
        store.create("Demo").await.unwrap();
        let err = store.update(999, character_patch()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn rapid_creates_get_distinct_ids() {
        let store = MemoryStore::default();
        let a = store.create("A").await.unwrap();
        let b = store.create("B").await.unwrap();
        assert_ne!(a.id, b.id);
        // The newest create is the active project.
        assert_eq!(store.get().await.unwrap().unwrap().id, b.id);
    }

    #[tokio::test]
    async fn file_store_missing_file_is_fresh_install() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        assert!(store.get().await.unwrap().is_none());
        assert!(matches!(
            store.update_active(character_patch()).await.unwrap_err(),
            AppError::NoActiveProject
        ));
    }

    #[tokio::test]
    async fn file_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let created = {
            let store = FileStore::new(dir.path());
            let created = store.create("Demo").await.unwrap();
            store.update(created.id, character_patch()).await.unwrap()
        };

        // A new store over the same directory sees the latest state.
        let reopened = FileStore::new(dir.path());
        let fetched = reopened.get().await.unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(fetched.character_ref.is_some());
    }

    #[tokio::test]
    async fn file_store_create_overwrites_the_slot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let first = store.create("First").await.unwrap();
        store.update(first.id, character_patch()).await.unwrap();

        let second = store.create("Second").await.unwrap();
        let current = store.get().await.unwrap().unwrap();
        assert_eq!(current.id, second.id);
        assert!(current.character_ref.is_none());
        // The old id is gone with the slot.
        assert!(store.get_by_id(first.id).await.is_err() || first.id == second.id);
    }

    #[tokio::test]
    async fn rejected_merge_leaves_the_slot_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let created = store.create("Demo").await.unwrap();

        let bad = ProjectPatch {
            final_video: Some(Some(crate::models::FinalVideo {
                video_url: "https://vid.example/final.mp4".into(),
                transitions: "Crossfade".into(),
            })),
            ..Default::default()
        };
        assert!(store.update(created.id, bad).await.is_err());
        assert_eq!(store.get().await.unwrap().unwrap(), created);
    }
}
