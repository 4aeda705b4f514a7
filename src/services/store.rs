use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

use crate::core::error::PipelineError;
use crate::core::io::Storage;
use crate::core::paths::{ChapterPaths, ProjectPaths};
use crate::core::state::{
    Chapter, ManualAssignmentMap, Project, Script, StageStatus, SCHEMA_VERSION,
};
use crate::utils::text::slugify;

/// Exclusive access to one project's persisted state for the duration of an
/// invocation's read-modify-write cycle. The lock file is removed on drop,
/// on every exit path, including failure.
struct LockGuard {
    path: String,
}

impl LockGuard {
    fn acquire(path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            std::fs::create_dir_all(parent)?;
        }
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(_) => Ok(Self {
                path: path.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                bail!(
                    "project is locked ({path} exists); another invocation may be running. \
                     Remove the lock file if that invocation crashed."
                )
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Loads and persists the project state document and its per-chapter
/// companion documents. Every save is write-to-temp-then-rename so a crash
/// mid-transition leaves the last confirmed-good state on disk.
pub struct ProjectStateStore {
    storage: Arc<dyn Storage>,
    paths: ProjectPaths,
    project: Project,
    _lock: LockGuard,
}

impl ProjectStateStore {
    /// Open an existing project. Fails with a schema error when the document
    /// does not parse or is from a newer schema than this build understands.
    pub async fn open(storage: Arc<dyn Storage>, base_dir: &str, slug: &str) -> Result<Self> {
        let paths = ProjectPaths::new(base_dir, slug);
        let lock = LockGuard::acquire(&paths.lock_file())?;

        let path = paths.project_file();
        if !storage.exists(&path).await? {
            bail!("no project at {path}; create it first");
        }
        let bytes = storage.read(&path).await?;
        let project: Project =
            serde_json::from_slice(&bytes).map_err(|e| PipelineError::SchemaError {
                document: path.clone(),
                reason: e.to_string(),
            })?;
        if project.schema_version > SCHEMA_VERSION {
            return Err(PipelineError::SchemaError {
                document: path,
                reason: format!(
                    "schema version {} is newer than supported {}",
                    project.schema_version, SCHEMA_VERSION
                ),
            }
            .into());
        }

        Ok(Self {
            storage,
            paths,
            project,
            _lock: lock,
        })
    }

    /// Create a new project document with a planned chapter list.
    pub async fn create(
        storage: Arc<dyn Storage>,
        base_dir: &str,
        title: &str,
        scripture_ref: &str,
        language: &str,
        style_preset: &str,
        chapters: Vec<ChapterPlan>,
    ) -> Result<Self> {
        let slug = slugify(title);
        let paths = ProjectPaths::new(base_dir, &slug);
        let lock = LockGuard::acquire(&paths.lock_file())?;

        let total_target: f64 = chapters.iter().map(|c| c.duration_target_secs).sum();
        let chapters = chapters
            .into_iter()
            .enumerate()
            .map(|(index, plan)| Chapter {
                index,
                slug: plan.slug.unwrap_or_else(|| slugify(&plan.title)),
                title: plan.title,
                key_events: plan.key_events,
                scripture_range: plan.scripture_range,
                duration_target_secs: plan.duration_target_secs,
                status: StageStatus::Uninitialized,
                audio_priority: Default::default(),
            })
            .collect();

        let project = Project {
            schema_version: SCHEMA_VERSION,
            slug: slug.clone(),
            title: title.to_string(),
            scripture_ref: scripture_ref.to_string(),
            language: language.to_string(),
            style_preset: style_preset.to_string(),
            created_at: now_stamp(),
            target_duration_secs: total_target,
            chapters,
            status: "planned".to_string(),
        };

        let store = Self {
            storage,
            paths,
            project,
            _lock: lock,
        };
        store.save().await?;
        log::info!("Project created: {}", store.paths.root());
        Ok(store)
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn paths(&self) -> &ProjectPaths {
        &self.paths
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn chapter(&self, index: usize) -> Result<&Chapter> {
        self.project
            .chapter(index)
            .with_context(|| format!("no chapter {index} in project {}", self.project.slug))
    }

    pub fn chapter_paths(&self, index: usize) -> Result<ChapterPaths> {
        let ch = self.chapter(index)?;
        Ok(self.paths.chapter(ch.index, &ch.slug))
    }

    pub async fn save(&self) -> Result<()> {
        let content = serde_json::to_string_pretty(&self.project)?;
        self.storage
            .write_atomic(&self.paths.project_file(), content.as_bytes())
            .await
    }

    /// Status is always the last thing written for a stage, after its
    /// artifacts, so resume never sees a status ahead of the filesystem.
    pub async fn set_status(&mut self, index: usize, status: StageStatus) -> Result<()> {
        let slug = {
            let ch = self
                .project
                .chapter_mut(index)
                .with_context(|| format!("no chapter {index}"))?;
            ch.status = status;
            ch.slug.clone()
        };
        self.save().await?;
        log::info!("Chapter {index} ({slug}): {}", status.as_str());
        Ok(())
    }

    pub async fn set_project_status(&mut self, status: &str) -> Result<()> {
        self.project.status = status.to_string();
        self.save().await
    }

    pub async fn update_chapter<F>(&mut self, index: usize, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Chapter),
    {
        let ch = self
            .project
            .chapter_mut(index)
            .with_context(|| format!("no chapter {index}"))?;
        mutate(ch);
        self.save().await
    }

    pub async fn script_exists(&self, index: usize) -> Result<bool> {
        let paths = self.chapter_paths(index)?;
        self.storage.exists(&paths.script_file()).await
    }

    /// Load a chapter script, applying the legacy-flag migration. The
    /// migrated form is what every caller sees; disk converges on next save.
    pub async fn load_script(&self, index: usize) -> Result<Script> {
        let paths = self.chapter_paths(index)?;
        let script: Script = self.read_json(&paths.script_file()).await?;
        Ok(script.migrate())
    }

    pub async fn save_script(&self, index: usize, script: &Script) -> Result<()> {
        let paths = self.chapter_paths(index)?;
        self.write_json(&paths.script_file(), script).await
    }

    pub async fn load_manual_map(&self, index: usize) -> Result<ManualAssignmentMap> {
        let paths = self.chapter_paths(index)?;
        let path = paths.manual_map_file();
        if !self.storage.exists(&path).await? {
            return Ok(ManualAssignmentMap::default());
        }
        self.read_json(&path).await
    }

    pub async fn read_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let bytes = self.storage.read(path).await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| {
                PipelineError::SchemaError {
                    document: path.to_string(),
                    reason: e.to_string(),
                }
                .into()
            })
    }

    pub async fn write_json<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        let content = serde_json::to_string_pretty(value)?;
        self.storage.write_atomic(path, content.as_bytes()).await
    }
}

/// Chapter plan entry used at project creation.
pub struct ChapterPlan {
    pub title: String,
    pub slug: Option<String>,
    pub key_events: String,
    pub scripture_range: String,
    pub duration_target_secs: f64,
}

fn now_stamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("{secs}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::io::NativeStorage;

    fn plan(title: &str, target: f64) -> ChapterPlan {
        ChapterPlan {
            title: title.to_string(),
            slug: None,
            key_events: String::new(),
            scripture_range: String::new(),
            duration_target_secs: target,
        }
    }

    #[tokio::test]
    async fn create_then_reopen_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().to_string_lossy().to_string();
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());

        {
            let store = ProjectStateStore::create(
                storage.clone(),
                &base,
                "Test Story",
                "ref 1-3",
                "en",
                "pixar_disney",
                vec![plan("Introduction", 90.0), plan("The Valley", 150.0)],
            )
            .await?;
            assert_eq!(store.project().slug, "test_story");
            assert_eq!(store.project().chapters.len(), 2);
            assert!((store.project().target_duration_secs - 240.0).abs() < 1e-9);
        } // lock released here

        let mut store = ProjectStateStore::open(storage, &base, "test_story").await?;
        assert_eq!(store.chapter(1)?.title, "The Valley");
        store.set_status(1, StageStatus::ScriptGenerated).await?;
        assert_eq!(store.chapter(1)?.status, StageStatus::ScriptGenerated);
        Ok(())
    }

    #[tokio::test]
    async fn second_open_is_refused_while_locked() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().to_string_lossy().to_string();
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());

        let _store = ProjectStateStore::create(
            storage.clone(),
            &base,
            "Locked",
            "",
            "en",
            "",
            vec![plan("One", 60.0)],
        )
        .await?;

        let message = match ProjectStateStore::open(storage, &base, "locked").await {
            Ok(_) => panic!("second open must be refused"),
            Err(e) => e.to_string(),
        };
        assert!(message.contains("locked"));
        Ok(())
    }

    #[tokio::test]
    async fn malformed_project_is_a_schema_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().to_string_lossy().to_string();
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());

        let paths = ProjectPaths::new(&base, "broken");
        storage
            .write(&paths.project_file(), b"{ not json")
            .await?;

        let err = match ProjectStateStore::open(storage, &base, "broken").await {
            Ok(_) => panic!("malformed document must not open"),
            Err(e) => e,
        };
        assert!(err.downcast_ref::<PipelineError>().is_some());
        Ok(())
    }

    #[tokio::test]
    async fn script_load_applies_migration() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().to_string_lossy().to_string();
        let storage: Arc<dyn Storage> = Arc::new(NativeStorage::new());

        let store = ProjectStateStore::create(
            storage.clone(),
            &base,
            "Mig",
            "",
            "en",
            "",
            vec![plan("One", 60.0)],
        )
        .await?;

        let script_path = store.chapter_paths(0)?.script_file();
        storage
            .write(
                &script_path,
                br#"{ "scenes": [ { "index": 1, "narration": "x", "skip_tts": true } ] }"#,
            )
            .await?;

        let script = store.load_script(0).await?;
        assert_eq!(
            script.scenes[0].audio_priority,
            Some(crate::core::state::AudioMode::Original)
        );
        Ok(())
    }
}
