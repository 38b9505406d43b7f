//! Backup and restore of the user's stations.
//!
//! Both directions are an ordered list of named steps over one
//! `BackupContext`.  A failing step halts the pipeline and names itself in
//! the error.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt};
use openradio_proto::station::Station;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, ServiceError};
use crate::storage::{StationStore, Storage};
use crate::worker::WorkerPool;

const ARCHIVE_FILE: &str = "openradio-backup.json";
const ARCHIVE_VERSION: u32 = 1;

/// Where archives are kept.  Called from the worker pool, so implementations
/// may block.
pub trait BackupTarget: Send + Sync {
    fn write(&self, data: &[u8]) -> Result<()>;
    fn read(&self) -> Result<Vec<u8>>;
}

/// Keeps the archive as a single file in a directory.
pub struct DirectoryTarget {
    dir: PathBuf,
}

impl DirectoryTarget {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self) -> PathBuf {
        self.dir.join(ARCHIVE_FILE)
    }
}

impl BackupTarget for DirectoryTarget {
    fn write(&self, data: &[u8]) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        std::fs::write(self.path(), data)?;
        Ok(())
    }

    fn read(&self) -> Result<Vec<u8>> {
        Ok(std::fs::read(self.path())?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupArchive {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub favorites: Vec<Station>,
    #[serde(default)]
    pub locals: Vec<Station>,
}

impl BackupArchive {
    fn new() -> Self {
        Self {
            version: ARCHIVE_VERSION,
            created_at: Utc::now(),
            favorites: Vec::new(),
            locals: Vec::new(),
        }
    }
}

pub struct BackupContext {
    pub storage: Arc<Storage>,
    pub target: Arc<dyn BackupTarget>,
    pub workers: WorkerPool,
    pub archive: Option<BackupArchive>,
}

impl BackupContext {
    pub fn new(storage: Arc<Storage>, target: Arc<dyn BackupTarget>, workers: WorkerPool) -> Self {
        Self {
            storage,
            target,
            workers,
            archive: None,
        }
    }

    fn archive(&self) -> Result<&BackupArchive> {
        self.archive
            .as_ref()
            .ok_or_else(|| ServiceError::Storage("no archive loaded".to_string()))
    }
}

type StepFn = for<'a> fn(&'a mut BackupContext) -> BoxFuture<'a, Result<()>>;

pub struct BackupStep {
    pub name: &'static str,
    run: StepFn,
}

pub struct Pipeline {
    name: &'static str,
    steps: Vec<BackupStep>,
}

impl Pipeline {
    pub fn backup() -> Self {
        Self {
            name: "backup",
            steps: vec![
                BackupStep {
                    name: "export-favorites",
                    run: export_favorites,
                },
                BackupStep {
                    name: "export-locals",
                    run: export_locals,
                },
                BackupStep {
                    name: "write-archive",
                    run: write_archive,
                },
            ],
        }
    }

    pub fn restore() -> Self {
        Self {
            name: "restore",
            steps: vec![
                BackupStep {
                    name: "read-archive",
                    run: read_archive,
                },
                BackupStep {
                    name: "import-favorites",
                    run: import_favorites,
                },
                BackupStep {
                    name: "import-locals",
                    run: import_locals,
                },
            ],
        }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name).collect()
    }

    pub async fn run(&self, ctx: &mut BackupContext) -> Result<()> {
        info!("{}: {} steps", self.name, self.steps.len());
        for step in &self.steps {
            debug!("{}: {}", self.name, step.name);
            (step.run)(ctx).await.map_err(|e| ServiceError::Backup {
                step: step.name,
                reason: e.to_string(),
            })?;
        }
        info!("{}: done", self.name);
        Ok(())
    }
}

fn export_favorites(ctx: &mut BackupContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let favorites = ctx.storage.favorites.all().await;
        ctx.archive.get_or_insert_with(BackupArchive::new).favorites = favorites;
        Ok(())
    }
    .boxed()
}

fn export_locals(ctx: &mut BackupContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let locals = ctx.storage.locals.all().await;
        ctx.archive.get_or_insert_with(BackupArchive::new).locals = locals;
        Ok(())
    }
    .boxed()
}

fn write_archive(ctx: &mut BackupContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let data = serde_json::to_vec_pretty(ctx.archive()?)?;
        let target = Arc::clone(&ctx.target);
        ctx.workers.run(move || target.write(&data)).await?
    }
    .boxed()
}

fn read_archive(ctx: &mut BackupContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let target = Arc::clone(&ctx.target);
        let data = ctx.workers.run(move || target.read()).await??;
        let archive: BackupArchive = serde_json::from_slice(&data)?;
        info!(
            "restore: archive from {} with {} favorites, {} locals",
            archive.created_at,
            archive.favorites.len(),
            archive.locals.len()
        );
        ctx.archive = Some(archive);
        Ok(())
    }
    .boxed()
}

fn import_favorites(ctx: &mut BackupContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let incoming = ctx.archive()?.favorites.clone();
        merge_into(&ctx.storage.favorites, incoming).await
    }
    .boxed()
}

fn import_locals(ctx: &mut BackupContext) -> BoxFuture<'_, Result<()>> {
    async move {
        let incoming = ctx.archive()?.locals.clone();
        merge_into(&ctx.storage.locals, incoming).await
    }
    .boxed()
}

/// Archived records replace stored ones with the same id; the rest are kept.
async fn merge_into(store: &StationStore, incoming: Vec<Station>) -> Result<()> {
    let mut merged = store.all().await;
    for station in incoming {
        match merged.iter_mut().find(|s| s.id == station.id) {
            Some(existing) => *existing = station,
            None => merged.push(station),
        }
    }
    store.replace_all(merged).await
}
