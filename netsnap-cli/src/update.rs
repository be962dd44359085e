//! `update`: extract, diff against the stored baseline, write the rendered
//! snapshot and a changelog entry, then publish.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use netsnap::store::write_atomic;
use netsnap::{
    Extraction, ExtractOptions, Netsnap, Publication, SnapshotDiffer, SnapshotPublisher,
    SnapshotStore,
};
use tracing::info;

use crate::render::{changelog_entry, render_snapshot};
use crate::settings::Settings;

pub struct Updater {
    dir: PathBuf,
    settings: Settings,
    options: ExtractOptions,
    publisher: SnapshotPublisher,
}

impl Updater {
    pub fn open(dir: &Path, settings: Settings) -> Result<Self> {
        let options = settings.extract_options();
        let publisher = SnapshotPublisher::with_store(
            SnapshotStore::in_project(dir),
            SnapshotDiffer::new(options.epsilon),
        )
        .context("Failed to load the stored baseline")?;
        Ok(Self {
            dir: dir.to_path_buf(),
            settings,
            options,
            publisher,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current published generation, 0 before the first publication.
    pub fn version(&self) -> u64 {
        self.publisher.version()
    }

    /// Read and extract the project. Touches no shared state.
    pub fn extract(dir: &Path, settings: &Settings, options: &ExtractOptions) -> Result<Extraction> {
        let context = settings.project_context(dir)?;
        Netsnap::extract(&context, options)
            .with_context(|| format!("Extraction failed for {}", dir.display()))
    }

    pub fn run(&self, reason: &str) -> Result<Publication> {
        let extraction = Self::extract(&self.dir, &self.settings, &self.options)?;
        self.commit(extraction, reason)
    }

    /// Write the outputs of a finished extraction, then publish it. The
    /// baseline only advances once its changelog entry is on disk.
    pub fn commit(&self, extraction: Extraction, reason: &str) -> Result<Publication> {
        let publication = self.publisher.publish_with(extraction, |pending| {
            self.write_outputs(pending, reason)
        })?;

        info!(
            "generation {}: {} changes, {} warnings",
            publication.snapshot.generation,
            publication.diff.len(),
            publication.warnings.len()
        );
        Ok(publication)
    }

    fn write_outputs(&self, pending: &Publication, reason: &str) -> Result<()> {
        let rendered = render_snapshot(&pending.snapshot, &pending.warnings, self.settings.format)?;
        let output = self.dir.join(&self.settings.output);
        write_atomic(&output, rendered.as_bytes())
            .with_context(|| format!("Failed to write {}", output.display()))?;

        if !pending.diff.is_empty() {
            let changelog = self.dir.join(&self.settings.changelog);
            let entry = changelog_entry(&pending.diff, reason, Local::now());
            append(&changelog, &entry)
                .with_context(|| format!("Failed to append to {}", changelog.display()))?;
        }
        Ok(())
    }
}

fn append(path: &Path, entry: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(entry.as_bytes())
}
