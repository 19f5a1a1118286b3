//! Migration Source - loading and creating migration files
//!
//! A migrations directory holds one file per migration. The file at position
//! `i` (1-based, in file-name order) must start with `i` zero-padded to four
//! digits: `0001_create_users.sql`, `0002_add_index.sql`, ... Gaps,
//! misordering and subdirectories are configuration errors.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use chrono::Utc;

use crate::error::{MigrationError, MigrationResult};
use super::definitions::MigrationScript;

/// Width of the numeric prefix every migration file name starts with
pub const INDEX_WIDTH: usize = 4;

/// Zero-padded prefix expected for the migration at 1-based `position`
pub fn index_prefix(position: usize) -> String {
    format!("{:0width$}", position, width = INDEX_WIDTH)
}

/// Ordered, dense sequence of migration scripts for one run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet {
    scripts: Vec<MigrationScript>,
}

impl MigrationSet {
    pub fn new(scripts: Vec<MigrationScript>) -> Self {
        Self { scripts }
    }

    /// Build a set from in-memory SQL, naming each script by its index
    pub fn from_sql<I, S>(sql: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scripts = sql
            .into_iter()
            .enumerate()
            .map(|(i, sql)| MigrationScript::new(index_prefix(i + 1), sql))
            .collect();

        Self { scripts }
    }

    /// Load every migration file in `dir`
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> MigrationResult<Self> {
        let dir = dir.as_ref();

        let entries = fs::read_dir(dir).map_err(|e| match e.kind() {
            ErrorKind::NotFound => MigrationError::Configuration(format!(
                "supplied migrations directory does not exist: {}",
                dir.display()
            )),
            _ => MigrationError::Configuration(format!("read migrations dir {}: {}", dir.display(), e)),
        })?;

        let mut entries = entries
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| MigrationError::Configuration(format!("read migrations dir entry: {}", e)))?;
        entries.sort_by_key(|entry| entry.file_name());

        let mut scripts = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let filename = entry.file_name().to_string_lossy().into_owned();

            let file_type = entry
                .file_type()
                .map_err(|e| MigrationError::Configuration(format!("inspect {:?}: {}", filename, e)))?;
            if file_type.is_dir() {
                return Err(MigrationError::Configuration(format!(
                    "want file; got directory {:?}",
                    filename
                )));
            }

            let expected = index_prefix(i + 1);
            if !filename.starts_with(&expected) {
                return Err(MigrationError::Configuration(format!(
                    "want file beginning with {}; got {:?}",
                    expected, filename
                )));
            }

            let sql = fs::read_to_string(entry.path())
                .map_err(|e| MigrationError::Configuration(format!("read migration file {:?}: {}", filename, e)))?;

            scripts.push(MigrationScript::new(filename, sql));
        }

        Ok(Self { scripts })
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Script at 0-based `index`
    pub fn get(&self, index: usize) -> Option<&MigrationScript> {
        self.scripts.get(index)
    }

    /// Scripts from 0-based offset `from` to the end, with their offsets
    pub fn pending_from(&self, from: usize) -> impl Iterator<Item = (usize, &MigrationScript)> {
        self.scripts.iter().enumerate().skip(from)
    }
}

/// Create the next numbered migration file in `dir`
///
/// The directory is created when missing and validated when present, so the
/// new file always lands at the end of a well-formed sequence.
pub fn create_migration_file<P: AsRef<Path>>(dir: P, name: &str) -> MigrationResult<PathBuf> {
    let dir = dir.as_ref();

    let slug = slugify(name);
    if slug.is_empty() {
        return Err(MigrationError::Configuration(format!(
            "migration name {:?} has no usable characters",
            name
        )));
    }

    fs::create_dir_all(dir)
        .map_err(|e| MigrationError::Configuration(format!("create migrations dir {}: {}", dir.display(), e)))?;

    let existing = MigrationSet::from_dir(dir)?;
    let filename = format!("{}_{}.sql", index_prefix(existing.len() + 1), slug);
    let path = dir.join(&filename);

    let template = format!(
        "-- Migration: {}\n-- Created: {}\n\n",
        name.trim(),
        Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
    );

    fs::write(&path, template)
        .map_err(|e| MigrationError::Configuration(format!("write migration file {}: {}", path.display(), e)))?;

    Ok(path)
}

fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect::<String>()
        .split('_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}
