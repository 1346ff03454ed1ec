//! Migration source discovery
//!
//! A migration source is a flat directory of SQL files named
//! `NNN_lowercase_description.sql`. Each file is one migration unit: its name
//! is the filename and its body is the literal SQL to execute.
//!
//! Ordering is purely lexicographic over the filename. The zero-padded
//! sequence prefix is what makes that order match authoring order; nothing
//! here parses it except [`MigrationSource::create`], which needs the next
//! free number.

use super::error::{StoreError, StoreResult};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File extension recognized as a migration unit
pub const MIGRATION_EXTENSION: &str = "sql";

/// Width of the zero-padded sequence prefix for new migrations
const SEQUENCE_WIDTH: usize = 3;

/// One named, immutable schema-change script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    pub name: String,
    pub body: String,
}

/// Directory-backed migration source
#[derive(Debug, Clone)]
pub struct MigrationSource {
    dir: PathBuf,
}

impl MigrationSource {
    /// Create a source reading from the given directory
    ///
    /// The directory is not touched until discovery; a missing directory
    /// discovers as empty.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory this source reads from
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// List every migration name, sorted ascending
    pub fn names(&self) -> StoreResult<Vec<String>> {
        if !self.dir.exists() {
            debug!("migration directory {} does not exist", self.dir.display());
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let path = entry.path();
            if !is_unit_file(&path) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load every migration unit, sorted ascending by name
    pub fn discover(&self) -> StoreResult<Vec<MigrationUnit>> {
        self.names()?
            .into_iter()
            .map(|name| self.read_unit(name))
            .collect()
    }

    /// Load a single migration unit by name
    ///
    /// Only names [`names`](Self::names) would list are loadable; anything
    /// else is [`StoreError::NotFound`].
    pub fn load(&self, name: &str) -> StoreResult<MigrationUnit> {
        if name.is_empty() || name.contains('/') || name.contains('\\') {
            return Err(StoreError::NotFound(name.to_string()));
        }
        let path = self.dir.join(name);
        if !is_unit_file(&path) {
            return Err(StoreError::NotFound(name.to_string()));
        }
        self.read_unit(name.to_string())
    }

    fn read_unit(&self, name: String) -> StoreResult<MigrationUnit> {
        let path = self.dir.join(&name);
        let body = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        Ok(MigrationUnit { name, body })
    }

    /// Next free filename for a migration with the given description
    ///
    /// The sequence number is one greater than the highest numeric prefix
    /// among existing files.
    pub fn next_name(&self, description: &str) -> StoreResult<String> {
        let slug = slugify(description);
        if slug.is_empty() {
            return Err(StoreError::InvalidArgument(format!(
                "migration description '{}' has no usable characters",
                description
            )));
        }

        let highest = self
            .names()?
            .iter()
            .filter_map(|name| sequence_number(name))
            .max()
            .unwrap_or(0);

        Ok(format!(
            "{:0width$}_{}.{}",
            highest + 1,
            slug,
            MIGRATION_EXTENSION,
            width = SEQUENCE_WIDTH
        ))
    }

    /// Write a scaffold file for a new migration and return its path
    pub fn create(&self, description: &str) -> StoreResult<PathBuf> {
        let name = self.next_name(description)?;
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let path = self.dir.join(&name);
        if path.exists() {
            return Err(StoreError::AlreadyExists(path));
        }

        let created = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let body = format!(
            "-- Migration: {}\n\
             -- Created: {}\n\
             --\n\
             -- Runs inside a single transaction. Do not add BEGIN/COMMIT.\n\
             -- Applied migrations are immutable: add a new file to change them.\n\
             \n",
            description.trim(),
            created
        );
        fs::write(&path, body).map_err(|e| StoreError::io(&path, e))?;
        info!("created migration {}", path.display());
        Ok(path)
    }
}

/// Regular file with the migration extension
fn is_unit_file(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(MIGRATION_EXTENSION)
}

/// Lowercase snake-case form of a free-text description
fn slugify(description: &str) -> String {
    let mut slug = String::with_capacity(description.len());
    for c in description.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('_') && !slug.is_empty() {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').to_string()
}

/// Numeric prefix of a migration filename, if it has one
fn sequence_number(name: &str) -> Option<u32> {
    let (prefix, _) = name.split_once('_')?;
    if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    prefix.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = tempdir().unwrap();
        let source = MigrationSource::new(dir.path().join("missing"));
        assert!(source.names().unwrap().is_empty());
        assert!(source.discover().unwrap().is_empty());
    }

    #[test]
    fn test_discover_sorted_and_filtered() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("002_b.sql"), "SELECT 2;").unwrap();
        fs::write(dir.path().join("001_a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("README.md"), "notes").unwrap();
        fs::create_dir(dir.path().join("003_dir.sql")).unwrap();

        let source = MigrationSource::new(dir.path());
        let units = source.discover().unwrap();
        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["001_a.sql", "002_b.sql"]);
        assert_eq!(units[0].body, "SELECT 1;");
    }

    #[test]
    fn test_load_unknown_is_not_found() {
        let dir = tempdir().unwrap();
        let source = MigrationSource::new(dir.path());
        assert!(matches!(
            source.load("001_missing.sql"),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            source.load("../escape.sql"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_load_rejects_names_discovery_skips() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("001_a.sql"), "SELECT 1;").unwrap();
        fs::write(dir.path().join("notes.txt"), "CREATE TABLE rogue (id INTEGER);").unwrap();
        fs::create_dir(dir.path().join("002_dir.sql")).unwrap();

        let source = MigrationSource::new(dir.path());
        assert_eq!(source.names().unwrap(), vec!["001_a.sql"]);
        assert!(source.load("001_a.sql").is_ok());
        assert!(matches!(
            source.load("notes.txt"),
            Err(StoreError::NotFound(name)) if name == "notes.txt"
        ));
        assert!(matches!(
            source.load("002_dir.sql"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Add character notes"), "add_character_notes");
        assert_eq!(slugify("  drop -- legacy   TABLE! "), "drop_legacy_table");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_sequence_number() {
        assert_eq!(sequence_number("007_add_tags.sql"), Some(7));
        assert_eq!(sequence_number("init.sql"), None);
        assert_eq!(sequence_number("v1_init.sql"), None);
    }

    #[test]
    fn test_next_name_and_create() {
        let dir = tempdir().unwrap();
        let source = MigrationSource::new(dir.path().join("migrations"));

        assert_eq!(
            source.next_name("Create characters").unwrap(),
            "001_create_characters.sql"
        );

        let path = source.create("Create characters").unwrap();
        assert!(path.ends_with("001_create_characters.sql"));
        let body = fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("-- Migration: Create characters"));

        fs::write(source.dir().join("010_jump.sql"), "").unwrap();
        assert_eq!(source.next_name("next one").unwrap(), "011_next_one.sql");
    }

    #[test]
    fn test_next_name_rejects_empty_description() {
        let dir = tempdir().unwrap();
        let source = MigrationSource::new(dir.path());
        assert!(matches!(
            source.next_name("  "),
            Err(StoreError::InvalidArgument(_))
        ));
    }
}
