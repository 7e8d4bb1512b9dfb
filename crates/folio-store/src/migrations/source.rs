//! Migration unit sources
//!
//! A source yields the complete, ordered set of known units. Ordering is
//! byte-wise on the unit name, and duplicate names are rejected so the
//! order is total.

use crate::errors::{invalid_input, io_error, Result};
use chrono::{DateTime, Utc};
use folio_core::MigrationUnit;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// File extension a directory source picks up
pub const UNIT_EXTENSION: &str = "sql";

pub trait UnitSource {
    /// Load every known unit in ascending name order
    fn load(&self) -> Result<Vec<MigrationUnit>>;
}

impl UnitSource for Vec<MigrationUnit> {
    fn load(&self) -> Result<Vec<MigrationUnit>> {
        order_units(self.clone())
    }
}

/// Sort units by name and reject duplicates
pub fn order_units(mut units: Vec<MigrationUnit>) -> Result<Vec<MigrationUnit>> {
    units.sort_by(|a, b| a.name().cmp(b.name()));

    let mut seen = HashSet::new();
    for unit in &units {
        if !seen.insert(unit.name()) {
            return Err(invalid_input(
                "load_units",
                format!("duplicate migration unit name '{}'", unit.name()),
            ));
        }
    }

    Ok(units)
}

/// Units stored as `<name>.sql` files in one directory
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl UnitSource for DirectorySource {
    fn load(&self) -> Result<Vec<MigrationUnit>> {
        let entries =
            std::fs::read_dir(&self.dir).map_err(|e| io_error("load_units", &self.dir, e))?;

        let mut units = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|e| io_error("load_units", &self.dir, e))?
                .path();
            let is_unit = path.is_file()
                && path
                    .extension()
                    .map(|ext| ext == UNIT_EXTENSION)
                    .unwrap_or(false);
            if !is_unit {
                continue;
            }

            let name = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| {
                    invalid_input(
                        "load_units",
                        format!("unit file name is not valid UTF-8: {}", path.display()),
                    )
                })?
                .to_string();
            let content =
                std::fs::read_to_string(&path).map_err(|e| io_error("load_units", &path, e))?;

            units.push(MigrationUnit::new(name, content)?);
        }

        order_units(units)
    }
}

/// Create an empty unit file named `<YYYYMMDDHHMMSS>_<slug>.sql`
///
/// The slug must be lowercase ASCII letters, digits and `_`. Refuses to
/// overwrite an existing file.
pub fn scaffold_unit(dir: &Path, slug: &str, now: DateTime<Utc>) -> Result<PathBuf> {
    let valid_slug = !slug.is_empty()
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if !valid_slug {
        return Err(invalid_input(
            "new_unit",
            format!(
                "slug '{}' must be non-empty lowercase letters, digits or '_'",
                slug
            ),
        ));
    }

    std::fs::create_dir_all(dir).map_err(|e| io_error("new_unit", dir, e))?;

    let name = format!("{}_{}", now.format("%Y%m%d%H%M%S"), slug);
    let path = dir.join(format!("{}.{}", name, UNIT_EXTENSION));
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| io_error("new_unit", &path, e))?;
    writeln!(
        file,
        "-- {}\n-- Applied once, in name order. Prefer IF [NOT] EXISTS guards.\n",
        name
    )
    .map_err(|e| io_error("new_unit", &path, e))?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_core::ExErrorKind;

    fn unit(name: &str) -> MigrationUnit {
        MigrationUnit::new(name, "SELECT 1;").unwrap()
    }

    #[test]
    fn test_order_units_sorts_by_name() {
        let ordered = order_units(vec![
            unit("20240301000000_images"),
            unit("20240101000000_initial_setup"),
            unit("20240115000000_sections"),
        ])
        .unwrap();
        let names: Vec<_> = ordered.iter().map(|u| u.name()).collect();
        assert_eq!(
            names,
            vec![
                "20240101000000_initial_setup",
                "20240115000000_sections",
                "20240301000000_images"
            ]
        );
    }

    #[test]
    fn test_order_units_rejects_duplicates() {
        let err = order_units(vec![unit("0001_init"), unit("0001_init")]).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
        assert!(err.message().contains("0001_init"));
    }

    #[test]
    fn test_scaffold_unit_name_and_collision() {
        let dir = tempfile::TempDir::new().unwrap();
        let now = "2024-05-06T07:08:09Z".parse::<DateTime<Utc>>().unwrap();

        let path = scaffold_unit(dir.path(), "add_blog_posts", now).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "20240506070809_add_blog_posts.sql"
        );

        let err = scaffold_unit(dir.path(), "add_blog_posts", now).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Io);
    }

    #[test]
    fn test_scaffold_unit_rejects_bad_slug() {
        let dir = tempfile::TempDir::new().unwrap();
        for slug in ["", "Add Posts", "../escape", "drop-table"] {
            let err = scaffold_unit(dir.path(), slug, Utc::now()).unwrap_err();
            assert_eq!(err.kind(), ExErrorKind::InvalidInput, "{}", slug);
        }
    }
}
