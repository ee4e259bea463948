//! Config schema-version migration
//!
//! When the installed `config.toml` declares an older `schema_version`
//! than the embedded template, missing keys are copied over from the
//! template. Existing values, the user's comments, and formatting are
//! preserved. The result is written atomically (temp file + rename).

use std::path::Path;

use toml_edit::{DocumentMut, Item};
use tracing::{debug, info};

use crate::ConfigError;

/// Compares dotted version strings numerically (`"1.10" > "1.9"`).
pub fn version_lt(installed: &str, template: &str) -> bool {
    let parse = |s: &str| -> Vec<u64> {
        s.split('.')
            .map(|part| part.trim().parse::<u64>().unwrap_or(0))
            .collect()
    };
    parse(installed) < parse(template)
}

fn schema_version(doc: &DocumentMut) -> Option<String> {
    doc.get("schema_version")
        .and_then(Item::as_str)
        .map(str::to_string)
}

/// Copies keys present in `template` but absent in `target`, recursing
/// into tables. Existing values are never touched.
fn merge_missing(target: &mut toml_edit::Table, template: &toml_edit::Table) {
    for (key, template_item) in template.iter() {
        match target.get_mut(key) {
            None => {
                target.insert(key, template_item.clone());
                debug!(key, "migration added missing key from template");
            }
            Some(existing) => {
                if let (Some(existing_table), Some(template_table)) =
                    (existing.as_table_mut(), template_item.as_table())
                {
                    merge_missing(existing_table, template_table);
                }
            }
        }
    }
}

/// Checks versions and migrates the installed config in place.
///
/// Returns whether a migration was applied.
pub fn migrate_if_outdated(config_path: &Path, template_path: &Path) -> Result<bool, ConfigError> {
    if !template_path.exists() {
        return Ok(false);
    }

    let config_text = std::fs::read_to_string(config_path)?;
    let template_text = std::fs::read_to_string(template_path)?;

    let mut config_doc: DocumentMut = config_text
        .parse()
        .map_err(|e: toml_edit::TomlError| ConfigError::Parse(e.to_string()))?;
    let template_doc: DocumentMut = template_text
        .parse()
        .map_err(|e: toml_edit::TomlError| ConfigError::Parse(e.to_string()))?;

    let installed = schema_version(&config_doc).unwrap_or_else(|| "0".to_string());
    let Some(template_version) = schema_version(&template_doc) else {
        return Ok(false);
    };

    if !version_lt(&installed, &template_version) {
        return Ok(false);
    }

    info!(
        installed,
        template = template_version,
        "config schema is outdated, merging missing keys from template"
    );

    merge_missing(config_doc.as_table_mut(), template_doc.as_table());
    config_doc["schema_version"] = toml_edit::value(template_version);

    write_atomic(config_path, &config_doc.to_string())?;
    Ok(true)
}

/// Writes through a sibling temp file and renames over the target.
fn write_atomic(path: &Path, contents: &str) -> Result<(), ConfigError> {
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_compare() {
        assert!(version_lt("1.0", "1.1"));
        assert!(version_lt("1.9", "1.10"));
        assert!(!version_lt("2.0", "1.9"));
        assert!(!version_lt("1.1", "1.1"));
    }

    #[test]
    fn test_migration_preserves_values_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        let template_path = dir.path().join("config-template.toml");

        std::fs::write(
            &config_path,
            "schema_version = \"1.0\"\n\n# my tuned value\n[general]\nplatform_id = \"custom\"\n",
        )
        .unwrap();
        std::fs::write(
            &template_path,
            "schema_version = \"1.1\"\n\n[general]\nplatform_id = \"default\"\nnew_option = true\n",
        )
        .unwrap();

        assert!(migrate_if_outdated(&config_path, &template_path).unwrap());

        let migrated = std::fs::read_to_string(&config_path).unwrap();
        // User value and comment survive; missing key arrives; version bumps.
        assert!(migrated.contains("platform_id = \"custom\""));
        assert!(migrated.contains("# my tuned value"));
        assert!(migrated.contains("new_option = true"));
        assert!(migrated.contains("schema_version = \"1.1\""));
    }

    #[test]
    fn test_up_to_date_config_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        let template_path = dir.path().join("config-template.toml");
        std::fs::write(&config_path, "schema_version = \"1.1\"\n").unwrap();
        std::fs::write(&template_path, "schema_version = \"1.1\"\nextra = 1\n").unwrap();

        assert!(!migrate_if_outdated(&config_path, &template_path).unwrap());
        let text = std::fs::read_to_string(&config_path).unwrap();
        assert!(!text.contains("extra"));
    }
}
