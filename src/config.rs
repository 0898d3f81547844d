//! Configuration loading for dbfxsql.
//!
//! The config file is a TOML document with an `engines` section (one
//! entry per backend kind) and a `relations` list, created with a
//! commented template on first run. Everything is loaded once into an
//! immutable [`Config`] at process start and passed explicitly into the
//! orchestrator and the watch loop.

use anyhow::{bail, Context};
use dbfxsql_core::{Engine, EngineKind, Relation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default config template written on first run.
const TEMPLATE: &str = r#"[engines.dbf]
folderpaths = ["."]
extensions = [".dbf", ".DBF"]

[engines.sqlite]
folderpaths = ["."]
extensions = [".db", ".sqlite3"]
# SQLite reports writes through transient journal files; map those
# events back to the database file before relevance filtering.
temp_rewrites = ["-journal", "-wal"]

[[relations]]
sources = ["users.dbf", "company.db"]
tables = ["", "users"]
fields = [["id", "name"], ["id", "name"]]
priority = "users.dbf"
"#;

/// The loaded engine registry and relation declarations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engines: HashMap<EngineKind, Engine>,
    #[serde(default)]
    pub relations: Vec<Relation>,
}

impl Config {
    /// Platform config file location (`~/.config/dbfxsql/config.toml` on
    /// Linux).
    pub fn default_path() -> anyhow::Result<PathBuf> {
        let base = dirs::config_dir().context("no config directory on this platform")?;
        Ok(base.join("dbfxsql").join("config.toml"))
    }

    /// Load the config from its default location, writing the template
    /// first if no file exists yet.
    pub fn load() -> anyhow::Result<Config> {
        let path = Config::default_path()?;

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {parent:?}"))?;
            }
            std::fs::write(&path, TEMPLATE)
                .with_context(|| format!("failed to write default config to {path:?}"))?;
            tracing::info!("Created default configuration at {path:?}");
        }

        Config::load_from(&path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Config> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {path:?}"))?;
        let config: Config =
            toml::from_str(&raw).with_context(|| format!("invalid config in {path:?}"))?;

        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for relation in &self.relations {
            relation.validate()?;

            for source in &relation.sources {
                if self.engine_for(source).is_none() {
                    bail!("relation source '{source}' matches no configured engine extension");
                }
            }
        }

        Ok(())
    }

    /// Detect the engine owning a filename by its extension.
    pub fn engine_for(&self, filename: &str) -> Option<(EngineKind, &Engine)> {
        let suffix = extension_of(filename)?;

        self.engines
            .iter()
            .find(|(_, engine)| {
                engine
                    .extensions
                    .iter()
                    .any(|ext| ext.eq_ignore_ascii_case(&suffix))
            })
            .map(|(kind, engine)| (*kind, engine))
    }

    /// Resolve a bare filename to its on-disk path under the engine's
    /// first configured folder.
    pub fn resolve_path(&self, filename: &str) -> anyhow::Result<(EngineKind, PathBuf)> {
        let (kind, engine) = self
            .engine_for(filename)
            .with_context(|| format!("no engine configured for '{filename}'"))?;

        let folder = engine
            .folderpaths
            .first()
            .with_context(|| format!("no folderpath configured for engine {kind}"))?;

        Ok((kind, folder.join(filename)))
    }

    /// Union of every engine's watched folders, deduplicated.
    pub fn watched_folders(&self) -> Vec<PathBuf> {
        let mut folders: Vec<PathBuf> = self
            .engines
            .values()
            .flat_map(|engine| engine.folderpaths.iter().cloned())
            .collect();

        folders.sort();
        folders.dedup();
        folders
    }

    /// The startup filename set: sources marked as a relation's priority
    /// that currently exist on disk. An engine with no files yet must not
    /// wipe out data already present on the other side.
    pub fn prioritized_files(&self) -> Vec<String> {
        let mut filenames = Vec::new();

        for relation in &self.relations {
            let Some(priority) = &relation.priority else {
                continue;
            };

            match self.resolve_path(priority) {
                Ok((_, path)) if path.exists() => filenames.push(priority.clone()),
                _ => {}
            }
        }

        filenames
    }
}

fn extension_of(filename: &str) -> Option<String> {
    let suffix = Path::new(filename).extension()?;
    Some(format!(".{}", suffix.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_round_trips() {
        let config: Config = toml::from_str(TEMPLATE).unwrap();
        config.validate().unwrap();

        assert!(config.engines.contains_key(&EngineKind::Dbf));
        assert!(config.engines.contains_key(&EngineKind::Sqlite));
        assert_eq!(config.relations.len(), 1);
        assert_eq!(config.relations[0].priority.as_deref(), Some("users.dbf"));

        let rendered = toml::to_string(&config).unwrap();
        let reparsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(reparsed.relations[0].sources, config.relations[0].sources);
    }

    #[test]
    fn engine_detection_by_extension() {
        let config: Config = toml::from_str(TEMPLATE).unwrap();

        assert_eq!(config.engine_for("users.dbf").unwrap().0, EngineKind::Dbf);
        assert_eq!(config.engine_for("users.DBF").unwrap().0, EngineKind::Dbf);
        assert_eq!(config.engine_for("company.db").unwrap().0, EngineKind::Sqlite);
        assert!(config.engine_for("notes.txt").is_none());
        assert!(config.engine_for("no_extension").is_none());
    }

    #[test]
    fn relation_with_unknown_extension_is_rejected() {
        let broken = TEMPLATE.replace("users.dbf", "users.xyz");
        assert!(toml::from_str::<Config>(&broken)
            .unwrap()
            .validate()
            .is_err());
    }
}
