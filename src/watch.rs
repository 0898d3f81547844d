//! Continuous synchronization: filesystem events → migration passes.
//!
//! A single watcher subscribes to the union of every engine's configured
//! folders and feeds raw events into a channel. The handler keeps only
//! content modifications, rewrites transient driver artifacts back to
//! their data filename, filters to paths a configured engine owns, and
//! re-invokes the orchestrator with the surviving bare filenames.
//!
//! Exactly one migration batch is ever in flight: the loop runs each
//! batch to completion before awaiting the next event, and an interrupt
//! lands between batches, never mid-batch.

use crate::config::Config;
use crate::sync;
use anyhow::Context;
use notify::event::ModifyKind;
use notify::{EventKind, RecursiveMode, Watcher};
use std::path::Path;

/// Watch the configured folders and re-migrate on every relevant change
/// until interrupted.
pub async fn run(config: &Config, notify_operations: bool) -> anyhow::Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Event>();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        if let Ok(event) = result {
            let _ = tx.send(event);
        }
    })
    .context("failed to initialize the filesystem watcher")?;

    for folder in config.watched_folders() {
        if !folder.is_dir() {
            tracing::warn!("configured folder {folder:?} does not exist, skipping");
            continue;
        }

        watcher
            .watch(&folder, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {folder:?}"))?;
        tracing::info!("watching {folder:?}");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupt received, stopping watch loop");
                return Ok(());
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    return Ok(());
                };

                // Drain whatever queued up behind this event so one burst
                // of driver writes becomes one migration batch.
                let mut events = vec![event];
                while let Ok(more) = rx.try_recv() {
                    events.push(more);
                }

                let filenames = relevant_filenames(config, &events);
                if filenames.is_empty() {
                    continue;
                }

                tracing::debug!("change detected in {filenames:?}");

                if let Err(error) = sync::migrate(config, &filenames, notify_operations, true).await {
                    tracing::error!("migration pass failed: {error:#}");
                }
            }
        }
    }
}

/// Reduce a batch of raw events to the bare filenames that should drive
/// a migration pass.
fn relevant_filenames(config: &Config, events: &[notify::Event]) -> Vec<String> {
    let mut filenames = Vec::new();

    for event in events {
        // Creation and deletion of watched files is not itself a
        // trigger; only content modification is.
        if !is_content_modification(&event.kind) {
            continue;
        }

        for path in &event.paths {
            let Some(filename) = resolve_filename(config, path) else {
                continue;
            };

            let declared = config
                .relations
                .iter()
                .any(|relation| relation.involves(&filename));

            if declared && !filenames.contains(&filename) {
                filenames.push(filename);
            }
        }
    }

    filenames
}

fn is_content_modification(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Any)
    )
}

/// Map an event path to the bare data filename it concerns, or `None`
/// when no configured engine owns it.
fn resolve_filename(config: &Config, path: &Path) -> Option<String> {
    let folder = path.parent()?;
    let name = rewrite_temp_suffix(config, path.file_name()?.to_str()?);

    for engine in config.engines.values() {
        let owns_extension = engine
            .extensions
            .iter()
            .any(|extension| name.to_lowercase().ends_with(&extension.to_lowercase()));

        if !owns_extension {
            continue;
        }

        let owns_folder = engine.folderpaths.iter().any(|configured| {
            same_folder(configured, folder)
        });

        if owns_folder {
            return Some(name);
        }
    }

    None
}

/// Translate a transient driver artifact name (`users.db-journal`) back
/// to the data filename it belongs to (`users.db`).
fn rewrite_temp_suffix(config: &Config, name: &str) -> String {
    for engine in config.engines.values() {
        for suffix in &engine.temp_rewrites {
            let Some(stem) = name.strip_suffix(suffix.as_str()) else {
                continue;
            };

            let keeps_extension = engine
                .extensions
                .iter()
                .any(|extension| stem.to_lowercase().ends_with(&extension.to_lowercase()));

            if keeps_extension {
                return stem.to_string();
            }

            if let Some(extension) = engine.extensions.first() {
                return format!("{stem}{extension}");
            }
        }
    }

    name.to_string()
}

fn same_folder(configured: &Path, actual: &Path) -> bool {
    match (configured.canonicalize(), actual.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => configured == actual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbfxsql_core::{Engine, EngineKind, Relation};
    use notify::event::{DataChange, ModifyKind};
    use std::collections::HashMap;

    fn config(folder: &Path) -> Config {
        let engines = HashMap::from([
            (
                EngineKind::Dbf,
                Engine {
                    folderpaths: vec![folder.to_path_buf()],
                    extensions: vec![".dbf".into()],
                    credentials: None,
                    temp_rewrites: vec![],
                },
            ),
            (
                EngineKind::Sqlite,
                Engine {
                    folderpaths: vec![folder.to_path_buf()],
                    extensions: vec![".db".into()],
                    credentials: None,
                    temp_rewrites: vec!["-journal".into(), "-wal".into()],
                },
            ),
        ]);

        let relations = vec![Relation {
            sources: vec!["users.dbf".into(), "company.db".into()],
            tables: vec!["".into(), "users".into()],
            fields: vec![vec!["id".into()], vec!["id".into()]],
            priority: None,
        }];

        Config { engines, relations }
    }

    fn modification(paths: Vec<std::path::PathBuf>) -> notify::Event {
        notify::Event {
            kind: EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            paths,
            attrs: Default::default(),
        }
    }

    #[test]
    fn journal_suffix_rewrites_to_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        assert_eq!(
            rewrite_temp_suffix(&config, "company.db-journal"),
            "company.db"
        );
        assert_eq!(rewrite_temp_suffix(&config, "company.db"), "company.db");
        assert_eq!(rewrite_temp_suffix(&config, "notes.txt"), "notes.txt");
    }

    #[test]
    fn only_declared_sources_survive_filtering() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let events = vec![modification(vec![
            dir.path().join("users.dbf"),
            dir.path().join("company.db-journal"),
            dir.path().join("stray.db"),
            dir.path().join("notes.txt"),
        ])];

        assert_eq!(
            relevant_filenames(&config, &events),
            vec!["users.dbf".to_string(), "company.db".to_string()]
        );
    }

    #[test]
    fn creation_and_removal_do_not_trigger() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let events = vec![
            notify::Event {
                kind: EventKind::Create(notify::event::CreateKind::File),
                paths: vec![dir.path().join("users.dbf")],
                attrs: Default::default(),
            },
            notify::Event {
                kind: EventKind::Remove(notify::event::RemoveKind::File),
                paths: vec![dir.path().join("users.dbf")],
                attrs: Default::default(),
            },
        ];

        assert!(relevant_filenames(&config, &events).is_empty());
    }

    #[test]
    fn paths_outside_configured_folders_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let events = vec![modification(vec![elsewhere.path().join("users.dbf")])];

        assert!(relevant_filenames(&config, &events).is_empty());
    }
}
