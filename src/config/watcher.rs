//! Mount file watcher for URI map hot reload.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::Dispatch;

use crate::config::loader::{load_properties, ConfigError};
use crate::routing::UriWorkerMap;

/// Watches a mount file and reloads a `UriWorkerMap` when it changes.
pub struct MountWatcher {
    path: PathBuf,
    map: Arc<UriWorkerMap>,
    known_workers: Option<Arc<HashSet<String>>>,
    dispatch: Dispatch,
}

impl MountWatcher {
    pub fn new(path: &Path, map: Arc<UriWorkerMap>) -> Self {
        Self {
            path: path.to_path_buf(),
            map,
            known_workers: None,
            dispatch: tracing::dispatcher::get_default(Dispatch::clone),
        }
    }

    /// Log reload events through `dispatch` instead of the caller's default.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Reject reloads whose rules name a worker outside `workers`.
    pub fn with_known_workers(mut self, workers: impl IntoIterator<Item = String>) -> Self {
        self.known_workers = Some(Arc::new(workers.into_iter().collect()));
        self
    }

    /// Reload from the file right away.
    pub fn reload_now(&self) -> Result<u64, ConfigError> {
        reload_from_file(&self.path, &self.map, self.known_workers.as_deref())
    }

    /// Start watching the file in a background thread.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let path = self.path.clone();
        let map = Arc::clone(&self.map);
        let known = self.known_workers.clone();
        let dispatch = self.dispatch.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                tracing::dispatcher::with_default(&dispatch, || match res {
                    Ok(event) => {
                        if event.kind.is_modify() || event.kind.is_create() {
                            tracing::info!(path = ?path, "Mount file change detected, reloading...");
                            match reload_from_file(&path, &map, known.as_deref()) {
                                Ok(generation) => tracing::info!(generation, "Mount rules reloaded"),
                                Err(e) => {
                                    tracing::error!("Failed to reload mounts: {}. Keeping current rules.", e)
                                }
                            }
                        }
                    }
                    Err(e) => tracing::error!("Watch error: {:?}", e),
                })
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Mount watcher started");
        Ok(watcher)
    }
}

fn reload_from_file(
    path: &Path,
    map: &UriWorkerMap,
    known_workers: Option<&HashSet<String>>,
) -> Result<u64, ConfigError> {
    let props = load_properties(path)?;
    let mounts = props.mounts();
    if let Some(known) = known_workers {
        if let Some(unknown) = mounts.iter().find(|m| !known.contains(m.worker.trim())) {
            return Err(ConfigError::InvalidRule {
                pattern: unknown.pattern.clone(),
                reason: format!("unknown worker {}", unknown.worker),
            });
        }
    }
    map.reload(&mounts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, Write};

    fn write_mounts(file: &mut tempfile::NamedTempFile, text: &str) {
        let f = file.as_file_mut();
        f.set_len(0).unwrap();
        f.rewind().unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f.sync_all().unwrap();
    }

    #[test]
    fn test_reload_now_applies_file() {
        let map = Arc::new(UriWorkerMap::new(&[]).unwrap());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_mounts(&mut file, "/app/*=a\n");

        let watcher = MountWatcher::new(file.path(), Arc::clone(&map));
        assert_eq!(watcher.reload_now().unwrap(), 2);
        assert_eq!(map.resolve_worker("/app/x").as_deref(), Some("a"));
    }

    #[test]
    fn test_bad_file_keeps_current_rules() {
        let map = Arc::new(UriWorkerMap::new(&[]).unwrap());
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write_mounts(&mut file, "/app/*=a\n");
        let watcher = MountWatcher::new(file.path(), Arc::clone(&map))
            .with_known_workers(vec!["a".to_string()]);
        watcher.reload_now().unwrap();

        write_mounts(&mut file, "/app/*=b\n");
        assert!(matches!(watcher.reload_now(), Err(ConfigError::InvalidRule { .. })));

        write_mounts(&mut file, "/app*=a\n");
        assert!(watcher.reload_now().is_err());

        assert_eq!(map.resolve_worker("/app/x").as_deref(), Some("a"));
        assert_eq!(map.generation(), 2);
    }

    #[test]
    fn test_watcher_starts() {
        let map = Arc::new(UriWorkerMap::new(&[]).unwrap());
        let file = tempfile::NamedTempFile::new().unwrap();
        let watcher = MountWatcher::new(file.path(), map).run();
        assert!(watcher.is_ok());
    }
}
