//! The extension manager
//!
//! Extensions register a factory under their name (the compile-time
//! replacement for directory scanning); `[extensions.<name>]` config
//! gates whether a registered extension actually loads. Setup order is a
//! topological sort of the declared dependencies, computed with Kahn's
//! algorithm after a three-colour DFS has rejected cycles.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use aituber_events::EventBus;

use crate::extension::{Extension, ExtensionInfo};
use crate::ExtensionError;

pub type ExtensionFactory = Box<dyn Fn(Value) -> Arc<dyn Extension> + Send + Sync>;

struct Loaded {
    extension: Arc<dyn Extension>,
    info: ExtensionInfo,
    config: Value,
    providers: Vec<String>,
}

/// Discovers, orders, and drives extensions.
pub struct ExtensionManager {
    event_bus: EventBus,
    factories: SyncMutex<HashMap<String, ExtensionFactory>>,
    loaded: Mutex<HashMap<String, Loaded>>,
    load_order: SyncMutex<Vec<String>>,
}

impl ExtensionManager {
    pub fn new(event_bus: EventBus) -> Self {
        Self {
            event_bus,
            factories: SyncMutex::new(HashMap::new()),
            loaded: Mutex::new(HashMap::new()),
            load_order: SyncMutex::new(Vec::new()),
        }
    }

    /// Registers an extension factory under its name.
    pub fn register_factory<F>(&self, name: &str, factory: F)
    where
        F: Fn(Value) -> Arc<dyn Extension> + Send + Sync + 'static,
    {
        let mut factories = self.factories.lock();
        if factories.contains_key(name) {
            warn!(extension = name, "extension factory already registered, overwriting");
        }
        factories.insert(name.to_string(), Box::new(factory));
        debug!(extension = name, "extension factory registered");
    }

    fn config_for(extensions_config: &Map<String, Value>, name: &str) -> Value {
        extensions_config
            .get(name)
            .cloned()
            .unwrap_or(Value::Object(Map::new()))
    }

    fn is_enabled(config: &Value) -> bool {
        config
            .get("enabled")
            .and_then(Value::as_bool)
            .unwrap_or(true)
    }

    /// Loads every enabled extension in dependency order.
    ///
    /// A cyclic dependency graph fails the whole call before any
    /// `setup()` runs. An individual setup failure only marks that
    /// extension as failed.
    pub async fn load_all(
        &self,
        extensions_config: &Map<String, Value>,
    ) -> Result<HashMap<String, bool>, ExtensionError> {
        let names: Vec<String> = self.factories.lock().keys().cloned().collect();
        let mut results = HashMap::new();
        if names.is_empty() {
            info!("no extensions registered");
            return Ok(results);
        }

        // Probe instances for info and dependencies.
        let mut graph: HashMap<String, Vec<String>> = HashMap::new();
        let mut candidates: HashMap<String, (Arc<dyn Extension>, Value)> = HashMap::new();
        for name in &names {
            let config = Self::config_for(extensions_config, name);
            if !Self::is_enabled(&config) {
                info!(extension = %name, "extension disabled, skipping");
                continue;
            }
            let extension = {
                let factories = self.factories.lock();
                (factories[name])(config.clone())
            };
            let dependencies: Vec<String> = extension
                .dependencies()
                .into_iter()
                .filter(|dep| {
                    let known = names.contains(dep);
                    if !known {
                        warn!(extension = %name, dependency = %dep,
                              "dependency is not a registered extension, ignoring");
                    }
                    known
                })
                .collect();
            graph.insert(name.clone(), dependencies);
            candidates.insert(name.clone(), (extension, config));
        }

        detect_cycle(&graph)?;
        let order = topological_sort(&graph)?;
        info!(order = order.join(" -> "), "extension load order");

        for name in order {
            let (extension, config) = candidates.remove(&name).expect("candidate exists");
            match extension.setup(self.event_bus.clone(), config.clone()).await {
                Ok(providers) => {
                    info!(
                        extension = %name,
                        providers = providers.len(),
                        "extension loaded"
                    );
                    let info = extension.info();
                    self.loaded.lock().await.insert(
                        name.clone(),
                        Loaded {
                            extension,
                            info,
                            config,
                            providers,
                        },
                    );
                    self.load_order.lock().push(name.clone());
                    results.insert(name, true);
                }
                Err(e) => {
                    error!(extension = %name, error = %e, "extension setup failed");
                    results.insert(name, false);
                }
            }
        }

        let ok = results.values().filter(|v| **v).count();
        info!(loaded = ok, total = results.len(), "extension loading finished");
        Ok(results)
    }

    /// Unloads one extension; refuses while loaded dependents remain.
    pub async fn unload(&self, name: &str) -> Result<(), ExtensionError> {
        let mut loaded = self.loaded.lock().await;
        if !loaded.contains_key(name) {
            return Err(ExtensionError::Unknown(name.to_string()));
        }

        let dependents: Vec<String> = loaded
            .iter()
            .filter(|(other, entry)| {
                *other != name && entry.info.dependencies.iter().any(|d| d == name)
            })
            .map(|(other, _)| other.clone())
            .collect();
        if !dependents.is_empty() {
            return Err(ExtensionError::HasDependents {
                name: name.to_string(),
                dependents: dependents.join(", "),
            });
        }

        let entry = loaded.remove(name).expect("checked above");
        drop(loaded);
        entry
            .extension
            .cleanup()
            .await
            .map_err(|e| ExtensionError::Cleanup {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        self.load_order.lock().retain(|n| n != name);
        info!(extension = name, "extension unloaded");
        Ok(())
    }

    /// Unload-then-load with the config from the last successful load.
    pub async fn reload(&self, name: &str) -> Result<(), ExtensionError> {
        let config = {
            let loaded = self.loaded.lock().await;
            loaded
                .get(name)
                .map(|entry| entry.config.clone())
                .ok_or_else(|| ExtensionError::Unknown(name.to_string()))?
        };
        self.unload(name).await?;

        let extension = {
            let factories = self.factories.lock();
            let factory = factories
                .get(name)
                .ok_or_else(|| ExtensionError::Unknown(name.to_string()))?;
            factory(config.clone())
        };
        let providers = extension
            .setup(self.event_bus.clone(), config.clone())
            .await
            .map_err(|e| ExtensionError::Setup {
                name: name.to_string(),
                message: e.to_string(),
            })?;
        let info = extension.info();
        self.loaded.lock().await.insert(
            name.to_string(),
            Loaded {
                extension,
                info,
                config,
                providers,
            },
        );
        self.load_order.lock().push(name.to_string());
        info!(extension = name, "extension reloaded");
        Ok(())
    }

    /// Cleans up every loaded extension in reverse load order.
    pub async fn cleanup_all(&self) {
        let order: Vec<String> = {
            let mut order = self.load_order.lock();
            let snapshot = order.clone();
            order.clear();
            snapshot
        };
        let mut loaded = self.loaded.lock().await;
        for name in order.iter().rev() {
            if let Some(entry) = loaded.remove(name) {
                if let Err(e) = entry.extension.cleanup().await {
                    error!(extension = %name, error = %e, "extension cleanup failed");
                }
            }
        }
        info!("all extensions cleaned up");
    }

    pub async fn loaded_extensions(&self) -> Vec<String> {
        self.load_order.lock().clone()
    }

    pub async fn extension_info(&self, name: &str) -> Option<ExtensionInfo> {
        self.loaded.lock().await.get(name).map(|e| e.info.clone())
    }

    pub async fn providers_of(&self, name: &str) -> Option<Vec<String>> {
        self.loaded
            .lock()
            .await
            .get(name)
            .map(|e| e.providers.clone())
    }
}

/// Three-colour DFS cycle detection over the dependency graph.
fn detect_cycle(graph: &HashMap<String, Vec<String>>) -> Result<(), ExtensionError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Colour {
        White,
        Grey,
        Black,
    }

    fn visit(
        node: &str,
        graph: &HashMap<String, Vec<String>>,
        colours: &mut HashMap<String, Colour>,
    ) -> Result<(), ExtensionError> {
        colours.insert(node.to_string(), Colour::Grey);
        for dep in graph.get(node).into_iter().flatten() {
            match colours.get(dep).copied().unwrap_or(Colour::White) {
                Colour::Grey => {
                    return Err(ExtensionError::CircularDependency(dep.clone()));
                }
                Colour::White => visit(dep, graph, colours)?,
                Colour::Black => {}
            }
        }
        colours.insert(node.to_string(), Colour::Black);
        Ok(())
    }

    let mut colours: HashMap<String, Colour> = HashMap::new();
    for node in graph.keys() {
        if colours.get(node).copied().unwrap_or(Colour::White) == Colour::White {
            visit(node, graph, &mut colours)?;
        }
    }
    Ok(())
}

/// Kahn's algorithm. Dependencies appear strictly before dependents.
fn topological_sort(graph: &HashMap<String, Vec<String>>) -> Result<Vec<String>, ExtensionError> {
    // in_degree counts unmet dependencies per node.
    let mut in_degree: HashMap<&str, usize> = graph
        .iter()
        .map(|(name, deps)| (name.as_str(), deps.len()))
        .collect();
    // Reverse adjacency: dependency -> dependents.
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, deps) in graph {
        for dep in deps {
            dependents.entry(dep.as_str()).or_default().push(name.as_str());
        }
    }

    let mut queue: VecDeque<&str> = {
        let mut roots: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();
        roots.sort_unstable();
        roots.into_iter().collect()
    };

    let mut order = Vec::with_capacity(graph.len());
    let mut seen: HashSet<&str> = HashSet::new();
    while let Some(node) = queue.pop_front() {
        if !seen.insert(node) {
            continue;
        }
        order.push(node.to_string());
        for dependent in dependents.get(node).into_iter().flatten() {
            let degree = in_degree.get_mut(dependent).expect("node in graph");
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() != graph.len() {
        return Err(ExtensionError::DependencyResolution {
            ordered: order.len(),
            total: graph.len(),
        });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct TestExtension {
        name: String,
        dependencies: Vec<String>,
        setup_calls: Arc<SyncMutex<Vec<String>>>,
        cleanup_calls: Arc<SyncMutex<Vec<String>>>,
        fail_setup: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Extension for TestExtension {
        fn info(&self) -> ExtensionInfo {
            ExtensionInfo::new(self.name.clone(), "1.0.0")
                .with_dependencies(self.dependencies.clone())
        }

        async fn setup(
            &self,
            _event_bus: EventBus,
            _config: Value,
        ) -> Result<Vec<String>, ExtensionError> {
            if self.fail_setup.load(Ordering::SeqCst) {
                return Err(ExtensionError::Setup {
                    name: self.name.clone(),
                    message: "boom".into(),
                });
            }
            self.setup_calls.lock().push(self.name.clone());
            Ok(vec![format!("{}_provider", self.name)])
        }

        async fn cleanup(&self) -> Result<(), ExtensionError> {
            self.cleanup_calls.lock().push(self.name.clone());
            Ok(())
        }
    }

    struct Harness {
        manager: ExtensionManager,
        setup_calls: Arc<SyncMutex<Vec<String>>>,
        cleanup_calls: Arc<SyncMutex<Vec<String>>>,
    }

    fn harness(extensions: &[(&str, &[&str])]) -> Harness {
        let manager = ExtensionManager::new(EventBus::new());
        let setup_calls = Arc::new(SyncMutex::new(Vec::new()));
        let cleanup_calls = Arc::new(SyncMutex::new(Vec::new()));

        for (name, deps) in extensions {
            let name = name.to_string();
            let deps: Vec<String> = deps.iter().map(|d| d.to_string()).collect();
            let setup_calls = Arc::clone(&setup_calls);
            let cleanup_calls = Arc::clone(&cleanup_calls);
            manager.register_factory(&name.clone(), move |_config| {
                Arc::new(TestExtension {
                    name: name.clone(),
                    dependencies: deps.clone(),
                    setup_calls: Arc::clone(&setup_calls),
                    cleanup_calls: Arc::clone(&cleanup_calls),
                    fail_setup: Arc::new(AtomicBool::new(false)),
                })
            });
        }

        Harness {
            manager,
            setup_calls,
            cleanup_calls,
        }
    }

    #[tokio::test]
    async fn test_dependency_order_respected() {
        let h = harness(&[("tts", &[]), ("avatar", &["tts"]), ("overlay", &["avatar"])]);
        let results = h.manager.load_all(&Map::new()).await.unwrap();
        assert!(results.values().all(|ok| *ok));

        let calls = h.setup_calls.lock().clone();
        let position =
            |name: &str| calls.iter().position(|n| n == name).expect("was set up");
        assert!(position("tts") < position("avatar"));
        assert!(position("avatar") < position("overlay"));
    }

    #[tokio::test]
    async fn test_cycle_loads_nothing() {
        let h = harness(&[("a", &["b"]), ("b", &["a"])]);
        let err = h.manager.load_all(&Map::new()).await.unwrap_err();
        assert!(matches!(err, ExtensionError::CircularDependency(_)));
        // Neither setup ran.
        assert!(h.setup_calls.lock().is_empty());
        assert!(h.manager.loaded_extensions().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_extension_skipped() {
        let h = harness(&[("a", &[]), ("b", &[])]);
        let config: Map<String, Value> = serde_json::json!({"b": {"enabled": false}})
            .as_object()
            .cloned()
            .unwrap();
        let results = h.manager.load_all(&config).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results["a"]);
        assert_eq!(h.setup_calls.lock().as_slice(), ["a"]);
    }

    #[tokio::test]
    async fn test_unload_refuses_with_dependents() {
        let h = harness(&[("base", &[]), ("addon", &["base"])]);
        h.manager.load_all(&Map::new()).await.unwrap();

        let err = h.manager.unload("base").await.unwrap_err();
        assert!(matches!(err, ExtensionError::HasDependents { .. }));

        // Dependent first, then the base unloads fine.
        h.manager.unload("addon").await.unwrap();
        h.manager.unload("base").await.unwrap();
        assert!(h.manager.loaded_extensions().await.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_all_reverse_order() {
        let h = harness(&[("tts", &[]), ("avatar", &["tts"])]);
        h.manager.load_all(&Map::new()).await.unwrap();
        h.manager.cleanup_all().await;

        assert_eq!(h.cleanup_calls.lock().as_slice(), ["avatar", "tts"]);
    }

    #[tokio::test]
    async fn test_reload_keeps_config() {
        let h = harness(&[("solo", &[])]);
        let config: Map<String, Value> = serde_json::json!({"solo": {"knob": 7}})
            .as_object()
            .cloned()
            .unwrap();
        h.manager.load_all(&config).await.unwrap();
        h.manager.reload("solo").await.unwrap();

        assert_eq!(h.setup_calls.lock().len(), 2);
        assert_eq!(h.cleanup_calls.lock().len(), 1);
        assert_eq!(h.manager.loaded_extensions().await, vec!["solo"]);
    }

    #[test]
    fn test_topological_sort_properties() {
        let mut graph = HashMap::new();
        graph.insert("c".to_string(), vec!["b".to_string()]);
        graph.insert("b".to_string(), vec!["a".to_string()]);
        graph.insert("a".to_string(), Vec::new());
        graph.insert("d".to_string(), vec!["a".to_string()]);

        let order = topological_sort(&graph).unwrap();
        assert_eq!(order.len(), 4);
        let position = |name: &str| order.iter().position(|n| n == name).unwrap();
        assert!(position("a") < position("b"));
        assert!(position("b") < position("c"));
        assert!(position("a") < position("d"));
    }
}
