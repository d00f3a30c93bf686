use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::mpsc::channel;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};

use crate::config::Paths;
use crate::error::{ConfigError, SensuError};

/// Receiver for live-reload notifications. The watch loop plugs a real
/// WebSocket hub in here; outside a watch session no sink is attached and
/// every signal is a no-op.
pub trait ReloadSink: Send + Sync {
    /// Ask every connected browser client to refresh.
    fn broadcast(&self);
}

/// Everything an action can see while it runs. Shared immutably between
/// concurrently executing tasks.
pub struct TaskContext<'a> {
    pub paths: &'a Paths,
    reload: Option<&'a dyn ReloadSink>,
}

impl<'a> TaskContext<'a> {
    pub fn new(paths: &'a Paths) -> Self {
        Self {
            paths,
            reload: None,
        }
    }

    pub fn with_reload(paths: &'a Paths, sink: &'a dyn ReloadSink) -> Self {
        Self {
            paths,
            reload: Some(sink),
        }
    }

    /// True while a live-reload session is attached. Lint demotes its
    /// failures to warnings in that state.
    pub fn live(&self) -> bool {
        self.reload.is_some()
    }

    pub fn signal_reload(&self) {
        if let Some(sink) = self.reload {
            sink.broadcast();
        }
    }
}

type Action = Arc<dyn Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync>;

struct TaskNode {
    name: &'static str,
    action: Action,
}

/// Named build tasks arranged in a DAG. Edges point from a prerequisite to
/// the tasks depending on it.
pub struct Registry {
    graph: DiGraph<TaskNode, ()>,
    index: HashMap<&'static str, NodeIndex>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
        }
    }

    /// Register a task under a unique name. Prerequisites must already be
    /// registered, which also keeps the graph acyclic by construction.
    pub fn register<F>(
        &mut self,
        name: &'static str,
        prerequisites: &[&'static str],
        action: F,
    ) -> Result<(), ConfigError>
    where
        F: Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        if self.index.contains_key(name) {
            return Err(ConfigError::DuplicateTask(name.to_string()));
        }

        let node = self.graph.add_node(TaskNode {
            name,
            action: Arc::new(action),
        });

        for &prerequisite in prerequisites {
            let dep = *self.index.get(prerequisite).ok_or_else(|| {
                ConfigError::UnknownPrerequisite {
                    task: name.to_string(),
                    prerequisite: prerequisite.to_string(),
                }
            })?;
            self.graph.add_edge(dep, node, ());
        }

        self.index.insert(name, node);
        Ok(())
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.index.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Run `name` after all of its transitive prerequisites. Every task in
    /// the closure executes exactly once per invocation; independent tasks
    /// run concurrently on the rayon pool. The first action error aborts the
    /// run.
    pub fn run(&self, name: &str, ctx: &TaskContext) -> Result<(), SensuError> {
        let target = *self
            .index
            .get(name)
            .ok_or_else(|| ConfigError::UnknownTask(name.to_string()))?;

        // Toposort primarily to detect cycles before anything runs.
        if let Err(cycle) = petgraph::algo::toposort(&self.graph, None) {
            let name = self.graph[cycle.node_id()].name;
            return Err(ConfigError::Cycle(name.to_string()).into());
        }

        // Ancestor closure of the target, i.e. the subgraph to execute.
        let mut pending = HashSet::new();
        let mut dfs = Dfs::new(Reversed(&self.graph), target);
        while let Some(node) = dfs.next(Reversed(&self.graph)) {
            pending.insert(node);
        }

        self.run_nodes(&pending, ctx)
    }

    /// Dependency-counting scheduler. Tasks are handed to the rayon pool as
    /// soon as every prerequisite inside the closure has completed; the main
    /// thread collects results and unlocks dependents.
    fn run_nodes(
        &self,
        pending: &HashSet<NodeIndex>,
        ctx: &TaskContext,
    ) -> Result<(), SensuError> {
        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        for edge in self.graph.raw_edges() {
            if pending.contains(&edge.source()) && pending.contains(&edge.target()) {
                dependents
                    .entry(edge.source())
                    .or_default()
                    .push(edge.target());
            }
        }

        let mut blockers: HashMap<NodeIndex, usize> = pending
            .iter()
            .map(|&node| {
                let count = self
                    .graph
                    .neighbors_directed(node, Direction::Incoming)
                    .filter(|dep| pending.contains(dep))
                    .count();
                (node, count)
            })
            .collect();

        let total = pending.len();
        let mut completed = 0;
        let mut in_flight = 0;
        let mut failure: Option<SensuError> = None;

        rayon::scope(|scope| {
            let (tx, rx) = channel::<(NodeIndex, anyhow::Result<()>)>();

            let spawn = |node: NodeIndex, in_flight: &mut usize| {
                let task = &self.graph[node];
                let action = task.action.clone();
                let name = task.name;
                let tx = tx.clone();

                *in_flight += 1;
                scope.spawn(move |_| {
                    tracing::debug!(task = name, "running");
                    let result = (action)(ctx);
                    // The receiver outlives the scope, send cannot fail.
                    tx.send((node, result)).unwrap();
                });
            };

            for (&node, &count) in &blockers {
                if count == 0 {
                    spawn(node, &mut in_flight);
                }
            }

            while completed < total && in_flight > 0 {
                // Senders live as long as the spawned closures, recv only
                // fails once all of them are gone.
                let Ok((node, result)) = rx.recv() else {
                    break;
                };

                completed += 1;
                in_flight -= 1;

                if let Err(e) = result {
                    let name = self.graph[node].name;
                    failure.get_or_insert(SensuError::Task(name.to_string(), e));
                    // Drain what is already running, spawn nothing new.
                    continue;
                }

                if failure.is_some() {
                    continue;
                }

                if let Some(unlocked) = dependents.get(&node) {
                    for &next in unlocked {
                        let count = blockers.get_mut(&next).unwrap();
                        *count -= 1;
                        if *count == 0 {
                            spawn(next, &mut in_flight);
                        }
                    }
                }
            }
        });

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn log_action(
        log: &Arc<Mutex<Vec<&'static str>>>,
        name: &'static str,
    ) -> impl Fn(&TaskContext) -> anyhow::Result<()> + Send + Sync + 'static {
        let log = log.clone();
        move |_| {
            log.lock().unwrap().push(name);
            Ok(())
        }
    }

    fn ctx_paths() -> Paths {
        Paths::rooted(".")
    }

    #[test]
    fn test_unknown_task_is_config_error() {
        let registry = Registry::new();
        let paths = ctx_paths();
        let ctx = TaskContext::new(&paths);

        let err = registry.run("nope", &ctx).unwrap_err();
        assert!(matches!(
            err,
            SensuError::Config(ConfigError::UnknownTask(_))
        ));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = Registry::new();
        registry.register("a", &[], |_| Ok(())).unwrap();

        let err = registry.register("a", &[], |_| Ok(())).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateTask(_)));
    }

    #[test]
    fn test_unknown_prerequisite_rejected() {
        let mut registry = Registry::new();

        let err = registry.register("b", &["missing"], |_| Ok(())).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPrerequisite { .. }));
    }

    #[test]
    fn test_prerequisites_run_before_action() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();

        registry.register("leaf", &[], log_action(&log, "leaf")).unwrap();
        registry
            .register("mid", &["leaf"], log_action(&log, "mid"))
            .unwrap();
        registry
            .register("top", &["mid"], log_action(&log, "top"))
            .unwrap();

        let paths = ctx_paths();
        let ctx = TaskContext::new(&paths);
        registry.run("top", &ctx).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(*log, vec!["leaf", "mid", "top"]);
    }

    #[test]
    fn test_shared_prerequisite_runs_exactly_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();

        registry.register("leaf", &[], log_action(&log, "leaf")).unwrap();
        registry
            .register("left", &["leaf"], log_action(&log, "left"))
            .unwrap();
        registry
            .register("right", &["leaf"], log_action(&log, "right"))
            .unwrap();
        registry
            .register("top", &["left", "right"], log_action(&log, "top"))
            .unwrap();

        let paths = ctx_paths();
        let ctx = TaskContext::new(&paths);
        registry.run("top", &ctx).unwrap();

        let log = log.lock().unwrap();
        assert_eq!(log.iter().filter(|n| **n == "leaf").count(), 1);
        assert_eq!(log.first(), Some(&"leaf"));
        assert_eq!(log.last(), Some(&"top"));
        assert_eq!(log.len(), 4);
    }

    #[test]
    fn test_run_only_executes_ancestor_closure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();

        registry.register("a", &[], log_action(&log, "a")).unwrap();
        registry.register("b", &[], log_action(&log, "b")).unwrap();
        registry.register("top", &["a"], log_action(&log, "top")).unwrap();

        let paths = ctx_paths();
        let ctx = TaskContext::new(&paths);
        registry.run("top", &ctx).unwrap();

        let log = log.lock().unwrap();
        assert!(!log.contains(&"b"));
    }

    #[test]
    fn test_failing_prerequisite_blocks_dependent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();

        registry
            .register("bad", &[], |_| anyhow::bail!("boom"))
            .unwrap();
        registry
            .register("top", &["bad"], log_action(&log, "top"))
            .unwrap();

        let paths = ctx_paths();
        let ctx = TaskContext::new(&paths);
        let err = registry.run("top", &ctx).unwrap_err();

        assert!(matches!(err, SensuError::Task(name, _) if name == "bad"));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_live_flag_follows_sink() {
        struct Hub;
        impl ReloadSink for Hub {
            fn broadcast(&self) {}
        }

        let paths = ctx_paths();
        assert!(!TaskContext::new(&paths).live());

        let hub = Hub;
        assert!(TaskContext::with_reload(&paths, &hub).live());
    }
}
