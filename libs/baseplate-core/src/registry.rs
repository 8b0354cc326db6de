//! Static module discovery, layering, and dependency resolution.
//!
//! Modules declare themselves at link time with [`inventory::submit!`]
//! wrapping a [`Registrator`] instead of being discovered by scanning a
//! directory at runtime. [`RegistryBuilder`] collects every submitted
//! registrator via `inventory::iter`, applies override-by-layer rules, then
//! resolves the result into a boot order with Kahn's algorithm.

use crate::context::ModuleCtx;
use crate::error::BaseplateError;
use crate::module::{Module, ModuleDescriptor};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

/// Factory signature every registered module provides: build the module from
/// its context. Boxed as `anyhow::Result` since module construction can fail
/// for module-specific reasons (bad config, unavailable resource, ...).
pub type ModuleFactory = fn(&ModuleCtx) -> anyhow::Result<Arc<dyn Module>>;

/// Where a module definition came from. A `User` layer entry silently
/// overrides a `Builtin` entry of the same name; two entries in the *same*
/// layer with the same name are a hard [`BaseplateError::DuplicateModule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModuleLayer {
    Builtin,
    User,
}

impl ModuleLayer {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ModuleLayer::Builtin => "builtin",
            ModuleLayer::User => "user",
        }
    }
}

/// One module's static self-declaration, submitted via `inventory::submit!`.
pub struct Registrator {
    pub layer: ModuleLayer,
    pub descriptor: ModuleDescriptor,
    pub factory: ModuleFactory,
}

inventory::collect!(Registrator);

#[derive(Debug, Clone)]
struct ModuleEntry {
    layer: ModuleLayer,
    descriptor: ModuleDescriptor,
    factory: ModuleFactory,
    /// Order this name was first handed to `with_registrator`, used to break
    /// topological ties without depending on `HashMap` iteration or name
    /// ordering.
    seq: usize,
}

/// Collects registrators, applies layering, and resolves a boot order.
///
/// Built from [`inventory::iter`] by default via [`Self::from_inventory`];
/// `with_registrator` / `with_registrators` exist so tests can exercise
/// resolution without relying on process-wide link-time registration.
#[derive(Default)]
pub struct RegistryBuilder {
    entries: HashMap<&'static str, ModuleEntry>,
    duplicates: HashSet<(&'static str, &'static str)>,
    next_seq: usize,
}

impl RegistryBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            duplicates: HashSet::new(),
            next_seq: 0,
        }
    }

    /// Seed the builder from every `Registrator` submitted anywhere in the
    /// linked binary.
    #[must_use]
    pub fn from_inventory() -> Self {
        let mut builder = Self::new();
        for reg in inventory::iter::<Registrator> {
            builder = builder.with_registrator(reg.layer, reg.descriptor.clone(), reg.factory);
        }
        builder
    }

    /// Add one module definition, applying override-by-layer: a higher layer
    /// (`User` > `Builtin`) replaces a lower one of the same name; same-layer
    /// collision is recorded and surfaced by [`Self::build`].
    #[must_use]
    pub fn with_registrator(
        mut self,
        layer: ModuleLayer,
        descriptor: ModuleDescriptor,
        factory: ModuleFactory,
    ) -> Self {
        let name = descriptor.name;
        let seq = self.next_seq;
        self.next_seq += 1;
        match self.entries.get(name) {
            Some(existing) if existing.layer == layer => {
                // Preserve both so `build` can report a precise duplicate error
                // instead of silently picking one.
                self.conflicting_duplicate(name, layer);
            }
            Some(existing) if existing.layer > layer => {
                // existing wins, ignore this one
            }
            _ => {
                self.entries.insert(
                    name,
                    ModuleEntry {
                        layer,
                        descriptor,
                        factory,
                        seq,
                    },
                );
            }
        }
        self
    }

    fn conflicting_duplicate(&mut self, name: &'static str, layer: ModuleLayer) {
        // Mark with a sentinel by keeping the first entry but flagging via
        // a parallel set checked in `build`. Simpler: just re-insert with a
        // poison marker using dependencies = ["\0duplicate"] is fragile, so
        // instead track duplicates explicitly.
        self.duplicates.insert((name, layer.as_str()));
    }

    #[must_use]
    pub fn with_registrators(self, regs: impl IntoIterator<Item = Registrator>) -> Self {
        regs.into_iter().fold(self, |builder, reg| {
            builder.with_registrator(reg.layer, reg.descriptor, reg.factory)
        })
    }

    /// Resolve a boot order via Kahn's algorithm over the dependency graph.
    /// Returns modules in dependency-first order: every module appears after
    /// all modules it depends on.
    ///
    /// # Errors
    /// [`BaseplateError::DuplicateModule`] for a same-layer name collision,
    /// [`BaseplateError::MissingDependency`] for a dependency naming a module
    /// not present in the final (post-override) set, and
    /// [`BaseplateError::CircularDependency`] with the full cycle path.
    pub fn build(self) -> Result<ModuleRegistry, BaseplateError> {
        if let Some((name, layer)) = self.duplicates.iter().next() {
            return Err(BaseplateError::DuplicateModule { name, layer });
        }

        for entry in self.entries.values() {
            for dep in entry.descriptor.dependencies {
                if !self.entries.contains_key(dep) {
                    return Err(BaseplateError::MissingDependency {
                        module: entry.descriptor.name,
                        missing: dep,
                    });
                }
            }
        }

        let order = topo_sort(&self.entries)?;
        Ok(ModuleRegistry {
            entries: self.entries,
            order,
        })
    }
}

fn topo_sort(
    entries: &HashMap<&'static str, ModuleEntry>,
) -> Result<Vec<&'static str>, BaseplateError> {
    let mut indegree: HashMap<&'static str, usize> =
        entries.keys().map(|&name| (name, 0)).collect();
    let mut dependents: HashMap<&'static str, Vec<&'static str>> = HashMap::new();

    for entry in entries.values() {
        for &dep in entry.descriptor.dependencies {
            *indegree.get_mut(entry.descriptor.name).unwrap() += 1;
            dependents.entry(dep).or_default().push(entry.descriptor.name);
        }
    }

    let seq_of = |name: &str| entries[name].seq;

    let mut ready_sorted: Vec<&'static str> = indegree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&name, _)| name)
        .collect();
    ready_sorted.sort_unstable_by_key(|&name| seq_of(name));
    let mut ready: VecDeque<&'static str> = ready_sorted.into();

    let mut order = Vec::with_capacity(entries.len());
    while let Some(name) = ready.pop_front() {
        order.push(name);
        if let Some(dependents) = dependents.get(name) {
            let mut newly_ready = Vec::new();
            for &dependent in dependents {
                let deg = indegree.get_mut(dependent).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    newly_ready.push(dependent);
                }
            }
            newly_ready.sort_unstable_by_key(|&name| seq_of(name));
            for n in newly_ready {
                ready.push_back(n);
            }
        }
    }

    if order.len() == entries.len() {
        return Ok(order);
    }

    // A cycle exists among the modules left with indegree > 0. Find one
    // concrete cycle path via DFS for the error message.
    let remaining: HashSet<&'static str> = entries
        .keys()
        .copied()
        .filter(|n| !order.contains(n))
        .collect();
    let path = find_cycle(entries, &remaining);
    Err(BaseplateError::CircularDependency { path })
}

fn find_cycle(
    entries: &HashMap<&'static str, ModuleEntry>,
    remaining: &HashSet<&'static str>,
) -> Vec<&'static str> {
    let mut visiting = Vec::new();
    let mut visited = HashSet::new();

    fn dfs<'a>(
        node: &'a str,
        entries: &HashMap<&'static str, ModuleEntry>,
        remaining: &HashSet<&'static str>,
        visiting: &mut Vec<&'a str>,
        visited: &mut HashSet<&'a str>,
    ) -> Option<Vec<&'a str>> {
        if let Some(pos) = visiting.iter().position(|&n| n == node) {
            let mut cycle = visiting[pos..].to_vec();
            cycle.push(node);
            return Some(cycle);
        }
        if visited.contains(node) {
            return None;
        }
        visiting.push(node);
        if let Some(entry) = entries.get(node) {
            for &dep in entry.descriptor.dependencies {
                if remaining.contains(dep) {
                    if let Some(cycle) = dfs(dep, entries, remaining, visiting, visited) {
                        return Some(cycle);
                    }
                }
            }
        }
        visiting.pop();
        visited.insert(node);
        None
    }

    for &start in remaining {
        if let Some(cycle) = dfs(start, entries, remaining, &mut visiting, &mut visited) {
            return cycle;
        }
    }
    Vec::new()
}

/// Resolved, cycle-free module set with a dependency-first boot order.
#[derive(Debug)]
pub struct ModuleRegistry {
    entries: HashMap<&'static str, ModuleEntry>,
    order: Vec<&'static str>,
}

impl ModuleRegistry {
    /// Boot order: dependency-first.
    #[must_use]
    pub fn boot_order(&self) -> &[&'static str] {
        &self.order
    }

    /// Shutdown order: reverse of boot order.
    #[must_use]
    pub fn shutdown_order(&self) -> Vec<&'static str> {
        self.order.iter().rev().copied().collect()
    }

    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&ModuleDescriptor> {
        self.entries.get(name).map(|e| &e.descriptor)
    }

    #[must_use]
    pub fn factory(&self, name: &str) -> Option<ModuleFactory> {
        self.entries.get(name).map(|e| e.factory)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Noop;

    #[async_trait]
    impl Module for Noop {
        async fn start(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            Ok(())
        }
        fn running(&self) -> bool {
            true
        }
    }

    fn noop_factory(_ctx: &ModuleCtx) -> anyhow::Result<Arc<dyn Module>> {
        Ok(Arc::new(Noop))
    }

    fn descriptor(name: &'static str, deps: &'static [&'static str]) -> ModuleDescriptor {
        ModuleDescriptor {
            name,
            version: "0.1.0",
            dependencies: deps,
        }
    }

    #[test]
    fn boot_order_respects_dependencies() {
        let registry = RegistryBuilder::new()
            .with_registrator(ModuleLayer::Builtin, descriptor("db", &[]), noop_factory)
            .with_registrator(
                ModuleLayer::Builtin,
                descriptor("cache", &["db"]),
                noop_factory,
            )
            .with_registrator(
                ModuleLayer::Builtin,
                descriptor("api", &["db", "cache"]),
                noop_factory,
            )
            .build()
            .unwrap();

        let order = registry.boot_order();
        let pos = |n: &str| order.iter().position(|&x| x == n).unwrap();
        assert!(pos("db") < pos("cache"));
        assert!(pos("cache") < pos("api"));
        assert_eq!(registry.shutdown_order(), {
            let mut rev = order.to_vec();
            rev.reverse();
            rev
        });
    }

    #[test]
    fn user_layer_overrides_builtin_of_the_same_name() {
        fn other_factory(_ctx: &ModuleCtx) -> anyhow::Result<Arc<dyn Module>> {
            Ok(Arc::new(Noop))
        }

        let registry = RegistryBuilder::new()
            .with_registrator(ModuleLayer::Builtin, descriptor("db", &[]), noop_factory)
            .with_registrator(ModuleLayer::User, descriptor("db", &[]), other_factory)
            .build()
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.factory("db").unwrap() as *const (),
            other_factory as *const ()
        );
    }

    #[test]
    fn same_layer_name_collision_is_an_error() {
        let err = RegistryBuilder::new()
            .with_registrator(ModuleLayer::Builtin, descriptor("db", &[]), noop_factory)
            .with_registrator(ModuleLayer::Builtin, descriptor("db", &[]), noop_factory)
            .build()
            .unwrap_err();
        assert!(matches!(err, BaseplateError::DuplicateModule { .. }));
    }

    #[test]
    fn dependency_on_unknown_module_is_an_error() {
        let err = RegistryBuilder::new()
            .with_registrator(
                ModuleLayer::Builtin,
                descriptor("api", &["ghost"]),
                noop_factory,
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, BaseplateError::MissingDependency { .. }));
    }

    #[test]
    fn circular_dependency_is_detected_with_a_path() {
        let err = RegistryBuilder::new()
            .with_registrator(ModuleLayer::Builtin, descriptor("a", &["b"]), noop_factory)
            .with_registrator(ModuleLayer::Builtin, descriptor("b", &["c"]), noop_factory)
            .with_registrator(ModuleLayer::Builtin, descriptor("c", &["a"]), noop_factory)
            .build()
            .unwrap_err();

        match err {
            BaseplateError::CircularDependency { path } => {
                assert!(path.len() >= 2);
                assert_eq!(path.first(), path.last());
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn equal_rank_nodes_tie_break_on_discovery_order_not_name() {
        let registry = RegistryBuilder::new()
            .with_registrator(ModuleLayer::Builtin, descriptor("zeta", &[]), noop_factory)
            .with_registrator(ModuleLayer::Builtin, descriptor("alpha", &[]), noop_factory)
            .with_registrator(ModuleLayer::Builtin, descriptor("mu", &[]), noop_factory)
            .build()
            .unwrap();

        assert_eq!(registry.boot_order(), &["zeta", "alpha", "mu"]);
    }

    #[test]
    fn independent_modules_with_no_dependencies_build_cleanly() {
        let registry = RegistryBuilder::new()
            .with_registrator(ModuleLayer::Builtin, descriptor("a", &[]), noop_factory)
            .with_registrator(ModuleLayer::Builtin, descriptor("b", &[]), noop_factory)
            .build()
            .unwrap();
        assert_eq!(registry.len(), 2);
    }
}
