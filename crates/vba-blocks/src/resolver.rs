//! Backtracking version resolution.
//!
//! One version per name per resolve. Candidates are tried newest-first,
//! except that a version pinned by the lockfile is tried before anything
//! else while it still satisfies the accumulated constraint. Failures carry
//! a conflict set (the names whose constraints contributed) so the search
//! can jump back past frames that cannot fix the conflict.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::Result;
use semver::{Version, VersionReq};

use crate::error::Error;
use crate::manifest::{Dependency, GitRef, Snapshot};
use crate::sources::{Registration, SourceKind};

/// An ordered, validated set of registrations satisfying every constraint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    /// Sorted alphabetically by name.
    pub registrations: Vec<Registration>,
}

impl DependencyGraph {
    pub fn get(&self, name: &str) -> Option<&Registration> {
        self.registrations
            .iter()
            .find(|registration| registration.name == name)
    }
}

/// Enumerates candidate registrations for a dependency, newest last or in
/// any order; the resolver sorts.
pub trait CandidateProvider {
    fn candidates(&mut self, dependency: &Dependency) -> Result<Vec<Registration>>;
}

/// What a dependency demands of the chosen registration for its name.
#[derive(Debug, Clone, PartialEq)]
enum Demand {
    Registry { req: VersionReq, registry: String },
    Path { path: PathBuf },
    Git { url: String, refspec: GitRef },
}

impl Demand {
    fn of(dependency: &Dependency) -> Self {
        match dependency {
            Dependency::Registry {
                version, registry, ..
            } => Demand::Registry {
                req: version.clone(),
                registry: registry.clone(),
            },
            Dependency::Path { path, .. } => Demand::Path { path: path.clone() },
            Dependency::Git { git, refspec, .. } => Demand::Git {
                url: git.clone(),
                refspec: refspec.clone(),
            },
        }
    }

    fn accepts(&self, candidate: &Registration) -> bool {
        match self {
            Demand::Registry { req, registry } => {
                candidate.source.kind == SourceKind::Registry
                    && candidate.source.value == *registry
                    && req.matches(&candidate.version)
            }
            Demand::Path { path } => {
                candidate.source.kind == SourceKind::Path
                    && candidate.source.value == path.to_string_lossy().replace('\\', "/")
            }
            Demand::Git { url, .. } => {
                candidate.source.kind == SourceKind::Git && candidate.source.value == *url
            }
        }
    }
}

/// A constraint with its provenance (`None` when demanded directly by the
/// root or a member).
#[derive(Debug, Clone)]
struct Constraint {
    demand: Demand,
    requirer: Option<String>,
}

/// Conflict set propagated out of a failed subtree.
type Conflict = BTreeSet<String>;

struct Solver<'a> {
    provider: &'a mut dyn CandidateProvider,
    preferences: &'a BTreeMap<String, Version>,
    constraints: BTreeMap<String, Vec<Constraint>>,
    /// First dependency seen per name; used to enumerate candidates.
    seeds: BTreeMap<String, Dependency>,
    candidates: BTreeMap<String, Vec<Registration>>,
    selected: BTreeMap<String, Registration>,
    /// First backend failure; surfaced instead of `resolve-failed`.
    provider_error: Option<anyhow::Error>,
}

/// Resolve the workspace's dependencies into a graph, preferring versions
/// from `preferences` (the previous lockfile) when they still satisfy.
pub fn resolve(
    root: &Snapshot,
    members: &[Snapshot],
    preferences: &BTreeMap<String, Version>,
    provider: &mut dyn CandidateProvider,
) -> Result<DependencyGraph> {
    let mut solver = Solver {
        provider,
        preferences,
        constraints: BTreeMap::new(),
        seeds: BTreeMap::new(),
        candidates: BTreeMap::new(),
        selected: BTreeMap::new(),
        provider_error: None,
    };

    let mut direct: Vec<&Dependency> = root.dependencies.iter().collect();
    for member in members {
        direct.extend(member.dependencies.iter());
    }
    for dependency in direct {
        solver.add_constraint(dependency, None).map_err(|conflict| {
            anyhow::Error::from(Error::ResolveFailed {
                message: conflict_message(&conflict),
            })
        })?;
    }

    match solver.solve() {
        Ok(()) => {
            let mut registrations: Vec<Registration> = solver.selected.into_values().collect();
            registrations.sort_by(|a, b| a.name.cmp(&b.name));
            let graph = DependencyGraph { registrations };
            check_acyclic(&graph)?;
            Ok(graph)
        }
        Err(conflict) => match solver.provider_error {
            Some(err) => Err(err),
            None => Err(Error::ResolveFailed {
                message: conflict_message(&conflict),
            }
            .into()),
        },
    }
}

fn conflict_message(conflict: &Conflict) -> String {
    if conflict.is_empty() {
        "no consistent set of versions exists".to_string()
    } else {
        let names: Vec<&str> = conflict.iter().map(String::as_str).collect();
        format!(
            "no version satisfies the combined requirements on {}",
            names.join(", ")
        )
    }
}

impl Solver<'_> {
    /// Record a constraint; fails with a conflict set if a selected
    /// registration no longer satisfies, or if demands of different kinds
    /// collide on one name.
    fn add_constraint(
        &mut self,
        dependency: &Dependency,
        requirer: Option<&str>,
    ) -> Result<(), Conflict> {
        let name = dependency.name().to_string();
        let demand = Demand::of(dependency);

        let kind_conflict = self.constraints.get(&name).is_some_and(|existing| {
            existing.iter().any(|constraint| {
                std::mem::discriminant(&constraint.demand) != std::mem::discriminant(&demand)
            })
        });

        self.seeds
            .entry(name.clone())
            .or_insert_with(|| dependency.clone());
        self.constraints
            .entry(name.clone())
            .or_default()
            .push(Constraint {
                demand,
                requirer: requirer.map(str::to_string),
            });

        if kind_conflict {
            return Err(self.conflict_for(&name));
        }

        if let Some(chosen) = self.selected.get(&name)
            && !self
                .constraints
                .get(&name)
                .expect("constraints present")
                .iter()
                .all(|constraint| constraint.demand.accepts(chosen))
        {
            return Err(self.conflict_for(&name));
        }

        Ok(())
    }

    fn remove_last_constraints(&mut self, added: &[String]) {
        for name in added {
            if let Some(list) = self.constraints.get_mut(name) {
                list.pop();
                if list.is_empty() {
                    self.constraints.remove(name);
                    self.seeds.remove(name);
                }
            }
        }
    }

    /// The names implicated in a failure on `name`: the name itself plus
    /// every requirer that placed a constraint on it.
    fn conflict_for(&self, name: &str) -> Conflict {
        let mut conflict = BTreeSet::new();
        conflict.insert(name.to_string());
        if let Some(constraints) = self.constraints.get(name) {
            for constraint in constraints {
                if let Some(requirer) = &constraint.requirer {
                    conflict.insert(requirer.clone());
                }
            }
        }
        conflict
    }

    /// Unresolved names ordered by: locked first, fewest known candidates
    /// next, then lexicographically.
    fn next_name(&self) -> Option<String> {
        self.constraints
            .keys()
            .filter(|name| !self.selected.contains_key(*name))
            .min_by_key(|name| {
                let locked = if self.preferences.contains_key(*name) { 0 } else { 1 };
                let count = self
                    .candidates
                    .get(*name)
                    .map(Vec::len)
                    .unwrap_or(usize::MAX);
                (locked, count, (*name).clone())
            })
            .cloned()
    }

    /// Candidates in preference order: the locked version first, then
    /// descending by version.
    fn ordered_candidates(&mut self, name: &str) -> Result<Vec<Registration>, Conflict> {
        if !self.candidates.contains_key(name) {
            let seed = self.seeds.get(name).expect("seed present").clone();
            let mut found = match self.provider.candidates(&seed) {
                Ok(found) => found,
                Err(err) => {
                    if self.provider_error.is_none() {
                        self.provider_error = Some(err);
                    }
                    return Err(self.conflict_for(name));
                }
            };
            found.sort_by(|a, b| b.version.cmp(&a.version));
            self.candidates.insert(name.to_string(), found);
        }

        let mut ordered = self.candidates.get(name).expect("cached").clone();
        if let Some(locked) = self.preferences.get(name)
            && let Some(index) = ordered
                .iter()
                .position(|candidate| candidate.version == *locked)
        {
            let preferred = ordered.remove(index);
            ordered.insert(0, preferred);
        }
        Ok(ordered)
    }

    fn solve(&mut self) -> Result<(), Conflict> {
        let Some(name) = self.next_name() else {
            return Ok(());
        };

        let candidates = self.ordered_candidates(&name)?;
        let constraints = self.constraints.get(&name).cloned().unwrap_or_default();
        let mut conflicts: Conflict = BTreeSet::new();

        for candidate in candidates {
            if !constraints
                .iter()
                .all(|constraint| constraint.demand.accepts(&candidate))
            {
                continue;
            }

            // Registrations for one name+version from different sources are
            // a conflict, not a choice; the demand kind check above already
            // filtered cross-kind candidates.

            self.selected.insert(name.clone(), candidate.clone());

            let mut added = Vec::new();
            let mut failed: Option<Conflict> = None;
            for dependency in &candidate.dependencies {
                added.push(dependency.name().to_string());
                if let Err(conflict) = self.add_constraint(dependency, Some(&name)) {
                    failed = Some(conflict);
                    break;
                }
            }

            if failed.is_none() {
                match self.solve() {
                    Ok(()) => return Ok(()),
                    Err(conflict) => failed = Some(conflict),
                }
            }

            let conflict = failed.expect("failure recorded");
            self.remove_last_constraints(&added);
            self.selected.remove(&name);

            if !conflict.contains(&name) {
                // This frame cannot influence the conflict; jump back.
                return Err(conflict);
            }
            conflicts.extend(conflict);
        }

        conflicts.extend(self.conflict_for(&name));
        Err(conflicts)
    }
}

/// The name graph must be acyclic when traversed name → dependency.
fn check_acyclic(graph: &DependencyGraph) -> Result<()> {
    fn visit(
        graph: &DependencyGraph,
        name: &str,
        visiting: &mut BTreeSet<String>,
        done: &mut BTreeSet<String>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name.to_string()) {
            return Err(Error::ResolveFailed {
                message: format!("dependency cycle through `{name}`"),
            }
            .into());
        }
        if let Some(registration) = graph.get(name) {
            for dependency in &registration.dependencies {
                visit(graph, dependency.name(), visiting, done)?;
            }
        }
        visiting.remove(name);
        done.insert(name.to_string());
        Ok(())
    }

    let mut visiting = BTreeSet::new();
    let mut done = BTreeSet::new();
    for registration in &graph.registrations {
        visit(graph, &registration.name, &mut visiting, &mut done)?;
    }
    Ok(())
}
