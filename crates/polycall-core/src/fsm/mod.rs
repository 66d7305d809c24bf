//! Hierarchical State Machine (C4, spec §4.4): states and guarded
//! transitions with parent/child relationships, permission inheritance,
//! and checksum-guarded snapshot/restore.
//!
//! States and transitions live in a dense arena (`Vec<State>`) addressed
//! by index rather than pointer/name links, per Design Notes §9, the way
//! the teacher represents its pipeline stage graph
//! (`spark-core/kernel/model.rs`) as a flat indexed table.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::error::{CoreError, ErrorKind, PolyResult};

pub type StateId = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InheritancePolicy {
    None,
    Additive,
    Subtractive,
    Replace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    Parent,
    Composition,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Local,
    External,
    Internal,
}

pub type Hook = Box<dyn Fn() + Send + Sync>;
pub type Guard = Box<dyn Fn(Option<&(dyn Any + Send + Sync)>) -> bool + Send + Sync>;

pub struct State {
    pub name: String,
    pub locked: bool,
    pub permissions: HashSet<&'static str>,
    pub inheritance: InheritancePolicy,
    pub parent: Option<StateId>,
    pub relationship: Option<Relationship>,
    enter: Option<Hook>,
    exit: Option<Hook>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State")
            .field("name", &self.name)
            .field("locked", &self.locked)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

pub struct Transition {
    pub name: String,
    pub source: StateId,
    pub target: StateId,
    pub kind: TransitionKind,
    guard: Option<Guard>,
}

impl std::fmt::Debug for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transition")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

struct Snapshot {
    current: StateId,
    #[allow(dead_code)]
    taken_at: SystemTime,
    checksum: u64,
}

/// A single hierarchical state machine instance. States and transitions
/// may only be added before the machine is started (spec §4.4 paragraph
/// 1); `start()` is irreversible.
pub struct StateMachine {
    states: Vec<State>,
    by_name: HashMap<String, StateId>,
    transitions: HashMap<String, Transition>,
    current: StateId,
    started: bool,
    snapshots: HashMap<u64, Snapshot>,
    next_snapshot_id: u64,
}

/// Fluent construction API used before `start()`, mirroring the
/// teacher's builder-style construction idiom (Design Notes §9).
pub struct StateMachineBuilder {
    machine: StateMachine,
}

impl StateMachineBuilder {
    pub fn new(initial_state: impl Into<String>) -> Self {
        let mut machine = StateMachine {
            states: Vec::new(),
            by_name: HashMap::new(),
            transitions: HashMap::new(),
            current: 0,
            started: false,
            snapshots: HashMap::new(),
            next_snapshot_id: 1,
        };
        machine.push_state(initial_state.into(), false, HashSet::new(), InheritancePolicy::None, None, None);
        Self { machine }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_state(
        mut self,
        name: impl Into<String>,
        locked: bool,
        permissions: HashSet<&'static str>,
        inheritance: InheritancePolicy,
        parent: Option<&str>,
        relationship: Option<Relationship>,
    ) -> PolyResult<Self> {
        let parent_id = match parent {
            Some(p) => Some(
                *self
                    .machine
                    .by_name
                    .get(p)
                    .ok_or_else(|| CoreError::not_found(format!("parent state '{p}' does not exist")))?,
            ),
            None => None,
        };
        self.machine
            .push_state(name.into(), locked, permissions, inheritance, parent_id, relationship);
        Ok(self)
    }

    pub fn with_enter_hook(mut self, state: &str, hook: impl Fn() + Send + Sync + 'static) -> PolyResult<Self> {
        let id = self.machine.state_id(state)?;
        self.machine.states[id].enter = Some(Box::new(hook));
        Ok(self)
    }

    pub fn with_exit_hook(mut self, state: &str, hook: impl Fn() + Send + Sync + 'static) -> PolyResult<Self> {
        let id = self.machine.state_id(state)?;
        self.machine.states[id].exit = Some(Box::new(hook));
        Ok(self)
    }

    /// Sets `state`'s own permission set, useful for the initial state
    /// seeded by [`StateMachineBuilder::new`] which otherwise starts
    /// empty.
    pub fn with_permissions(mut self, state: &str, permissions: HashSet<&'static str>) -> PolyResult<Self> {
        let id = self.machine.state_id(state)?;
        self.machine.states[id].permissions = permissions;
        Ok(self)
    }

    pub fn add_transition(
        mut self,
        name: impl Into<String>,
        source: &str,
        target: &str,
        kind: TransitionKind,
        guard: Option<Guard>,
    ) -> PolyResult<Self> {
        let name = name.into();
        if self.machine.transitions.contains_key(&name) {
            return Err(CoreError::with_code(
                ErrorKind::AlreadyExists,
                "fsm.transition_conflict",
                format!("transition '{name}' already registered"),
            ));
        }
        let source_id = self.machine.state_id(source)?;
        let target_id = self.machine.state_id(target)?;
        self.machine.transitions.insert(
            name.clone(),
            Transition { name, source: source_id, target: target_id, kind, guard },
        );
        Ok(self)
    }

    /// Marks the machine started; no further states or transitions may be
    /// added.
    pub fn start(mut self) -> StateMachine {
        self.machine.started = true;
        self.machine
    }
}

impl StateMachine {
    fn push_state(
        &mut self,
        name: String,
        locked: bool,
        permissions: HashSet<&'static str>,
        inheritance: InheritancePolicy,
        parent: Option<StateId>,
        relationship: Option<Relationship>,
    ) -> StateId {
        let id = self.states.len();
        self.by_name.insert(name.clone(), id);
        self.states.push(State {
            name,
            locked,
            permissions,
            inheritance,
            parent,
            relationship,
            enter: None,
            exit: None,
        });
        id
    }

    fn state_id(&self, name: &str) -> PolyResult<StateId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::not_found(format!("state '{name}' does not exist")))
    }

    pub fn current_state(&self) -> &str {
        &self.states[self.current].name
    }

    /// Walks the parent chain applying `state`'s inheritance policy
    /// (spec §4.4 paragraph 1).
    pub fn effective_permissions(&self, name: &str) -> PolyResult<HashSet<&'static str>> {
        let id = self.state_id(name)?;
        Ok(self.effective_permissions_of(id))
    }

    fn effective_permissions_of(&self, id: StateId) -> HashSet<&'static str> {
        let state = &self.states[id];
        let own: HashSet<&'static str> = state.permissions.clone();
        let Some(parent) = state.parent else {
            return own;
        };
        let parent_perms = self.effective_permissions_of(parent);
        match state.inheritance {
            InheritancePolicy::None => own,
            InheritancePolicy::Additive => own.union(&parent_perms).copied().collect(),
            InheritancePolicy::Subtractive => own.difference(&parent_perms).copied().collect(),
            InheritancePolicy::Replace => parent_perms,
        }
    }

    fn ancestor_chain(&self, mut id: StateId) -> Vec<StateId> {
        let mut chain = vec![id];
        while let Some(parent) = self.states[id].parent {
            chain.push(parent);
            id = parent;
        }
        chain.reverse();
        chain
    }

    fn common_ancestor(&self, a: StateId, b: StateId) -> Option<StateId> {
        let chain_a = self.ancestor_chain(a);
        let chain_b = self.ancestor_chain(b);
        let mut ancestor = None;
        for (x, y) in chain_a.iter().zip(chain_b.iter()) {
            if x == y {
                ancestor = Some(*x);
            } else {
                break;
            }
        }
        ancestor
    }

    /// Execute a registered transition by name (spec §4.4 "Transition
    /// execution").
    #[tracing::instrument(skip(self, payload))]
    pub fn execute(&mut self, transition_name: &str, payload: Option<&(dyn Any + Send + Sync)>) -> PolyResult<()> {
        let (source, target, kind, guard_result) = {
            let transition = self
                .transitions
                .get(transition_name)
                .ok_or_else(|| CoreError::not_found(format!("transition '{transition_name}' does not exist")))?;
            if transition.source != self.current {
                return Err(CoreError::with_code(
                    ErrorKind::InvalidState,
                    "fsm.wrong_state",
                    format!(
                        "transition '{transition_name}' expects source '{}', current is '{}'",
                        self.states[transition.source].name, self.states[self.current].name
                    ),
                ));
            }
            if self.states[transition.target].locked {
                return Err(CoreError::with_code(
                    ErrorKind::InvalidState,
                    "fsm.locked",
                    format!("target state '{}' is locked", self.states[transition.target].name),
                ));
            }
            let guard_result = transition.guard.as_ref().map(|g| g(payload)).unwrap_or(true);
            (transition.source, transition.target, transition.kind, guard_result)
        };

        if !guard_result {
            return Err(CoreError::with_code(ErrorKind::GuardDenied, "fsm.guard_denied", "transition guard denied execution"));
        }

        match kind {
            TransitionKind::Internal => {
                debug!(transition_name, "internal transition, hooks skipped");
            }
            TransitionKind::Local => {
                if let Some(exit) = &self.states[source].exit {
                    exit();
                }
                if let Some(enter) = &self.states[target].enter {
                    enter();
                }
            }
            TransitionKind::External => {
                let ancestor = self.common_ancestor(source, target);
                for id in self.path_up(source, ancestor) {
                    if let Some(exit) = &self.states[id].exit {
                        exit();
                    }
                }
                for id in self.path_down(ancestor, target) {
                    if let Some(enter) = &self.states[id].enter {
                        enter();
                    }
                }
            }
        }

        self.current = target;
        Ok(())
    }

    fn path_up(&self, from: StateId, stop_before: Option<StateId>) -> Vec<StateId> {
        let mut path = Vec::new();
        let mut current = Some(from);
        while let Some(id) = current {
            if Some(id) == stop_before {
                break;
            }
            path.push(id);
            current = self.states[id].parent;
        }
        path
    }

    fn path_down(&self, from_ancestor: Option<StateId>, to: StateId) -> Vec<StateId> {
        let mut path = Vec::new();
        let mut current = Some(to);
        while let Some(id) = current {
            if Some(id) == from_ancestor {
                break;
            }
            path.push(id);
            current = self.states[id].parent;
        }
        path.reverse();
        path
    }

    /// Captures `{current_state_index, timestamp, checksum}` (spec §4.4
    /// "Snapshot").
    pub fn snapshot(&mut self) -> u64 {
        let checksum = self.structural_checksum();
        let id = self.next_snapshot_id;
        self.next_snapshot_id += 1;
        self.snapshots.insert(
            id,
            Snapshot { current: self.current, taken_at: SystemTime::now(), checksum },
        );
        id
    }

    /// Rejected unless the machine's current structural checksum equals
    /// the one captured at snapshot time (spec §4.4 "Restore").
    pub fn restore(&mut self, id: u64) -> PolyResult<()> {
        let snapshot_current = {
            let snapshot = self
                .snapshots
                .get(&id)
                .ok_or_else(|| CoreError::not_found("unknown snapshot id"))?;
            if snapshot.checksum != self.structural_checksum() {
                return Err(CoreError::integrity_check_failed(
                    "state machine structure changed since snapshot was taken",
                ));
            }
            snapshot.current
        };
        warn!(id, "restoring state machine snapshot");
        self.current = snapshot_current;
        Ok(())
    }

    fn structural_checksum(&self) -> u64 {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for state in &self.states {
            state.name.hash(&mut hasher);
            state.locked.hash(&mut hasher);
            state.parent.hash(&mut hasher);
        }
        let mut names: Vec<&String> = self.transitions.keys().collect();
        names.sort();
        for name in names {
            let t = &self.transitions[name];
            t.name.hash(&mut hasher);
            t.source.hash(&mut hasher);
            t.target.hash(&mut hasher);
        }
        self.current.hash(&mut hasher);
        hasher.finish()
    }
}
