//! `get`, `set` and `remove` over a set of focused states.
//!
//! All three walk every op except the last, threading the current focus,
//! then treat the last op as the final read or write. `remove` tracks the
//! location of every focused value so deletions splice the original
//! containers even after a `Traverse` or `Filter`.

use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashMap;

use super::chain::Path;
use super::op::Op;

/// Dependency values resolved for each op of a path.
///
/// An entry is `None` when at least one dependency of that op is currently
/// undefined; ops in that state never run their visitor.
#[derive(Clone, Debug, Default)]
pub struct Bindings {
    per_op: Vec<Option<Vec<Value>>>,
}

impl Bindings {
    /// Resolve every op's dependencies through `lookup`.
    pub fn resolve<F>(path: &Path, mut lookup: F) -> Self
    where
        F: FnMut(&Path) -> Option<Value>,
    {
        let per_op = path
            .ops()
            .iter()
            .map(|op| {
                op.dependencies()
                    .iter()
                    .map(|dep| lookup(dep.as_ref()))
                    .collect::<Option<Vec<_>>>()
            })
            .collect();
        Self { per_op }
    }

    /// Whether every op can run.
    pub fn is_ready(&self) -> bool {
        self.per_op.iter().all(Option::is_some)
    }

    fn get(&self, index: usize) -> Option<&[Value]> {
        match self.per_op.get(index) {
            Some(Some(values)) => Some(values),
            Some(None) => None,
            // Ops past the resolved range have no dependencies.
            None => Some(&[]),
        }
    }
}

/// Result of a write.
#[derive(Clone, Debug, PartialEq)]
pub struct SetOutcome {
    /// At least one slot changed.
    pub updated: bool,
    /// False when the write could not be carried through the path: a
    /// transform in the chain, or a step landing on a non-container.
    pub resolved: bool,
    /// New value of every written slot.
    pub states: Vec<Value>,
}

impl SetOutcome {
    fn resolved() -> Self {
        Self {
            updated: false,
            resolved: true,
            states: Vec::new(),
        }
    }

    fn unsupported() -> Self {
        Self {
            updated: false,
            resolved: false,
            states: Vec::new(),
        }
    }
}

/// Result of a removal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RemoveOutcome {
    pub resolved: bool,
    pub removed: usize,
}

impl RemoveOutcome {
    fn resolved() -> Self {
        Self {
            resolved: true,
            removed: 0,
        }
    }

    fn unsupported() -> Self {
        Self {
            resolved: false,
            removed: 0,
        }
    }
}

impl Path {
    /// Read the focused values.
    pub fn get(&self, roots: &[Value], bindings: &Bindings) -> Vec<Value> {
        let mut focus: Vec<Cow<'_, Value>> = roots.iter().map(Cow::Borrowed).collect();

        for (index, op) in self.ops().iter().enumerate() {
            focus = match op {
                Op::Root => focus,
                Op::Property(key) => focus.into_iter().filter_map(|v| child(v, key)).collect(),
                Op::Transform { visitor, .. } => {
                    let Some(deps) = bindings.get(index) else {
                        return Vec::new();
                    };
                    focus
                        .into_iter()
                        .map(|v| {
                            let value: &Value = &v;
                            Cow::Owned(visitor(value, deps))
                        })
                        .collect()
                }
                Op::Filter { visitor, .. } => {
                    let Some(deps) = bindings.get(index) else {
                        return Vec::new();
                    };
                    focus
                        .into_iter()
                        .filter(|v| {
                            let value: &Value = v;
                            visitor(value, deps)
                        })
                        .collect()
                }
                Op::Traverse => focus.into_iter().flat_map(elements).collect(),
            };
        }

        focus.into_iter().map(Cow::into_owned).collect()
    }

    /// Apply `updater` to every slot the path focuses.
    ///
    /// Missing intermediate containers are created only while the rest of
    /// the chain is static.
    pub fn set(
        &self,
        roots: &mut [Value],
        bindings: &Bindings,
        updater: &dyn Fn(Option<&Value>) -> Value,
    ) -> SetOutcome {
        if !self.is_writable() {
            return SetOutcome::unsupported();
        }

        let last = self.len() - 1;
        let mut outcome = SetOutcome::resolved();
        let mut focus: Vec<&mut Value> = roots.iter_mut().collect();

        for (index, op) in self.ops()[..last].iter().enumerate() {
            focus = match op {
                Op::Root => focus,
                Op::Property(key) => {
                    let vivify = self.static_after(index);
                    let mut next = Vec::with_capacity(focus.len());
                    for value in focus {
                        match child_mut(value, key, vivify) {
                            Slot::Found(slot) => next.push(slot),
                            Slot::Missing => {}
                            Slot::Blocked => outcome.resolved = false,
                        }
                    }
                    next
                }
                Op::Filter { visitor, .. } => {
                    let Some(deps) = bindings.get(index) else {
                        return outcome;
                    };
                    focus
                        .into_iter()
                        .filter(|v| {
                            let value: &Value = v;
                            visitor(value, deps)
                        })
                        .collect()
                }
                Op::Traverse => focus
                    .into_iter()
                    .flat_map(|v| match v {
                        Value::Array(items) => items.iter_mut().collect::<Vec<_>>(),
                        _ => Vec::new(),
                    })
                    .collect(),
                Op::Transform { .. } => return SetOutcome::unsupported(),
            };
        }

        match &self.ops()[last] {
            Op::Root => {
                for value in focus {
                    write_slot(value, updater, &mut outcome);
                }
            }
            Op::Property(key) => {
                for value in focus {
                    write_property(value, key, updater, &mut outcome);
                }
            }
            Op::Filter { visitor, .. } => {
                let Some(deps) = bindings.get(last) else {
                    return outcome;
                };
                for value in focus {
                    if visitor(&*value, deps) {
                        write_slot(value, updater, &mut outcome);
                    }
                }
            }
            Op::Traverse => {
                for value in focus {
                    if let Value::Array(items) = value {
                        for item in items.iter_mut() {
                            write_slot(item, updater, &mut outcome);
                        }
                    }
                }
            }
            Op::Transform { .. } => return SetOutcome::unsupported(),
        }

        outcome
    }

    /// Delete every slot the path focuses from its container.
    ///
    /// - `Property`: removes the key (or splices the index of a list).
    /// - `Traverse`: empties the focused lists.
    /// - `Filter`: removes each match from the container it was found in,
    ///   which is the original list when a `Traverse` precedes it.
    /// - the root alone: resets each root to an empty object.
    pub fn remove(&self, roots: &mut [Value], bindings: &Bindings) -> RemoveOutcome {
        if !self.is_writable() {
            return RemoveOutcome::unsupported();
        }

        if self.is_root() {
            let mut outcome = RemoveOutcome::resolved();
            for root in roots.iter_mut() {
                if !matches!(root, Value::Object(map) if map.is_empty()) {
                    *root = Value::Object(Map::new());
                    outcome.removed += 1;
                }
            }
            return outcome;
        }

        let (targets, mut outcome) = self.locate_targets(roots, bindings);

        // Per parent list, how many elements were already spliced out.
        let mut offsets: HashMap<Location, usize> = HashMap::new();
        for target in targets {
            let Some((step, parent)) = target.split() else {
                outcome.resolved = false;
                continue;
            };
            let Some(container) = parent.resolve_mut(roots) else {
                outcome.resolved = false;
                continue;
            };
            match (container, step) {
                (Value::Array(items), Step::Index(i)) => {
                    let offset = offsets.entry(parent).or_insert(0);
                    if let Some(at) = i.checked_sub(*offset) {
                        if at < items.len() {
                            items.remove(at);
                            *offset += 1;
                            outcome.removed += 1;
                        }
                    }
                }
                (Value::Object(map), Step::Key(key)) => {
                    if map.remove(&key).is_some() {
                        outcome.removed += 1;
                    }
                }
                _ => outcome.resolved = false,
            }
        }

        outcome
    }

    /// Locations of every value the final op would delete, in walk order.
    fn locate_targets(&self, roots: &[Value], bindings: &Bindings) -> (Vec<Location>, RemoveOutcome) {
        let last = self.len() - 1;
        let mut outcome = RemoveOutcome::resolved();
        let mut focus: Vec<Located<'_>> = roots
            .iter()
            .enumerate()
            .map(|(root, value)| Located {
                at: Location::root(root),
                value,
            })
            .collect();

        for (index, op) in self.ops()[..last].iter().enumerate() {
            focus = match op {
                Op::Root => focus,
                Op::Property(key) => focus.into_iter().filter_map(|f| f.child(key)).collect(),
                Op::Filter { visitor, .. } => {
                    let Some(deps) = bindings.get(index) else {
                        return (Vec::new(), outcome);
                    };
                    focus.into_iter().filter(|f| visitor(f.value, deps)).collect()
                }
                Op::Traverse => focus.into_iter().flat_map(Located::elements).collect(),
                Op::Transform { .. } => return (Vec::new(), RemoveOutcome::unsupported()),
            };
        }

        let targets = match &self.ops()[last] {
            Op::Property(key) => focus
                .into_iter()
                .filter_map(|f| f.child(key))
                .map(|f| f.at)
                .collect(),
            Op::Traverse => focus
                .into_iter()
                .flat_map(Located::elements)
                .map(|f| f.at)
                .collect(),
            Op::Filter { visitor, .. } => {
                let Some(deps) = bindings.get(last) else {
                    return (Vec::new(), outcome);
                };
                focus
                    .into_iter()
                    .filter(|f| visitor(f.value, deps))
                    .map(|f| f.at)
                    .collect()
            }
            Op::Root => Vec::new(),
            Op::Transform { .. } => {
                outcome.resolved = false;
                Vec::new()
            }
        };

        (targets, outcome)
    }
}

/// Evaluate `path` against `roots`, resolving its dependencies against the
/// same roots without any caching.
pub fn evaluate(path: &Path, roots: &[Value]) -> Vec<Value> {
    let bindings = Bindings::resolve(path, |dep| evaluate(dep, roots).into_iter().next());
    path.get(roots, &bindings)
}

// --- Read helpers ---

fn lookup<'v>(value: &'v Value, key: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn child<'a>(value: Cow<'a, Value>, key: &str) -> Option<Cow<'a, Value>> {
    match value {
        Cow::Borrowed(v) => lookup(v, key).map(Cow::Borrowed),
        Cow::Owned(v) => lookup(&v, key).cloned().map(Cow::Owned),
    }
}

fn elements<'a>(value: Cow<'a, Value>) -> Vec<Cow<'a, Value>> {
    match value {
        Cow::Borrowed(Value::Array(items)) => items.iter().map(Cow::Borrowed).collect(),
        Cow::Owned(Value::Array(items)) => items.into_iter().map(Cow::Owned).collect(),
        _ => Vec::new(),
    }
}

// --- Write helpers ---

enum Slot<'a> {
    Found(&'a mut Value),
    Missing,
    /// The focus is a scalar; nothing can be stored under it.
    Blocked,
}

fn child_mut<'a>(value: &'a mut Value, key: &str, vivify: bool) -> Slot<'a> {
    if vivify && value.is_null() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => {
            if vivify {
                Slot::Found(map.entry(key).or_insert_with(|| Value::Object(Map::new())))
            } else {
                match map.get_mut(key) {
                    Some(slot) => Slot::Found(slot),
                    None => Slot::Missing,
                }
            }
        }
        Value::Array(items) => match key.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            Some(slot) => Slot::Found(slot),
            None => Slot::Missing,
        },
        Value::Null => Slot::Missing,
        _ => Slot::Blocked,
    }
}

fn write_slot(slot: &mut Value, updater: &dyn Fn(Option<&Value>) -> Value, outcome: &mut SetOutcome) {
    let next = updater(Some(&*slot));
    if *slot != next {
        *slot = next.clone();
        outcome.updated = true;
    }
    outcome.states.push(next);
}

fn write_property(
    container: &mut Value,
    key: &str,
    updater: &dyn Fn(Option<&Value>) -> Value,
    outcome: &mut SetOutcome,
) {
    if container.is_null() {
        *container = Value::Object(Map::new());
    }
    match container {
        Value::Object(map) => match map.get_mut(key) {
            Some(slot) => write_slot(slot, updater, outcome),
            None => {
                let next = updater(None);
                map.insert(key.to_string(), next.clone());
                outcome.updated = true;
                outcome.states.push(next);
            }
        },
        Value::Array(items) => match key.parse::<usize>() {
            Ok(i) if i < items.len() => write_slot(&mut items[i], updater, outcome),
            Ok(i) if i == items.len() => {
                let next = updater(None);
                items.push(next.clone());
                outcome.updated = true;
                outcome.states.push(next);
            }
            _ => outcome.resolved = false,
        },
        _ => outcome.resolved = false,
    }
}

// --- Locations ---

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Step {
    Key(String),
    Index(usize),
}

/// Position of a focused value: which root, then the keys/indices below it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Location {
    root: usize,
    steps: Vec<Step>,
}

impl Location {
    fn root(root: usize) -> Self {
        Self {
            root,
            steps: Vec::new(),
        }
    }

    fn with(&self, step: Step) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self {
            root: self.root,
            steps,
        }
    }

    /// Split into the last step and the location of its container.
    fn split(mut self) -> Option<(Step, Location)> {
        let step = self.steps.pop()?;
        Some((step, self))
    }

    fn resolve_mut<'r>(&self, roots: &'r mut [Value]) -> Option<&'r mut Value> {
        let mut current = roots.get_mut(self.root)?;
        for step in &self.steps {
            current = match step {
                Step::Key(key) => current.as_object_mut()?.get_mut(key)?,
                Step::Index(i) => current.as_array_mut()?.get_mut(*i)?,
            };
        }
        Some(current)
    }
}

struct Located<'a> {
    at: Location,
    value: &'a Value,
}

impl<'a> Located<'a> {
    fn child(&self, key: &str) -> Option<Located<'a>> {
        let value = lookup(self.value, key)?;
        let step = match self.value {
            Value::Array(_) => Step::Index(key.parse().ok()?),
            _ => Step::Key(key.to_string()),
        };
        Some(Located {
            at: self.at.with(step),
            value,
        })
    }

    fn elements(self) -> Vec<Located<'a>> {
        match self.value {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, value)| Located {
                    at: self.at.with(Step::Index(i)),
                    value,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::{Predicate, Projection};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn path(ops: Vec<Op>) -> Path {
        Path::new(ops)
    }

    fn id_above(n: i64) -> Predicate {
        Arc::new(move |v, _| v["id"].as_i64().map_or(false, |id| id > n))
    }

    fn users() -> Vec<Value> {
        vec![json!({"users": [{"id": 1}, {"id": 2}, {"id": 3}], "id": 2})]
    }

    fn set_to(value: Value) -> impl Fn(Option<&Value>) -> Value {
        move |_| value.clone()
    }

    #[test]
    fn test_get_property() {
        let roots = vec![json!({"a": {"b": {"c": 4}}})];
        let p = path(vec![Op::property("a"), Op::property("b"), Op::property("c")]);
        assert_eq!(evaluate(&p, &roots), vec![json!(4)]);
    }

    #[test]
    fn test_get_missing_is_empty() {
        let roots = vec![json!({})];
        let p = path(vec![Op::property("a"), Op::property("b")]);
        assert!(evaluate(&p, &roots).is_empty());
        // Reads never materialize containers.
        assert_eq!(roots[0], json!({}));
    }

    #[test]
    fn test_get_traverse_filter_transform() {
        let roots = users();
        let values = path(vec![Op::property("users"), Op::Traverse]);
        assert_eq!(evaluate(&values, &roots).len(), 3);

        let filtered = path(vec![
            Op::property("users"),
            Op::Traverse,
            Op::filter("above_one", id_above(1), vec![]),
        ]);
        assert_eq!(evaluate(&filtered, &roots), vec![json!({"id": 2}), json!({"id": 3})]);

        let plus_one: Projection = Arc::new(|v, _| json!(v["id"].as_i64().unwrap_or(0) + 1));
        let mapped = path(vec![
            Op::property("users"),
            Op::Traverse,
            Op::transform("plus_one", plus_one, vec![]),
        ]);
        assert_eq!(evaluate(&mapped, &roots), vec![json!(2), json!(3), json!(4)]);
    }

    #[test]
    fn test_filter_with_dependency() {
        let roots = users();
        let id = Arc::new(path(vec![Op::property("id")]));
        let same_id: Predicate = Arc::new(|v, deps| v["id"] == deps[0]);
        let p = path(vec![
            Op::property("users"),
            Op::Traverse,
            Op::filter("same_id", same_id, vec![id]),
        ]);
        assert_eq!(evaluate(&p, &roots), vec![json!({"id": 2})]);
    }

    #[test]
    fn test_unready_dependency_never_runs_visitor() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let visitor: Predicate = Arc::new(move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        });
        let missing = Arc::new(path(vec![Op::property("missing")]));
        let p = path(vec![
            Op::property("users"),
            Op::Traverse,
            Op::filter("any", visitor, vec![missing]),
        ]);

        let mut roots = users();
        assert!(evaluate(&p, &roots).is_empty());

        let bindings = Bindings::resolve(&p, |dep| evaluate(dep, &roots).into_iter().next());
        assert!(!bindings.is_ready());
        let outcome = p.set(&mut roots, &bindings, &set_to(json!(0)));
        assert!(!outcome.updated);
        let removed = p.remove(&mut roots, &bindings);
        assert_eq!(removed.removed, 0);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(roots, users());
    }

    #[test]
    fn test_set_vivifies_static_prefix() {
        let mut roots = vec![json!({})];
        let p = path(vec![
            Op::property("a"),
            Op::property("b"),
            Op::property("c"),
            Op::property("d"),
        ]);
        let outcome = p.set(&mut roots, &Bindings::default(), &set_to(json!(4)));
        assert!(outcome.updated);
        assert!(outcome.resolved);
        assert_eq!(roots[0], json!({"a": {"b": {"c": {"d": 4}}}}));
    }

    #[test]
    fn test_set_does_not_vivify_before_dynamic_steps() {
        let mut roots = vec![json!({})];
        let p = path(vec![Op::property("list"), Op::Traverse]);
        let outcome = p.set(&mut roots, &Bindings::default(), &set_to(json!(1)));
        assert!(!outcome.updated);
        assert_eq!(roots[0], json!({}));
    }

    #[test]
    fn test_set_equal_value_is_not_an_update() {
        let mut roots = vec![json!({"id": 3})];
        let p = path(vec![Op::property("id")]);
        let outcome = p.set(&mut roots, &Bindings::default(), &set_to(json!(3)));
        assert!(!outcome.updated);
        assert_eq!(outcome.states, vec![json!(3)]);
    }

    #[test]
    fn test_set_updater() {
        let mut roots = vec![json!({"id": 5})];
        let p = path(vec![Op::property("id")]);
        let decrement = |v: Option<&Value>| json!(v.and_then(Value::as_i64).unwrap_or(0) - 1);
        let outcome = p.set(&mut roots, &Bindings::default(), &decrement);
        assert!(outcome.updated);
        assert_eq!(roots[0]["id"], json!(4));
    }

    #[test]
    fn test_set_through_filter_writes_survivors() {
        let mut roots = users();
        let p = path(vec![
            Op::property("users"),
            Op::Traverse,
            Op::filter("above_one", id_above(1), vec![]),
        ]);
        let outcome = p.set(&mut roots, &Bindings::default(), &set_to(json!({"id": 0})));
        assert!(outcome.updated);
        assert_eq!(outcome.states.len(), 2);
        assert_eq!(roots[0]["users"], json!([{"id": 1}, {"id": 0}, {"id": 0}]));
    }

    #[test]
    fn test_set_through_transform_is_rejected() {
        let mut roots = users();
        let project: Projection = Arc::new(|v, _| v.clone());
        let p = path(vec![
            Op::property("users"),
            Op::transform("same", project, vec![]),
            Op::property("x"),
        ]);
        let outcome = p.set(&mut roots, &Bindings::default(), &set_to(json!(1)));
        assert!(!outcome.updated);
        assert!(!outcome.resolved);
        assert!(!p.remove(&mut roots, &Bindings::default()).resolved);
        assert_eq!(roots, users());
    }

    #[test]
    fn test_set_into_scalar_is_unresolved() {
        let mut roots = vec![json!({"a": 1})];
        let p = path(vec![Op::property("a"), Op::property("b")]);
        let outcome = p.set(&mut roots, &Bindings::default(), &set_to(json!(2)));
        assert!(!outcome.resolved);
        assert_eq!(roots[0], json!({"a": 1}));
    }

    #[test]
    fn test_remove_filtered_elements_from_original_list() {
        let mut roots = users();
        let p = path(vec![
            Op::property("users"),
            Op::Traverse,
            Op::filter("above_one", id_above(1), vec![]),
        ]);
        let outcome = p.remove(&mut roots, &Bindings::default());
        assert_eq!(outcome.removed, 2);
        assert_eq!(roots[0]["users"], json!([{"id": 1}]));
    }

    #[test]
    fn test_remove_keeps_survivor_order() {
        let mut roots = vec![json!({"xs": [1, 2, 3, 4, 5, 6]})];
        let even: Predicate = Arc::new(|v, _| v.as_i64().map_or(false, |n| n % 2 == 0));
        let p = path(vec![Op::property("xs"), Op::Traverse, Op::filter("even", even, vec![])]);
        p.remove(&mut roots, &Bindings::default());
        assert_eq!(roots[0]["xs"], json!([1, 3, 5]));
    }

    #[test]
    fn test_remove_traverse_clears_list() {
        let mut roots = users();
        let p = path(vec![Op::property("users"), Op::Traverse]);
        let outcome = p.remove(&mut roots, &Bindings::default());
        assert_eq!(outcome.removed, 3);
        assert_eq!(roots[0]["users"], json!([]));
    }

    #[test]
    fn test_remove_property() {
        let mut roots = vec![json!({"x": 1, "y": 2})];
        let p = path(vec![Op::property("x")]);
        assert_eq!(p.remove(&mut roots, &Bindings::default()).removed, 1);
        assert_eq!(roots[0], json!({"y": 2}));

        // Removing again is a resolved no-op.
        let again = p.remove(&mut roots, &Bindings::default());
        assert!(again.resolved);
        assert_eq!(again.removed, 0);
    }

    #[test]
    fn test_remove_filter_without_traverse_removes_focus() {
        let mut roots = vec![json!({"a": {"on": true}, "b": {"on": false}})];
        let on: Predicate = Arc::new(|v, _| v["on"] == json!(true));
        let p = path(vec![Op::property("a"), Op::filter("on", on, vec![])]);
        assert_eq!(p.remove(&mut roots, &Bindings::default()).removed, 1);
        assert_eq!(roots[0], json!({"b": {"on": false}}));
    }

    #[test]
    fn test_remove_nested_traversals() {
        let mut roots = vec![json!({"groups": [[1, 2, 3], [4, 5]]})];
        let odd: Predicate = Arc::new(|v, _| v.as_i64().map_or(false, |n| n % 2 == 1));
        let p = path(vec![
            Op::property("groups"),
            Op::Traverse,
            Op::Traverse,
            Op::filter("odd", odd, vec![]),
        ]);
        assert_eq!(p.remove(&mut roots, &Bindings::default()).removed, 3);
        assert_eq!(roots[0]["groups"], json!([[2], [4]]));
    }

    #[test]
    fn test_remove_root_resets() {
        let mut roots = vec![json!({"a": 1})];
        let p = path(vec![]);
        assert_eq!(p.remove(&mut roots, &Bindings::default()).removed, 1);
        assert_eq!(roots[0], json!({}));
    }
}
