//! Integration tests for queries over a live store.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use zstate::{Query, Store};

fn users_store() -> Store {
    Store::new(json!({"users": [{"id": 1}, {"id": 2}, {"id": 3}]}))
}

fn id_above(query: &Query, min: i64) -> Query {
    query.filter(&format!("id>{}", min), &[], move |user, _| {
        user["id"].as_i64().map_or(false, |id| id > min)
    })
}

// --- Navigation & memoization ---

#[test]
fn test_identical_navigation_yields_same_handle() {
    let store = Store::new(json!({}));
    let first = store.state().get("a").get("b").get("c");
    let second = store.state().get("a").get("b").get("c");
    assert_eq!(first, second);
    assert_eq!(first.key(), "a.b.c");

    let users = store.state().get("users").values();
    assert_eq!(users.key(), "users.$values");
    assert_eq!(id_above(&users, 1), id_above(&users, 1));
    assert_eq!(id_above(&users, 1).key(), "users.$values.$filter(id>1, [])");
}

#[test]
fn test_separate_stores_do_not_share_handles() {
    let one = Store::new(json!({"a": 1}));
    let two = Store::new(json!({"a": 2}));
    assert_ne!(one.state().get("a"), two.state().get("a"));
    assert_eq!(one.state().get("a").read(), Some(json!(1)));
    assert_eq!(two.state().get("a").read(), Some(json!(2)));
}

// --- Reads ---

#[test]
fn test_read_missing_is_none_and_does_not_mutate() {
    let store = Store::new(json!({"a": {}}));
    assert_eq!(store.state().get("a").get("b").get("c").read(), None);
    assert!(store.state().get("x").at(0).all().is_empty());
    assert_eq!(store.snapshot(), json!({"a": {}}));
}

#[test]
fn test_null_is_a_present_value() {
    let store = Store::new(json!({"a": null}));
    assert_eq!(store.state().get("a").read(), Some(Value::Null));
    assert_eq!(store.state().get("a").or_default(1), Value::Null);
    assert_eq!(store.state().get("b").or_default(1), json!(1));
}

#[test]
fn test_values_filter_returns_matching_subsequence() {
    let store = Store::new(json!({"xs": [5, 1, 8, 3, 9]}));
    let xs = store.state().get("xs").values();
    let big = xs.filter("big", &[], |x, _| x.as_i64().map_or(false, |x| x > 4));
    assert_eq!(big.all(), vec![json!(5), json!(8), json!(9)]);
    assert_eq!(big.read(), Some(json!(5)));
}

#[test]
fn test_map_projects_each_value() {
    let store = users_store();
    let ids = store
        .state()
        .get("users")
        .values()
        .map("id", &[], |user, _| user["id"].clone());
    assert_eq!(ids.all(), vec![json!(1), json!(2), json!(3)]);
}

#[test]
fn test_filter_with_dependency() {
    let store = users_store();
    let selected = store.state().get("selected");
    let calls = Arc::new(AtomicUsize::new(0));

    let counted = Arc::clone(&calls);
    let user = store
        .state()
        .get("users")
        .values()
        .filter("selected", &[selected.clone()], move |user, deps| {
            counted.fetch_add(1, Ordering::SeqCst);
            user["id"] == deps[0]
        });

    // Unready dependency: empty result, predicate never runs.
    assert!(user.all().is_empty());
    assert_eq!(user.read(), None);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    selected.write(2);
    assert_eq!(user.all(), vec![json!({"id": 2})]);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_repeated_reads_hit_the_cache() {
    let store = users_store();
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    let big = store
        .state()
        .get("users")
        .values()
        .filter("counted", &[], move |user, _| {
            counted.fetch_add(1, Ordering::SeqCst);
            user["id"].as_i64() > Some(1)
        });

    let first = big.all();
    let after_first = calls.load(Ordering::SeqCst);
    assert_eq!(after_first, 3);

    let second = big.all();
    assert_eq!(big.read(), Some(json!({"id": 2})));
    assert_eq!(first, second);
    assert_eq!(calls.load(Ordering::SeqCst), after_first);

    // A write invalidates.
    store.state().get("users").at(0).set("id", 7);
    assert_eq!(big.all().len(), 3);
    assert_eq!(calls.load(Ordering::SeqCst), after_first + 3);
}

// --- Writes ---

#[test]
fn test_write_creates_missing_containers() {
    let store = Store::new(json!({}));
    assert!(store.state().get("a").get("b").get("c").write(1));
    assert_eq!(store.snapshot(), json!({"a": {"b": {"c": 1}}}));
}

#[test]
fn test_equal_write_is_not_a_change() {
    let store = Store::new(json!({"a": 1}));
    let a = store.state().get("a");
    let calls = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&calls);
    store.on(&[a.clone()], move |_| {
        counted.fetch_add(1, Ordering::SeqCst);
    });

    assert!(!a.write(1));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(store.stats().revision, 0);

    assert!(a.write(2));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_update_through_filter() {
    let store = users_store();
    let big = id_above(&store.state().get("users").values(), 1);
    assert!(big.update(|user| {
        let mut user = user.cloned().unwrap_or_default();
        user["seen"] = json!(true);
        user
    }));
    assert_eq!(
        store.snapshot(),
        json!({"users": [{"id": 1}, {"id": 2, "seen": true}, {"id": 3, "seen": true}]})
    );
}

#[test]
fn test_write_through_map_is_rejected() {
    let store = Store::new(json!({"a": 1}));
    let doubled = store
        .state()
        .get("a")
        .map("double", &[], |v, _| json!(v.as_i64().unwrap_or(0) * 2));
    assert_eq!(doubled.read(), Some(json!(2)));
    assert!(!doubled.write(5));
    assert!(!doubled.remove());
    assert_eq!(store.snapshot(), json!({"a": 1}));
}

// --- Removal ---

#[test]
fn test_delete_filtered_users() {
    let store = users_store();
    let big = id_above(&store.state().get("users").values(), 1);
    assert!(big.remove());
    assert_eq!(store.state().get("users").read(), Some(json!([{"id": 1}])));
    assert!(big.all().is_empty());
}

#[test]
fn test_delete_keeps_survivor_order() {
    let store = Store::new(json!({"xs": [1, 2, 3, 4, 5, 6]}));
    let odd = store
        .state()
        .get("xs")
        .values()
        .filter("odd", &[], |x, _| x.as_i64().map_or(false, |x| x % 2 == 1));
    odd.remove();
    assert_eq!(store.state().get("xs").read(), Some(json!([2, 4, 6])));
}

#[test]
fn test_delete_property_and_index() {
    let store = Store::new(json!({"a": {"b": 1, "c": 2}, "xs": [1, 2, 3]}));
    assert!(store.state().get("a").delete("b"));
    assert!(store.state().get("xs").at(1).remove());
    assert_eq!(store.snapshot(), json!({"a": {"c": 2}, "xs": [1, 3]}));
}

#[test]
fn test_remove_values_clears_list() {
    let store = users_store();
    store.state().get("users").values().remove();
    assert_eq!(store.snapshot(), json!({"users": []}));
}

#[test]
fn test_remove_root_resets_state() {
    let store = users_store();
    assert!(store.state().remove());
    assert_eq!(store.snapshot(), json!({}));
}

#[test]
fn test_filter_without_values_removes_focus() {
    let store = Store::new(json!({"user": {"admin": true}, "other": 1}));
    let admin = store
        .state()
        .get("user")
        .filter("admin", &[], |u, _| u["admin"] == json!(true));
    assert!(admin.remove());
    assert_eq!(store.snapshot(), json!({"other": 1}));
}

// --- Listeners ---

#[test]
fn test_listener_sees_descendant_writes() {
    let store = Store::new(json!({"a": {"b": 1}}));
    let a = store.state().get("a");
    let ab = a.get("b");
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let sink = Arc::clone(&seen);
    store.on(&[ab.clone()], move |values| sink.lock().push(values.to_vec()));

    // Writing the parent notifies the child's listeners.
    a.write(json!({"b": 2}));
    ab.write(3);
    assert_eq!(
        *seen.lock(),
        vec![vec![Some(json!(2))], vec![Some(json!(3))]]
    );
}

#[test]
fn test_watch_receives_changes() {
    let store = Store::new(json!({"a": 1}));
    let a = store.state().get("a");
    let watch = store.watch(&[a.clone()]);

    a.write(2);
    a.write(2);
    a.write(3);

    let events = watch.drain();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].value("a"), Some(&json!(2)));
    assert_eq!(events[1].values, vec![Some(json!(3))]);

    assert_eq!(store.stats().listeners, 1);
    drop(watch);
    assert_eq!(store.stats().listeners, 0);
}

#[test]
fn test_watch_drops_when_full() {
    let store = Store::with_config(
        json!({"n": 0}),
        zstate::StoreConfig {
            watch_buffer_size: 2,
            ..Default::default()
        },
    );
    let n = store.state().get("n");
    let watch = store.watch(&[n.clone()]);
    for i in 1..=5 {
        n.write(i);
    }
    let values: Vec<_> = watch.drain().into_iter().map(|e| e.values[0].clone()).collect();
    assert_eq!(values, vec![Some(json!(1)), Some(json!(2))]);
}
