// SPDX-License-Identifier: MIT

use super::{IdGen, RunId, SequentialIdGen, UuidIdGen};

#[test]
fn sequential_gen_counts_up() {
    let ids = SequentialIdGen::new("run");
    assert_eq!(ids.next(), "run-1");
    assert_eq!(ids.next(), "run-2");
    assert_eq!(ids.next(), "run-3");
}

#[test]
fn sequential_gen_clones_share_counter() {
    let a = SequentialIdGen::new("x");
    let b = a.clone();
    assert_eq!(a.next(), "x-1");
    assert_eq!(b.next(), "x-2");
}

#[test]
fn uuid_gen_is_unique() {
    let ids = UuidIdGen;
    assert_ne!(ids.next(), ids.next());
}

#[test]
fn id_newtype_compares_with_str() {
    let id = RunId::new("run-7");
    assert_eq!(id, *"run-7");
    assert_eq!(id.as_str(), "run-7");
    assert_eq!(id.to_string(), "run-7");
}

#[test]
fn id_newtype_round_trips_serde() {
    let id = RunId::new("run-7");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"run-7\"");
    let back: RunId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}
