//! Contention scenarios: many threads, few keys.

mod common;

use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use common::*;
use depot::Desc;

const THREADS: usize = 16;
const KEYS: usize = 12;
const TASKS: usize = 480;

fn counter_desc(key: usize) -> Desc<Counter> {
    Desc::builder(format!("counter-{key}")).tag("load").build()
}

fn tally_desc(key: usize) -> Desc<Tally> {
    Desc::builder(format!("tally-{key}")).tag("load").build()
}

#[test]
fn exactly_one_put_if_absent_wins() {
    let dir = tempfile::tempdir().unwrap();
    let depot = open(dir.path());
    let desc: Desc<Tally> = Desc::builder("race").build();
    let barrier = Barrier::new(THREADS);

    let results: Vec<(u64, Option<Arc<Tally>>)> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS as u64)
            .map(|i| {
                let (depot, desc, barrier) = (&depot, &desc, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    (i, depot.put_if_absent(desc, Arc::new(Tally { n: i })).unwrap())
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<u64> = results
        .iter()
        .filter(|(_, r)| r.is_none())
        .map(|(i, _)| *i)
        .collect();
    assert_eq!(winners.len(), 1);
    let winner = winners[0];
    for (_, existing) in results.iter().filter(|(_, r)| r.is_some()) {
        assert_eq!(existing.as_ref().unwrap().n, winner);
    }

    depot.flush();
    depot.cache().clear();
    assert_eq!(depot.get(&desc).unwrap().unwrap().n, winner);
}

#[test]
fn shared_counters_lose_no_increments() {
    let dir = tempfile::tempdir().unwrap();
    {
        let depot = open(dir.path());
        thread::scope(|s| {
            for t in 0..THREADS {
                let depot = &depot;
                s.spawn(move || {
                    for task in (t..TASKS).step_by(THREADS) {
                        let desc = counter_desc(task % KEYS);
                        let counter = depot.get_or_compute(&desc, Counter::default).unwrap();
                        counter.0.fetch_add(1, Ordering::SeqCst);
                        depot.put(&desc, counter).unwrap();
                    }
                });
            }
        });
        depot.close();
    }

    let depot = open(dir.path());
    let total: u64 = (0..KEYS)
        .map(|k| depot.get(&counter_desc(k)).unwrap().unwrap().value())
        .sum();
    assert_eq!(total, TASKS as u64);
}

#[test]
fn locked_read_modify_write_loses_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let depot = open(dir.path());
    thread::scope(|s| {
        for t in 0..THREADS {
            let depot = &depot;
            s.spawn(move || {
                for task in (t..TASKS).step_by(THREADS) {
                    let desc = tally_desc(task % KEYS);
                    let _guard = depot.lock(&desc);
                    let n = depot.get(&desc).unwrap().map_or(0, |t| t.n);
                    depot.put(&desc, Arc::new(Tally { n: n + 1 })).unwrap();
                }
            });
        }
    });
    depot.flush();
    depot.cache().clear();

    let total: u64 = (0..KEYS)
        .map(|k| depot.get(&tally_desc(k)).unwrap().unwrap().n)
        .sum();
    assert_eq!(total, TASKS as u64);
    assert_eq!(depot.dropped_writes(), 0);
}

#[test]
fn a_held_key_does_not_block_other_keys() {
    let dir = tempfile::tempdir().unwrap();
    let depot = open(dir.path());
    let held = tally_desc(0);
    let _guard = depot.lock(&held);

    let (tx, rx) = mpsc::channel();
    thread::scope(|s| {
        let depot = &depot;
        s.spawn(move || {
            let other = tally_desc(1);
            depot.put(&other, Arc::new(Tally { n: 1 })).unwrap();
            tx.send(depot.get(&other).unwrap().unwrap().n).unwrap();
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
    });
}
