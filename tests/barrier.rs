//! Rendezvous barrier under load: all-or-nothing release, one leader per
//! cycle, and reuse across cycles.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use cpubind::prelude::*;

#[test]
fn every_cycle_releases_all_or_nothing() {
    const N: usize = 6;
    const CYCLES: usize = 200;
    let barrier = RendezvousBarrier::new(N);
    let arrived = AtomicUsize::new(0);
    let leaders = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..N {
            s.spawn(|| {
                for cycle in 0..CYCLES {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    let a = barrier.arrive_and_wait();
                    assert_eq!(a.generation(), cycle as u64);
                    assert!(arrived.load(Ordering::SeqCst) >= (cycle + 1) * N);
                    if a.is_leader() {
                        leaders.fetch_add(1, Ordering::SeqCst);
                    }
                }
            });
        }
    });

    assert_eq!(leaders.load(Ordering::SeqCst), CYCLES);
    assert_eq!(barrier.arrived(), 0);
}

#[test]
fn rendezvous_launch_publishes_after_every_worker_arrived() {
    const N: usize = 5;
    let barrier = RendezvousBarrier::new(N + 1);
    let token = SpinToken::unpublished((0..N).collect::<Vec<_>>()).unwrap();
    let before_release = AtomicUsize::new(0);

    thread::scope(|s| {
        for me in 0..N {
            let (barrier, token, before_release) = (&barrier, &token, &before_release);
            s.spawn(move || {
                before_release.fetch_add(1, Ordering::SeqCst);
                barrier.arrive_and_wait();
                token.wait_for_turn(me).unwrap();
                token.advance();
            });
        }
        barrier.arrive_and_wait();
        assert_eq!(before_release.load(Ordering::SeqCst), N);
        assert_eq!(token.state(), TurnState::Unpublished);
        assert!(token.publish());
    });

    assert_eq!(token.state(), TurnState::Finished);
}

#[test]
fn reset_barrier_is_reusable() {
    let mut barrier = RendezvousBarrier::new(2);
    thread::scope(|s| {
        s.spawn(|| barrier.arrive_and_wait());
        barrier.arrive_and_wait();
    });
    barrier.reset();
    assert_eq!(barrier.arrived(), 0);
    let generations: Vec<u64> = thread::scope(|s| {
        let other = s.spawn(|| barrier.arrive_and_wait().generation());
        let mine = barrier.arrive_and_wait().generation();
        vec![mine, other.join().unwrap()]
    });
    assert_eq!(generations, vec![1, 1]);
}
