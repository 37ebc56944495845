use cantun::frame::CanTunnelFrame;
use cantun::pool::{FramePool, INITIAL_POOL_SIZE};

#[test]
fn fresh_pool_seeds_itself_on_first_take() {
    let mut pool = FramePool::new();
    assert_eq!(pool.total_allocated(), 0);

    let _slot = pool.take();
    assert_eq!(pool.total_allocated(), INITIAL_POOL_SIZE);
    assert_eq!(pool.available(), INITIAL_POOL_SIZE - 1);
}

#[test]
fn pool_doubles_when_drained() {
    let mut pool = FramePool::new();
    pool.grow(INITIAL_POOL_SIZE);

    let mut taken: Vec<CanTunnelFrame> = Vec::new();
    for _ in 0..INITIAL_POOL_SIZE + 1 {
        taken.push(pool.take());
    }
    assert_eq!(pool.total_allocated(), 2 * INITIAL_POOL_SIZE);

    // Keep draining: the next doubling lands at 64.
    for _ in 0..INITIAL_POOL_SIZE {
        taken.push(pool.take());
    }
    assert_eq!(pool.total_allocated(), 4 * INITIAL_POOL_SIZE);
}

#[test]
fn accounting_covers_every_slot() {
    let mut pool = FramePool::new();
    pool.grow(INITIAL_POOL_SIZE);

    let mut in_use: Vec<CanTunnelFrame> = Vec::new();
    for _ in 0..5 {
        in_use.push(pool.take());
    }
    assert_eq!(pool.available() + in_use.len(), pool.total_allocated());

    pool.absorb(&mut in_use);
    assert!(in_use.is_empty());
    assert_eq!(pool.available(), pool.total_allocated());
}

#[test]
fn absorbed_slots_are_reused_without_growth() {
    let mut pool = FramePool::new();
    pool.grow(INITIAL_POOL_SIZE);

    for _ in 0..100 {
        let mut batch: Vec<CanTunnelFrame> = (0..INITIAL_POOL_SIZE).map(|_| pool.take()).collect();
        pool.absorb(&mut batch);
    }
    assert_eq!(pool.total_allocated(), INITIAL_POOL_SIZE);
}
