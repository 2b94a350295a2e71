#![allow(dead_code)]
use halo_update::algs::communicator::RayonComm;

/// Value every test world stores at global index `g`.
pub fn value_of(global: u64) -> u64 {
    global * 1_000 + 7
}

/// Run `op` on every rank of a fresh in-process world.
pub fn spmd<R, F>(size: usize, op: F) -> Vec<R>
where
    F: Fn(RayonComm) -> R + Sync,
    R: Send,
{
    RayonComm::spmd(size, op).expect("failed to build SPMD thread pool")
}

/// Owned block of `rank` filled with [`value_of`], followed by `tail` slots of `fill`.
pub fn owned_buffer(rank: usize, num_owned: usize, tail: usize, fill: u64) -> Vec<u64> {
    let start = (rank * num_owned) as u64;
    (0..num_owned as u64)
        .map(|i| value_of(start + i))
        .chain(std::iter::repeat_n(fill, tail))
        .collect()
}

/// What the receive region of `rank` must hold after an Update.
pub fn expected_tail(rank: usize, num_owned: usize, needed: &[i64]) -> Vec<u64> {
    let mine = (rank * num_owned) as i64..((rank + 1) * num_owned) as i64;
    let mut remote: Vec<i64> = needed.iter().copied().filter(|g| !mine.contains(g)).collect();
    remote.sort_unstable();
    remote.dedup();
    remote.into_iter().map(|g| value_of(g as u64)).collect()
}
