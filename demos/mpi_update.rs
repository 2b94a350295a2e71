//! Four-process halo update over MPI.
//!
//! Run with `mpirun -n 4 cargo run --example mpi_update --features mpi-support`.
//! Rank 0 asks for global indices 250, 251, 252 and 300; ranks 2 and 3 own them.

use halo_update::prelude::*;

const NUM_OWNED: usize = 100;

fn main() -> Result<(), UpdateError> {
    let comm = MpiComm::new()?;
    let rank = comm.rank();
    let size = comm.size();
    if size != 4 {
        if rank == 0 {
            eprintln!("mpi_update expects 4 processes, got {size}");
        }
        return Ok(());
    }

    let needed: &[i64] = if rank == 0 { &[250, 251, 252, 300] } else { &[] };
    let mut ctx = UpdateContext::new(comm);
    let id = ctx.setup(0, (rank * NUM_OWNED) as u64, NUM_OWNED, needed)?;

    let start = rank * NUM_OWNED;
    let mut data: Vec<f64> = (0..ctx.required_len(id)?)
        .map(|i| if i < NUM_OWNED { (start + i) as f64 } else { -1.0 })
        .collect();
    ctx.update(&mut data, id)?;

    if rank == 0 {
        println!("rank 0 received {:?}", &data[NUM_OWNED..]);
    }
    let plan = ctx.plan(id)?;
    for part in plan.descriptors(ElementSize::Eight).send() {
        println!("rank {rank} sends {:?} to rank {}", part.blocks, part.rank);
    }

    ctx.free(id)?;
    ctx.comm().barrier();
    Ok(())
}
