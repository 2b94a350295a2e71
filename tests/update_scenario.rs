#![cfg(feature = "rayon")]
mod util;
use util::*;

use halo_update::prelude::*;

const NUM_OWNED: usize = 100;

fn needed_for(rank: usize) -> &'static [i64] {
    if rank == 0 { &[250, 251, 252, 300] } else { &[] }
}

#[test]
fn four_ranks_fetch_from_two_owners() {
    let out = spmd(4, |comm| {
        let me = comm.rank();
        let mut ctx = UpdateContext::new(comm);
        let id = ctx
            .setup(0, (me * NUM_OWNED) as u64, NUM_OWNED, needed_for(me))
            .unwrap();
        let mut buf = owned_buffer(me, NUM_OWNED, ctx.plan(id).unwrap().num_needed(), 0);
        ctx.update(&mut buf, id).unwrap();

        let plan = ctx.plan(id).unwrap();
        let to_rank0 = plan
            .descriptors(ElementSize::Eight)
            .send()
            .iter()
            .find(|p| p.rank == 0)
            .map(|p| p.blocks.clone());
        let summary = ctx.summary(id).unwrap();
        ctx.free(id).unwrap();
        (buf, to_rank0, summary)
    });

    let (buf0, _, s0) = &out[0];
    assert_eq!(s0.partners_recv, vec![2, 3]);
    assert_eq!(s0.recv_counts, vec![3, 1]);
    assert_eq!(
        &buf0[100..104],
        &[value_of(250), value_of(251), value_of(252), value_of(300)]
    );

    let (_, blocks2, s2) = &out[2];
    assert_eq!(blocks2, &Some(vec![Block { offset: 50, length: 3 }]));
    assert_eq!(s2.partners_send, vec![0]);
    assert_eq!(s2.send_counts, vec![3]);

    let (_, blocks3, _) = &out[3];
    assert_eq!(blocks3, &Some(vec![Block { offset: 0, length: 1 }]));

    let (buf1, blocks1, s1) = &out[1];
    assert_eq!(buf1.len(), NUM_OWNED);
    assert!(blocks1.is_none());
    assert!(s1.partners_recv.is_empty() && s1.partners_send.is_empty());
}

#[test]
fn owners_report_their_send_indices() {
    let out = spmd(4, |comm| {
        let me = comm.rank();
        let mut ctx = UpdateContext::new(comm);
        let id = ctx
            .setup(0, (me * NUM_OWNED) as u64, NUM_OWNED, needed_for(me))
            .unwrap();
        let n = ctx.num_indices(id).unwrap();
        let mut local = vec![usize::MAX; n + 2];
        let written = ctx.local_indices(id, &mut local).unwrap();
        local.truncate(written);
        (n, local)
    });
    assert_eq!(out[0], (0, vec![]));
    assert_eq!(out[1], (0, vec![]));
    assert_eq!(out[2], (3, vec![50, 51, 52]));
    assert_eq!(out[3], (1, vec![0]));
}

#[test]
fn repeated_updates_track_owned_data() {
    let out = spmd(3, |comm| {
        let me = comm.rank();
        let needed: Vec<i64> = vec![((me + 1) % 3 * 10 + 4) as i64, ((me + 2) % 3 * 10) as i64];
        let mut ctx = UpdateContext::new(comm);
        let id = ctx.setup(7, (me * 10) as u64, 10, &needed).unwrap();
        let mut buf = owned_buffer(me, 10, 2, 0);

        ctx.update(&mut buf, id).unwrap();
        let first = buf[10..].to_vec();
        ctx.update(&mut buf, id).unwrap();
        let second = buf[10..].to_vec();

        // owners bump their data; the next update must see the new values
        for v in &mut buf[..10] {
            *v += 1;
        }
        ctx.update(&mut buf, id).unwrap();
        let third = buf[10..].to_vec();
        (needed, first, second, third)
    });

    for (me, (needed, first, second, third)) in out.into_iter().enumerate() {
        let want = expected_tail(me, 10, &needed);
        assert_eq!(first, want);
        assert_eq!(second, want);
        assert_eq!(third, want.iter().map(|v| v + 1).collect::<Vec<_>>());
    }
}

#[test]
fn one_plan_serves_several_element_sizes() {
    let out = spmd(2, |comm| {
        let me = comm.rank();
        let needed = [((1 - me) * 8 + 3) as i64, ((1 - me) * 8 + 4) as i64];
        let mut ctx = UpdateContext::new(comm);
        let id = ctx.setup(0, (me * 8) as u64, 8, &needed).unwrap();

        let mut words: Vec<u32> = (0..10).map(|i| (me * 8 + i) as u32).collect();
        ctx.update(&mut words, id).unwrap();

        let mut doubles: Vec<f64> = (0..10).map(|i| (me * 8 + i) as f64 * 0.5).collect();
        ctx.update(&mut doubles, id).unwrap();

        let mut raw: Vec<u8> = (0..10u16)
            .flat_map(|i| (me as u16 * 8 + i).to_le_bytes())
            .collect();
        ctx.update_kind(&mut raw, ElementKind::Short, id).unwrap();
        let shorts: Vec<u16> = raw
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect();

        let cached = ctx.summary(id).unwrap().cached_sizes;
        (words, doubles, shorts, cached)
    });

    let (w0, d0, s0, cached0) = &out[0];
    assert_eq!(&w0[8..], &[11, 12]);
    assert_eq!(&d0[8..], &[5.5, 6.0]);
    assert_eq!(&s0[8..], &[11, 12]);
    assert_eq!(cached0, &vec![2, 4, 8]);

    let (w1, ..) = &out[1];
    assert_eq!(&w1[8..], &[3, 4]);
}
