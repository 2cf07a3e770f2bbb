//! End-to-end scenarios exercising the runtime's public surface across several
//! simulated ranks at once, each rank a real OS thread over one `LocalSubstrate`.

use onesided_rt::datatype::Datatype;
use onesided_rt::group::Group;
use onesided_rt::mutex::queue::QueueMutexGroup;
use onesided_rt::rma::{self, RmwOp};
use onesided_rt::scale::Scale;
use onesided_rt::strided::StrideShape;
use onesided_rt::substrate::LocalSubstrate;
use onesided_rt::{config, gmr};

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn with_config(f: impl FnOnce()) {
    config::set(config::Config::default());
    f();
    config::clear();
}

/// S1: two ranks, a 16-byte put round-trip.
#[test]
fn s1_contiguous_put_round_trip() {
    with_config(|| {
        let subs = LocalSubstrate::world(2);
        let handles: Vec<_> = subs
            .into_iter()
            .map(|s| {
                thread::spawn(move || {
                    let g = Group::from_substrate(s, 2);
                    let (_h, addrs) = gmr::create(&g, 2, 16).unwrap();
                    g.substrate().barrier().unwrap();

                    if g.rank() == 0 {
                        let src: Vec<u8> = (1..=16u8).collect();
                        rma::put(1, addrs[1], &src).unwrap();
                    }
                    g.substrate().barrier().unwrap();
                    if g.rank() == 1 {
                        let mut dst = [0u8; 16];
                        rma::get(1, addrs[1], &mut dst).unwrap();
                        let expected: Vec<u8> = (1..=16u8).collect();
                        assert_eq!(&dst[..], &expected[..]);
                    }
                    g.substrate().barrier().unwrap();
                    gmr::destroy_all();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    });
}

/// S2: four ranks, each accumulates `rank + 1` as an int32 into every peer's
/// allocation (including its own); every slice converges on `1+2+3+4 = 10`.
#[test]
fn s2_accumulate_converges_to_sum() {
    with_config(|| {
        let n = 4;
        let subs = LocalSubstrate::world(n);
        let handles: Vec<_> = subs
            .into_iter()
            .map(|s| {
                thread::spawn(move || {
                    let g = Group::from_substrate(s, n);
                    let (_h, addrs) = gmr::create(&g, n, 4).unwrap();
                    g.substrate().barrier().unwrap();

                    if g.rank() == 0 {
                        rma::put(0, addrs[0], &0i32.to_ne_bytes()).unwrap();
                    }
                    for peer in 0..n {
                        if peer == 0 {
                            continue;
                        }
                        if g.rank() == peer {
                            rma::put(peer, addrs[peer], &0i32.to_ne_bytes()).unwrap();
                        }
                    }
                    g.substrate().barrier().unwrap();

                    let contribution = (g.rank() as i32 + 1).to_ne_bytes();
                    for peer in 0..n {
                        rma::acc(peer, addrs[peer], Datatype::I32, Scale::Real(1.0), &contribution).unwrap();
                    }
                    g.substrate().barrier().unwrap();

                    let mut out = [0u8; 4];
                    rma::get(g.rank(), addrs[g.rank()], &mut out).unwrap();
                    assert_eq!(i32::from_ne_bytes(out), 10);

                    g.substrate().barrier().unwrap();
                    gmr::destroy_all();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    });
}

/// S3: strided put of a 4x4 int32 block from rank 0 into rank 1's allocation at a
/// displacement of 8 bytes (2 ints), tightly packed on both sides.
#[test]
fn s3_strided_put_lands_at_offset() {
    with_config(|| {
        let subs = LocalSubstrate::world(2);
        let handles: Vec<_> = subs
            .into_iter()
            .map(|s| {
                thread::spawn(move || {
                    let g = Group::from_substrate(s, 2);
                    // 4 rows * 16 bytes/row, plus 8 bytes of leading padding at rank 1.
                    let (_h, addrs) = gmr::create(&g, 2, 8 + 4 * 16).unwrap();
                    g.substrate().barrier().unwrap();

                    if g.rank() == 0 {
                        rma::put(1, addrs[1], &vec![0u8; 8 + 4 * 16]).unwrap();
                    }
                    g.substrate().barrier().unwrap();

                    if g.rank() == 0 {
                        let src: Vec<i32> = (0..16).collect();
                        let src_bytes: Vec<u8> = src.iter().flat_map(|v| v.to_ne_bytes()).collect();
                        let src_shape = StrideShape { count: vec![16, 4], stride: vec![16] };
                        let dst_shape = StrideShape { count: vec![16, 4], stride: vec![16] };
                        rma::put_strided(1, addrs[1] + 8, &src_bytes, &src_shape, &dst_shape).unwrap();
                    }
                    g.substrate().barrier().unwrap();

                    if g.rank() == 1 {
                        let mut whole = vec![0u8; 8 + 4 * 16];
                        rma::get(1, addrs[1], &mut whole).unwrap();
                        for row in 0..4 {
                            let row_bytes = &whole[8 + row * 16..8 + row * 16 + 16];
                            for col in 0..4 {
                                let v = i32::from_ne_bytes(row_bytes[col * 4..col * 4 + 4].try_into().unwrap());
                                assert_eq!(v, (row * 4 + col) as i32);
                            }
                        }
                    }
                    g.substrate().barrier().unwrap();
                    gmr::destroy_all();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    });
}

/// S4: ten ranks each fetch-and-add 1000 times into rank 0's counter; the final
/// value is `10 * 1000 = 10000`.
#[test]
fn s4_fetch_add_totals_across_ranks() {
    with_config(|| {
        let n = 10;
        let subs = LocalSubstrate::world(n);
        let handles: Vec<_> = subs
            .into_iter()
            .map(|s| {
                thread::spawn(move || {
                    let g = Group::from_substrate(s, n);
                    let (_h, addrs) = gmr::create(&g, n, 4).unwrap();
                    g.substrate().barrier().unwrap();

                    if g.rank() == 0 {
                        rma::put(0, addrs[0], &0i32.to_ne_bytes()).unwrap();
                    }
                    g.substrate().barrier().unwrap();

                    for _ in 0..1000 {
                        rma::rmw(RmwOp::FetchAddI32, 0, addrs[0], &1i32.to_ne_bytes()).unwrap();
                    }
                    g.substrate().barrier().unwrap();

                    if g.rank() == 0 {
                        let mut out = [0u8; 4];
                        rma::get(0, addrs[0], &mut out).unwrap();
                        assert_eq!(i32::from_ne_bytes(out), 10_000);
                    }
                    g.substrate().barrier().unwrap();
                    gmr::destroy_all();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    });
}

/// S5: algorithm Q over 3 ranks. Rank 0 holds the mutex; ranks 1 and 2 queue
/// behind it concurrently. The circular scan starting at `(0+1) mod 3` must
/// service rank 1 first, then rank 2.
#[test]
fn s5_queue_mutex_services_successor_in_rank_order() {
    let n = 3;
    let subs = LocalSubstrate::world(n);
    let order: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));

    let handles: Vec<_> = subs
        .into_iter()
        .map(|s| {
            let order = order.clone();
            thread::spawn(move || {
                let g = Group::from_substrate(s, n);
                let mg = QueueMutexGroup::create(&g, 1).unwrap();
                g.substrate().barrier().unwrap();

                if g.rank() == 0 {
                    mg.lock(0, 0).unwrap();
                }
                g.substrate().barrier().unwrap();

                if g.rank() == 0 {
                    // Give ranks 1 and 2 time to both queue behind us.
                    thread::sleep(Duration::from_millis(100));
                    mg.unlock(0, 0).unwrap();
                } else {
                    mg.lock(0, 0).unwrap();
                    order.lock().unwrap().push(g.rank());
                    mg.unlock(0, 0).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(*order.lock().unwrap(), vec![1, 2]);
}

/// S6: an IOV put of 8 disjoint 128-byte segments; the overlap-checked `Safe`
/// path and the unchecked vectored `Dtype` path must land byte-identical data.
#[test]
fn s6_iov_safe_and_dtype_paths_agree() {
    with_config(|| {
        let subs = LocalSubstrate::world(1);
        let s = subs.into_iter().next().unwrap();
        let g = Group::from_substrate(s, 1);
        let (_h, addrs) = gmr::create(&g, 1, 8 * 128).unwrap();

        let src: Vec<u8> = (0..8 * 128u32).map(|i| (i % 251) as u8).collect();
        let entries: Vec<onesided_rt::iov::IovEntry> = (0..8)
            .map(|i| onesided_rt::iov::IovEntry {
                src_offset: i * 128,
                dst_offset: i * 128,
                len: 128,
            })
            .collect();

        config::set(config::Config { iov_method: config::IovMethod::Safe, ..config::Config::default() });
        rma::put_iov(0, addrs[0], &src, &entries).unwrap();
        let mut via_safe = vec![0u8; 8 * 128];
        rma::get(0, addrs[0], &mut via_safe).unwrap();

        rma::put(0, addrs[0], &vec![0u8; 8 * 128]).unwrap();
        config::set(config::Config { iov_method: config::IovMethod::Dtype, ..config::Config::default() });
        rma::put_iov(0, addrs[0], &src, &entries).unwrap();
        let mut via_dtype = vec![0u8; 8 * 128];
        rma::get(0, addrs[0], &mut via_dtype).unwrap();

        assert_eq!(via_safe, via_dtype);
        gmr::destroy_all();
    });
}
