//! End-to-end scenarios exercising the scheduler, channels, select, MPMC
//! queue, and async sockets together, each in its own OS thread so every
//! scenario gets a fresh [`Scheduler`] (only one may be installed per thread).

use std::cell::RefCell;
use std::net::SocketAddr;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use weave_rt::{Channel, Mpmc, RecvCase, RingConfig, Scheduler, SchedulerConfig, Select};

/// Two coroutines volley a counter over two unbuffered channels three times.
#[test]
fn ping_pong_volley() {
    thread::spawn(|| {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let ping = Channel::<u32>::new(0);
        let pong = Channel::<u32>::new(0);
        let last_ping = Rc::new(RefCell::new(0u32));
        let last_pong = Rc::new(RefCell::new(0u32));

        {
            let ping = ping.clone();
            let pong = pong.clone();
            let last_ping = Rc::clone(&last_ping);
            let last_pong = Rc::clone(&last_pong);
            scheduler.spawn(move || {
                for i in 1..=3 {
                    ping.send(i).unwrap();
                    *last_ping.borrow_mut() = i;
                    *last_pong.borrow_mut() = pong.recv().unwrap();
                }
            });
        }
        {
            let ping = ping.clone();
            let pong = pong.clone();
            scheduler.spawn(move || {
                for _ in 1..=3 {
                    let x = ping.recv().unwrap();
                    pong.send(x * 10).unwrap();
                }
            });
        }
        scheduler.run_all();
        assert_eq!(*last_ping.borrow(), 3);
        assert_eq!(*last_pong.borrow(), 30);
    })
    .join()
    .unwrap();
}

/// Three stages connected by two unbuffered channels: square then sum 1..=100.
#[test]
fn three_stage_pipeline() {
    thread::spawn(|| {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let numbers = Channel::<u64>::new(0);
        let squares = Channel::<u64>::new(0);
        let sum = Rc::new(RefCell::new(0u64));

        {
            let numbers = numbers.clone();
            scheduler.spawn(move || {
                for i in 1..=100u64 {
                    numbers.send(i).unwrap();
                }
                numbers.close().unwrap();
            });
        }
        {
            let numbers = numbers.clone();
            let squares = squares.clone();
            scheduler.spawn(move || loop {
                match numbers.recv() {
                    Ok(i) => squares.send(i * i).unwrap(),
                    Err(_) => {
                        squares.close().unwrap();
                        break;
                    }
                }
            });
        }
        {
            let squares = squares.clone();
            let sum = Rc::clone(&sum);
            scheduler.spawn(move || loop {
                match squares.recv() {
                    Ok(s) => *sum.borrow_mut() += s,
                    Err(_) => break,
                }
            });
        }
        scheduler.run_all();
        assert_eq!(*sum.borrow(), 338_350);
    })
    .join()
    .unwrap();
}

/// A capacity-3 buffered channel fills, rejects a fourth send, then drains
/// in FIFO order.
#[test]
fn buffered_fifo_fills_and_drains() {
    let ch = Channel::<u32>::new(3);
    assert!(ch.try_send(1).is_ok());
    assert!(ch.try_send(2).is_ok());
    assert!(ch.try_send(3).is_ok());
    assert!(ch.try_send(4).is_err());

    assert_eq!(ch.try_recv().unwrap(), 1);
    assert_eq!(ch.try_recv().unwrap(), 2);
    assert_eq!(ch.try_recv().unwrap(), 3);
    assert!(ch.try_recv().is_err());
}

/// Four producer threads push disjoint id ranges into a shared MPMC queue;
/// the single consumer's popped set equals their union, with no duplicates
/// or drops.
#[test]
fn mpmc_four_producers_one_consumer() {
    const PER_PRODUCER: u64 = 1000;
    const PRODUCERS: u64 = 4;
    let queue = Arc::new(Mpmc::<u64>::new(RingConfig::new(8))); // 256 slots
    let remaining = Arc::new(AtomicUsize::new(PRODUCERS as usize));

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = Arc::clone(&queue);
            let remaining = Arc::clone(&remaining);
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let id = p * 1000 + i;
                    while queue.try_push(id).is_err() {
                        std::hint::spin_loop();
                    }
                }
                remaining.fetch_sub(1, Ordering::Release);
            })
        })
        .collect();

    let mut popped = Vec::new();
    loop {
        if let Some(id) = queue.try_pop() {
            popped.push(id);
            if popped.len() as u64 == PRODUCERS * PER_PRODUCER {
                break;
            }
        } else if remaining.load(Ordering::Acquire) == 0 {
            while let Some(id) = queue.try_pop() {
                popped.push(id);
            }
            break;
        }
    }
    for p in producers {
        p.join().unwrap();
    }

    popped.sort_unstable();
    let expected: Vec<u64> = (0..PRODUCERS).flat_map(|p| (0..PER_PRODUCER).map(move |i| p * 1000 + i)).collect();
    let mut expected = expected;
    expected.sort_unstable();
    assert_eq!(popped, expected);
}

/// A select over two empty channels with no ready case runs its default
/// immediately; once one channel gets a value, select picks it up instead.
#[test]
fn select_with_default_then_ready_channel() {
    let a = Channel::<u32>::new(1);
    let b = Channel::<u32>::new(1);

    let fired = Select::new()
        .case(RecvCase::new(&a, |_| unreachable!("a is empty")))
        .case(RecvCase::new(&b, |_| unreachable!("b is empty")))
        .try_run();
    assert!(!fired, "select should report nothing ready so the caller runs its default");

    b.try_send(7).unwrap();
    let mut got = None;
    let fired = Select::new()
        .case(RecvCase::new(&a, |_| unreachable!("a is still empty")))
        .case(RecvCase::new(&b, |r| got = r.ok()))
        .try_run();
    assert!(fired);
    assert_eq!(got, Some(7));
}

/// A listener coroutine echoes back whatever a client coroutine sends it
/// over a real loopback TCP connection.
#[test]
fn echo_server_round_trip() {
    thread::spawn(|| {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut listener = weave_rt::AsyncTcpListener::bind(addr).unwrap();
        let server_addr = listener.local_addr().unwrap();
        let received = Rc::new(RefCell::new(Vec::new()));

        scheduler.spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let n = stream.read(&mut buf).unwrap();
            stream.write_all(&buf[..n]).unwrap();
        });
        {
            let received = Rc::clone(&received);
            scheduler.spawn(move || {
                let mut stream = weave_rt::AsyncTcpStream::connect(server_addr).unwrap();
                stream.write_all(b"Hello, Arsenal!").unwrap();
                let mut buf = [0u8; 1024];
                let n = stream.read(&mut buf).unwrap();
                received.borrow_mut().extend_from_slice(&buf[..n]);
            });
        }
        scheduler.run_all();
        assert_eq!(&*received.borrow(), b"Hello, Arsenal!");
    })
    .join()
    .unwrap();
}
