//! Load testing for the connector.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ajp_connector::{BufferedExchange, Mount, RequestDescriptor};

mod common;
use common::{context, start_backend, Behavior};

#[test]
fn test_concurrent_requests_through_balancer() {
    let a = start_backend("a", Behavior::Respond);
    let b = start_backend("b", Behavior::Respond);
    let ctx = Arc::new(context(&format!(
        "worker.list=lb\n\
         worker.lb.type=lb\n\
         worker.lb.balance_workers=a,b\n\
         worker.a.host=127.0.0.1\n\
         worker.a.port={}\n\
         worker.a.cachesize=8\n\
         worker.b.host=127.0.0.1\n\
         worker.b.port={}\n\
         worker.b.cachesize=8\n\
         /app/*=lb\n",
        a.port, b.port
    )));

    let threads = 8;
    let per_thread = 50;
    let start = Instant::now();

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                let mut ok = 0;
                for i in 0..per_thread {
                    let req = RequestDescriptor::new("GET", format!("/app/item/{i}"));
                    let mut exchange = BufferedExchange::new(Vec::new());
                    if ctx.service(&req, &mut exchange) == 200 {
                        ok += 1;
                    }
                }
                ok
            })
        })
        .collect();

    let ok: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let elapsed = start.elapsed();
    println!("{} requests in {:?}", threads * per_thread, elapsed);

    assert_eq!(ok, threads * per_thread);
    assert_eq!(a.request_count() + b.request_count(), threads * per_thread);
    // Equal factors: neither member takes everything.
    assert!(a.request_count() > 0 && b.request_count() > 0);
    // Pooled connections are reused.
    assert!(a.connections() + b.connections() < threads * per_thread);
}

#[test]
fn test_requests_during_mount_reload() {
    let node = start_backend("node", Behavior::Respond);
    let ctx = Arc::new(context(&format!(
        "worker.list=node\n\
         worker.node.host=127.0.0.1\n\
         worker.node.port={}\n\
         worker.node.cachesize=4\n\
         /app/*=node\n",
        node.port
    )));

    let stop = Arc::new(AtomicBool::new(false));
    let reloader = {
        let ctx = Arc::clone(&ctx);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let base = Mount {
                pattern: "/app/*".into(),
                worker: "node".into(),
            };
            let extra = Mount {
                pattern: "/api/*".into(),
                worker: "node".into(),
            };
            let mut reloads = 0u64;
            while !stop.load(Ordering::SeqCst) {
                let mounts = if reloads % 2 == 0 {
                    vec![base.clone(), extra.clone()]
                } else {
                    vec![base.clone()]
                };
                ctx.reload_mounts(&mounts).unwrap();
                reloads += 1;
                thread::sleep(Duration::from_millis(1));
            }
            reloads
        })
    };

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let ctx = Arc::clone(&ctx);
            thread::spawn(move || {
                for _ in 0..50 {
                    let mut exchange = BufferedExchange::new(Vec::new());
                    let status = ctx.service(&RequestDescriptor::new("GET", "/app/page"), &mut exchange);
                    assert_eq!(status, 200);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    stop.store(true, Ordering::SeqCst);
    let reloads = reloader.join().unwrap();

    assert!(reloads > 0);
    assert_eq!(ctx.uri_map().generation(), reloads + 1);
    assert_eq!(node.request_count(), 200);
}
