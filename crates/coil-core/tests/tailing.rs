//! Tail forwarding between independent hosts.

use std::cell::Cell;
use std::future::Future;
use std::rc::Rc;

use coil_core::{Bindable, Record, TailOptions, bind, bind_two_way, tail, tail_with};

fn run_local<F: Future>(future: F) -> F::Output {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime");
    tokio::task::LocalSet::new().block_on(&rt, future)
}

async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

type Size = (u32, u32);

fn window(size: Size) -> Rc<Record<Size>> {
    Record::builder().property("size", size).build()
}

fn count_writes(record: &Record<Size>) -> Rc<Cell<usize>> {
    let writes = Rc::new(Cell::new(0));
    let w = Rc::clone(&writes);
    record.registry().subscribe("size", move |_| {
        w.set(w.get() + 1);
        Ok(())
    });
    writes
}

#[test]
fn one_way_tail_converges() {
    run_local(async {
        let main = window((1024, 768));
        let preview = window((0, 0));
        let task = tail(&bind(&main, "size"), bind_two_way(&preview, "size")).unwrap();

        main.set("size", (1920, 1080)).unwrap();
        settle().await;
        assert_eq!(preview.get("size").unwrap(), Some((1920, 1080)));

        // Writes to the target do not flow back.
        preview.set("size", (1, 1)).unwrap();
        settle().await;
        assert_eq!(main.get("size").unwrap(), Some((1920, 1080)));

        assert!(task.cancel_and_wait().await.is_cancelled());
    });
}

#[test]
fn mutual_tails_converge_and_go_quiet() {
    run_local(async {
        let a = window((0, 0));
        let b = window((0, 0));
        let a_writes = count_writes(&a);
        let b_writes = count_writes(&b);

        let forward = tail(&bind(&a, "size"), bind_two_way(&b, "size")).unwrap();
        let reverse = tail(&bind(&b, "size"), bind_two_way(&a, "size")).unwrap();

        a.set("size", (400, 600)).unwrap();
        settle().await;
        assert_eq!(a.get("size").unwrap(), Some((400, 600)));
        assert_eq!(b.get("size").unwrap(), Some((400, 600)));

        b.set("size", (600, 400)).unwrap();
        settle().await;
        assert_eq!(a.get("size").unwrap(), Some((600, 400)));
        assert_eq!(b.get("size").unwrap(), Some((600, 400)));

        // Each side saw its own write plus the forwarded one; echoes were
        // stopped before delivery.
        let quiet = (a_writes.get(), b_writes.get());
        assert_eq!(quiet, (2, 2));
        settle().await;
        assert_eq!((a_writes.get(), b_writes.get()), quiet);

        forward.cancel_and_wait().await;
        reverse.cancel_and_wait().await;
    });
}

#[test]
fn cancelled_tail_stops_forwarding() {
    run_local(async {
        let source = window((1, 1));
        let target = window((1, 1));
        let task = tail(&bind(&source, "size"), bind_two_way(&target, "size")).unwrap();

        task.cancel_and_wait().await;
        assert_eq!(source.registry().subscriber_count("size"), 0);

        source.set("size", (2, 2)).unwrap();
        settle().await;
        assert_eq!(target.get("size").unwrap(), Some((1, 1)));
    });
}

#[test]
fn propagated_delete_reaches_chained_tails() {
    run_local(async {
        let first = window((1, 1));
        let second = window((1, 1));
        let third = window((1, 1));
        let options = TailOptions::propagate_deletes();
        let a = tail_with(&bind(&first, "size"), bind_two_way(&second, "size"), options).unwrap();
        let b = tail_with(&bind(&second, "size"), bind_two_way(&third, "size"), options).unwrap();

        first.set("size", (5, 5)).unwrap();
        settle().await;
        assert_eq!(third.get("size").unwrap(), Some((5, 5)));

        first.delete("size").unwrap();
        assert!(a.join().await.is_completed());
        assert!(b.join().await.is_completed());
        assert_eq!(second.get("size").unwrap(), None);
        assert_eq!(third.get("size").unwrap(), None);
    });
}
