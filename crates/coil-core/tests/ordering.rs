//! Delivery order and stream behavior across the public API.

use std::cell::RefCell;
use std::future::Future;
use std::rc::Rc;

use coil_core::{Bindable, Bound, CoilError, Delivery, Event, Record, bind, bind_two_way};
use proptest::prelude::*;

fn run_local<F: Future>(future: F) -> F::Output {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("test runtime");
    tokio::task::LocalSet::new().block_on(&rt, future)
}

#[test]
fn hundred_rapid_writes_arrive_in_order() {
    run_local(async {
        let record = Record::builder().property("counter", 0u32).build();
        let writer = bind_two_way(&record, "counter");
        let mut events = bind(&record, "counter").events().unwrap();

        let reader = tokio::task::spawn_local(async move {
            let mut seen = Vec::new();
            while seen.len() < 100 {
                match events.next().await {
                    Some(event) => seen.push(*event.value().expect("update")),
                    None => break,
                }
            }
            seen
        });

        for n in 1..=100 {
            writer.set(n, None).await.unwrap();
        }

        let seen = reader.await.unwrap();
        assert_eq!(seen, (1..=100).collect::<Vec<_>>());
    });
}

#[test]
fn stale_handle_is_rejected() {
    let record = Record::builder().property("value", 0).build();
    let handle = record.registry().subscribe("value", |_| Ok(()));

    record.registry().unsubscribe(&handle).unwrap();
    let err = record.registry().unsubscribe(&handle).unwrap_err();
    assert_eq!(err, CoilError::UnknownSubscription(handle.clone()));
    assert!(err.to_string().contains("value"));
}

#[test]
fn echo_is_suppressed_for_every_subscriber() {
    let record = Record::builder().property("value", 0).build();
    let hits = Rc::new(RefCell::new(0));
    for _ in 0..3 {
        let hits = Rc::clone(&hits);
        record.registry().subscribe("value", move |_| {
            *hits.borrow_mut() += 1;
            Ok(())
        });
    }

    let id = bind(&record, "value").id().clone();
    let first = Event::updated(id.clone(), 1, None);
    let echo = Event::updated(id, 1, Some(Rc::clone(&first)));

    assert_eq!(record.registry().notify("value", &first), Delivery::Delivered(3));
    assert_eq!(record.registry().notify("value", &echo), Delivery::Suppressed);
    assert_eq!(*hits.borrow(), 3);
}

#[test]
fn failing_callbacks_do_not_stop_delivery() {
    let record = Record::builder().property("value", 0).build();
    let order = Rc::new(RefCell::new(Vec::new()));

    let o = Rc::clone(&order);
    record.registry().subscribe("value", move |_| {
        o.borrow_mut().push("first");
        Err("first subscriber failed".into())
    });
    let o = Rc::clone(&order);
    record.registry().subscribe("value", move |_| {
        o.borrow_mut().push("second");
        panic!("second subscriber panicked");
    });
    let o = Rc::clone(&order);
    record.registry().subscribe("value", move |_| {
        o.borrow_mut().push("third");
        Ok(())
    });

    let failures = Rc::new(RefCell::new(0));
    let f = Rc::clone(&failures);
    record
        .registry()
        .set_failure_hook(move |_, _| *f.borrow_mut() += 1);

    record.set("value", 1).unwrap();
    assert_eq!(*order.borrow(), vec!["first", "second", "third"]);
    assert_eq!(*failures.borrow(), 2);
}

proptest! {
    #[test]
    fn subscribers_see_writes_in_mutation_order(
        writes in proptest::collection::vec(any::<i32>(), 1..64),
    ) {
        let record = Record::builder().property("value", 0).build();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        record.registry().subscribe("value", move |event| {
            s.borrow_mut().push(*event.value().expect("update"));
            Ok(())
        });

        for &value in &writes {
            record.set("value", value).unwrap();
        }
        prop_assert_eq!(&*seen.borrow(), &writes);
    }
}
