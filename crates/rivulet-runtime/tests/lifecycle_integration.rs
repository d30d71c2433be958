//! End-to-end lifecycles across finite sources, tokens and caches.

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::executor::LocalPool;
use rivulet_core::{Error, TaskQueue};
use rivulet_runtime::finite::sources::{from_future, from_iter};
use rivulet_runtime::{
    CancelToken, FiniteObserver, FiniteState, FiniteStateObservable, FiniteStateOptions,
    FiniteValue, Replay, ValueObservable,
};

fn state_log<T: 'static, E: 'static>(
    observable: &FiniteStateObservable<T, E>,
) -> (Rc<RefCell<Vec<String>>>, FiniteObserver<T, E>) {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    let observer = observable
        .pipe_to(move |notification| sink.borrow_mut().push(notification.name().to_string()))
        .expect("attach");
    (log, observer)
}

#[test]
fn future_source_cancelled_by_token_mid_flight() {
    let mut pool = LocalPool::new();
    let token = CancelToken::new();
    let (sender, receiver) = oneshot::channel::<u32>();
    let observable = from_future(
        async move { receiver.await.map_err(|_| "sender dropped") },
        pool.spawner(),
        Some(&token),
    );
    let (log, _observer) = state_log(&observable);

    pool.run_until_stalled();
    assert_eq!(observable.state(), FiniteState::Next);

    token.cancel("user left");
    assert_eq!(observable.state(), FiniteState::Cancel);
    let _ = sender.send(7);
    pool.run_until_stalled();
    assert_eq!(observable.state(), FiniteState::Cancel);
    assert_eq!(*log.borrow(), vec!["cancel".to_string()]);
}

#[test]
fn abort_controller_drives_finite_source() {
    let token = CancelToken::new();
    let controller = token.to_abort_controller();
    let bridged = CancelToken::from_abort_signal(controller.signal());

    let observable = FiniteStateObservable::<u32, String>::new(FiniteStateOptions::default(), |context| {
        let _watcher = bridged.on_cancel(move |reason| {
            let _ = context.cancel(reason.clone());
        });
    });
    let reasons = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reasons);
    let _observer = observable
        .on_cancel(move |reason| sink.borrow_mut().push(reason.to_string()))
        .expect("attach");

    token.cancel("shutdown");
    assert!(controller.is_aborted());
    assert!(bridged.is_cancelled());
    assert_eq!(*reasons.borrow(), vec!["shutdown".to_string()]);
}

#[test]
fn replay_all_feeds_late_observer_whole_run() {
    let (observable, producer) = {
        let mut producer = None;
        let observable = FiniteStateObservable::<u32, String>::new(
            FiniteStateOptions::default().with_replay(Replay::All),
            |context| {
                producer = Some(context);
            },
        );
        (observable, producer.expect("generator ran"))
    };
    producer.next(1).expect("next");
    producer.next(2).expect("next");
    producer.error("disk full".to_string()).expect("next");
    assert!(matches!(producer.next(3), Err(Error::Terminated { .. })));

    let values = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&values);
    let _observer = observable
        .pipe_to(move |notification| {
            let entry = match notification.value() {
                FiniteValue::Next(value) => format!("next {value}"),
                FiniteValue::Error(error) => format!("error {error}"),
                other => format!("{other:?}"),
            };
            sink.borrow_mut().push(entry);
        })
        .expect("attach");
    assert_eq!(
        *values.borrow(),
        vec!["next 1".to_string(), "next 2".to_string(), "error disk full".to_string()]
    );
}

#[test]
fn iterator_feeds_value_cache() {
    let queue = TaskQueue::new();
    let numbers = from_iter([3, 3, 5, 8, 8], queue.clone());
    let (latest, context) = ValueObservable::channel();
    let _pipe = numbers
        .on_next(move |value| {
            context.emit(*value);
        })
        .expect("attach");

    queue.run_until_idle();
    assert_eq!(latest.get(), Some(8));
    assert_eq!(latest.emission_count(), 3);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    let _late = latest
        .pipe_to(move |value, _| sink.borrow_mut().push(*value))
        .expect("attach");
    assert_eq!(*seen.borrow(), vec![8]);
}
