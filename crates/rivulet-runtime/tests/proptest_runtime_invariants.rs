//! Property-based invariant tests for the runtime specializations.
//!
//! 1. An iterator source delivers every item exactly once, in order, no
//!    matter how observers toggle between scheduler turns.
//! 2. A value observable notifies exactly the changes of its input and
//!    counts them.
//! 3. Linked tokens cancel together, each exactly once.
//! 4. A wrapped future resolves to the task's value iff the task settles
//!    before the token cancels. Otherwise the cancel callback runs once and
//!    the strategy decides the outcome.
//! 5. A caching finite sequence replays its full history to late observers.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use futures::FutureExt;
use futures::channel::oneshot;
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;
use proptest::prelude::*;
use rivulet_core::TaskQueue;
use rivulet_runtime::finite::sources::from_iter;
use rivulet_runtime::{
    CancelReason, CancelStrategy, CancelToken, Cancelled, CompletionPolicy, FiniteState,
    FromObservable, FromOptions, ValueObservable,
};

// ── Strategy helpers ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum Step {
    Activate,
    Deactivate,
    Tick,
}

fn arb_step() -> impl Strategy<Value = Step> {
    prop_oneof![
        Just(Step::Activate),
        Just(Step::Deactivate),
        Just(Step::Tick),
    ]
}

/// When the token cancels relative to the wrapped task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timing {
    /// The task settles on a pool turn, the token cancels afterwards.
    TaskFirst,
    /// The token cancels before the wrapped future is first polled.
    CancelBeforePoll,
    /// The task is sent its value, but the token cancels before the poll
    /// that would observe it.
    CancelBeforeObserved,
    /// The wrapped future is parked on the pool when the token cancels.
    CancelMidFlight,
}

fn arb_timing() -> impl Strategy<Value = Timing> {
    prop_oneof![
        Just(Timing::TaskFirst),
        Just(Timing::CancelBeforePoll),
        Just(Timing::CancelBeforeObserved),
        Just(Timing::CancelMidFlight),
    ]
}

fn arb_settling_strategy() -> impl Strategy<Value = CancelStrategy> {
    prop_oneof![Just(CancelStrategy::Resolve), Just(CancelStrategy::Reject)]
}

type Outcome = Result<Option<Option<i64>>, Cancelled>;

/// Drive `token.wrap_future_with` over a oneshot task, cancelling at `timing`.
///
/// Returns the outcome and how many times the cancel callback ran.
fn run_wrapped(value: i64, strategy: CancelStrategy, timing: Timing) -> (Outcome, u32) {
    let token = CancelToken::new();
    let (sender, receiver) = oneshot::channel::<i64>();
    let callbacks = Rc::new(Cell::new(0u32));
    let counter = Rc::clone(&callbacks);
    let task = async move { receiver.await.ok() };
    let on_cancelled = move |_: &CancelReason| counter.set(counter.get() + 1);

    if timing == Timing::CancelBeforePoll {
        token.cancel("stop");
        let outcome = token
            .wrap_future_with(task, strategy, on_cancelled)
            .now_or_never()
            .expect("a cancelled token settles on the first poll");
        drop(sender);
        return (outcome, callbacks.get());
    }

    let mut pool = LocalPool::new();
    let slot = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    let racer = token.clone();
    pool.spawner()
        .spawn_local(async move {
            let outcome = racer.wrap_future_with(task, strategy, on_cancelled).await;
            *sink.borrow_mut() = Some(outcome);
        })
        .expect("spawn");

    match timing {
        Timing::TaskFirst => {
            pool.run_until_stalled();
            let _ = sender.send(value);
            pool.run_until_stalled();
            token.cancel("stop");
        }
        Timing::CancelBeforeObserved => {
            let _ = sender.send(value);
            token.cancel("stop");
        }
        Timing::CancelMidFlight => {
            pool.run_until_stalled();
            token.cancel("stop");
            let _ = sender.send(value);
        }
        Timing::CancelBeforePoll => unreachable!("settled above"),
    }
    pool.run_until_stalled();

    let outcome = slot.borrow_mut().take().expect("settling strategies settle");
    (outcome, callbacks.get())
}

fn dedup_consecutive(values: &[u8]) -> Vec<u8> {
    let mut out: Vec<u8> = Vec::new();
    for &value in values {
        if out.last() != Some(&value) {
            out.push(value);
        }
    }
    out
}

// ── Properties ────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn iterator_delivers_each_item_once(
        values in prop::collection::vec(any::<u16>(), 0..40),
        steps in prop::collection::vec(arb_step(), 0..60),
    ) {
        let queue = TaskQueue::new();
        let observable = from_iter(values.clone(), queue.clone());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let observer = observable
            .on_next(move |value| sink.borrow_mut().push(*value))
            .expect("attach");

        for step in steps {
            match step {
                Step::Activate => {
                    observer.activate().expect("reattach");
                }
                Step::Deactivate => {
                    observer.deactivate();
                }
                Step::Tick => {
                    queue.run_once();
                }
            }
        }
        observer.activate().expect("reattach");
        queue.run_until_idle();

        prop_assert_eq!(&*seen.borrow(), &values);
        prop_assert_eq!(observable.state(), FiniteState::Complete);
    }

    #[test]
    fn value_observable_emits_changes_only(values in prop::collection::vec(0u8..4, 0..50)) {
        let (observable, context) = ValueObservable::channel();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _observer = observable
            .pipe_to(move |value, _| sink.borrow_mut().push(*value))
            .expect("attach");

        for &value in &values {
            context.emit(value);
        }

        let expected = dedup_consecutive(&values);
        prop_assert_eq!(observable.emission_count(), expected.len() as u64);
        prop_assert_eq!(&*seen.borrow(), &expected);
        prop_assert_eq!(observable.get(), values.last().copied());
    }

    #[test]
    fn linked_tokens_cancel_together(size in 2usize..8, trigger in 0usize..8) {
        let trigger = trigger % size;
        let tokens: Vec<CancelToken> = (0..size).map(|_| CancelToken::new()).collect();
        let fired: Vec<Rc<Cell<u32>>> = (0..size).map(|_| Rc::new(Cell::new(0))).collect();
        let _observers: Vec<_> = tokens
            .iter()
            .zip(&fired)
            .map(|(token, count)| {
                let count = Rc::clone(count);
                token
                    .on_cancel(move |_| count.set(count.get() + 1))
                    .expect("attach")
            })
            .collect();

        let others: Vec<&CancelToken> = tokens[1..].iter().collect();
        let link = tokens[0].link_with_token(&others).expect("fresh tokens link");
        tokens[trigger].cancel("boom");

        for (token, count) in tokens.iter().zip(&fired) {
            prop_assert!(token.is_cancelled());
            prop_assert_eq!(count.get(), 1);
            prop_assert_eq!(token.reason().and_then(|reason| reason.message()), Some("boom"));
        }
        prop_assert!(!link.is_linked());
    }

    #[test]
    fn wrapped_future_settles_per_strategy(
        value in any::<i64>(),
        strategy in arb_settling_strategy(),
        timing in arb_timing(),
    ) {
        let (outcome, callbacks) = run_wrapped(value, strategy, timing);
        if timing == Timing::TaskFirst {
            prop_assert_eq!(outcome, Ok(Some(Some(value))));
            prop_assert_eq!(callbacks, 0);
        } else {
            prop_assert_eq!(callbacks, 1);
            match strategy {
                CancelStrategy::Resolve => {
                    prop_assert_eq!(outcome, Ok(None));
                }
                _ => {
                    let reason = outcome.expect_err("reject settles with an error").reason;
                    prop_assert_eq!(reason.message(), Some("stop"));
                }
            }
        }
    }

    #[test]
    fn cache_replays_full_history(values in prop::collection::vec(any::<i32>(), 0..30)) {
        let (observable, context) = FromObservable::channel(
            FromOptions::new(TaskQueue::new()).with_policy(CompletionPolicy::Cache),
        );
        for &value in &values {
            context.emit(value).expect("awaiting");
        }
        context.complete().expect("awaiting");

        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _observer = observable
            .pipe_to(move |value, _| sink.borrow_mut().push(*value))
            .expect("cache accepts late observers");
        prop_assert_eq!(&*seen.borrow(), &values);
    }
}
