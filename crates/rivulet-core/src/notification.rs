#![forbid(unsafe_code)]

//! Named notifications and name-filtered subscription.
//!
//! A [`NotificationsObservable<N, V>`] is an [`Observable`] of
//! [`Notification<N, V>`] values. The name type `N` enumerates the admissible
//! notification names; the value type `V` (usually an enum) carries the
//! per-name payloads.
//!
//! # Matching
//!
//! - A named [`NotificationsObserver`] (created with [`NotificationsObservable::on`]
//!   or [`NotificationsObserver::new`]) receives only notifications whose name
//!   equals its filter.
//! - An unnamed observer (plain core API, or [`NotificationsObserver::any`])
//!   receives every notification.
//!
//! Names are kept in an identity-keyed side table owned by each
//! notifications observable, so [`NotificationsObservable::matches`] can
//! answer "who listens for `name`" without exposing the collection.

use std::fmt;
use std::rc::Rc;

use crate::error::Result;
use crate::observable::{Observable, ObservableContext, ObservableHook};
use crate::observer::{Observer, ObserverMap};

/// An immutable `{name, value}` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Notification<N, V> {
    name: N,
    value: V,
}

impl<N, V> Notification<N, V> {
    /// Create a notification.
    #[must_use]
    pub const fn new(name: N, value: V) -> Self {
        Self { name, value }
    }

    /// The notification name.
    #[must_use]
    pub const fn name(&self) -> &N {
        &self.name
    }

    /// The notification payload.
    #[must_use]
    pub const fn value(&self) -> &V {
        &self.value
    }

    /// Split into `(name, value)`.
    #[must_use]
    pub fn into_parts(self) -> (N, V) {
        (self.name, self.value)
    }
}

type NameTable<N, V> = ObserverMap<Notification<N, V>, N>;

/// An observable of named notifications.
pub struct NotificationsObservable<N: 'static, V: 'static> {
    observable: Observable<Notification<N, V>>,
    names: Rc<NameTable<N, V>>,
}

impl<N: 'static, V: 'static> Clone for NotificationsObservable<N, V> {
    fn clone(&self) -> Self {
        Self {
            observable: self.observable.clone(),
            names: Rc::clone(&self.names),
        }
    }
}

impl<N: 'static, V: 'static> fmt::Debug for NotificationsObservable<N, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationsObservable")
            .field("observer_count", &self.observable.observer_count())
            .field("named_observers", &self.names.len())
            .finish()
    }
}

impl<N, V> NotificationsObservable<N, V>
where
    N: PartialEq + Clone + 'static,
    V: 'static,
{
    /// Create a notifications observable whose hook is built by `factory`.
    pub fn new<H, F>(factory: F) -> Self
    where
        F: FnOnce(NotificationsContext<N, V>) -> H,
        H: ObservableHook<Notification<N, V>> + 'static,
    {
        Self::new_with(|context| (factory(context), ())).0
    }

    /// Like [`NotificationsObservable::new`], but the factory also returns a
    /// value that is handed back to the constructing scope.
    pub fn new_with<H, R, F>(factory: F) -> (Self, R)
    where
        F: FnOnce(NotificationsContext<N, V>) -> (H, R),
        H: ObservableHook<Notification<N, V>> + 'static,
    {
        let names: Rc<NameTable<N, V>> = Rc::new(ObserverMap::new());
        let table = Rc::clone(&names);
        let (observable, extra) = Observable::new_with(move |context| {
            factory(NotificationsContext {
                context,
                names: table,
            })
        });
        (Self { observable, names }, extra)
    }

    /// Subscribe to notifications named `name`; the observer is activated.
    ///
    /// # Errors
    ///
    /// Returns the hook's error if it refuses the observer.
    pub fn on(
        &self,
        name: N,
        callback: impl Fn(&V) + 'static,
    ) -> Result<NotificationsObserver<N, V>> {
        let observer = NotificationsObserver::new(name, callback);
        observer.observe(self)?.activate()?;
        Ok(observer)
    }

    /// Subscribe to every notification; the observer is activated.
    ///
    /// # Errors
    ///
    /// Returns the hook's error if it refuses the observer.
    pub fn pipe_to(
        &self,
        callback: impl Fn(&Notification<N, V>) + 'static,
    ) -> Result<NotificationsObserver<N, V>> {
        let observer = NotificationsObserver::any(callback);
        observer.observe(self)?.activate()?;
        Ok(observer)
    }

    /// Lazy, restartable sequence of attached observers matching `name`.
    #[must_use]
    pub fn matches(&self, name: N) -> Matches<N, V> {
        Matches {
            observable: Some(self.observable.clone()),
            names: Rc::clone(&self.names),
            name,
        }
    }

    /// The underlying core observable.
    #[must_use]
    pub fn as_observable(&self) -> &Observable<Notification<N, V>> {
        &self.observable
    }

    /// Number of attached observers, named or not.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observable.observer_count()
    }

    /// Whether at least one observer is attached.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.observable.is_observed()
    }
}

/// Emission capability of a [`NotificationsObservable`].
pub struct NotificationsContext<N: 'static, V: 'static> {
    context: ObservableContext<Notification<N, V>>,
    names: Rc<NameTable<N, V>>,
}

impl<N: 'static, V: 'static> fmt::Debug for NotificationsContext<N, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationsContext")
            .field("observer_count", &self.context.observer_count())
            .finish()
    }
}

impl<N, V> NotificationsContext<N, V>
where
    N: PartialEq + Clone + 'static,
    V: 'static,
{
    /// Emit `Notification::new(name, value)`.
    pub fn dispatch(&self, name: N, value: V) {
        self.context.emit(Notification::new(name, value));
    }

    /// Emit a prebuilt notification.
    pub fn emit(&self, notification: Notification<N, V>) {
        self.context.emit(notification);
    }

    /// Emit a borrowed notification.
    pub fn emit_ref(&self, notification: &Notification<N, V>) {
        self.context.emit_ref(notification);
    }

    /// Deliver a notification to one attached observer.
    pub fn emit_to(
        &self,
        observer: &Observer<Notification<N, V>>,
        notification: &Notification<N, V>,
    ) -> bool {
        self.context.emit_to(observer, notification)
    }

    /// Attached observers matching `name`.
    #[must_use]
    pub fn matches(&self, name: N) -> Matches<N, V> {
        Matches {
            observable: self.context.observable(),
            names: Rc::clone(&self.names),
            name,
        }
    }

    /// Whether at least one attached observer would receive `name`.
    #[must_use]
    pub fn is_observed_for(&self, name: N) -> bool {
        !self.matches(name).is_empty()
    }

    /// Number of attached observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.context.observer_count()
    }

    /// Whether at least one observer is attached.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.context.is_observed()
    }

    /// The observable this context emits into, if it is still alive.
    #[must_use]
    pub fn observable(&self) -> Option<NotificationsObservable<N, V>> {
        self.context
            .observable()
            .map(|observable| NotificationsObservable {
                observable,
                names: Rc::clone(&self.names),
            })
    }
}

/// An observer of notifications with an optional name filter.
pub struct NotificationsObserver<N: 'static, V: 'static> {
    observer: Observer<Notification<N, V>>,
    name: Option<N>,
}

impl<N: Clone + 'static, V: 'static> Clone for NotificationsObserver<N, V> {
    fn clone(&self) -> Self {
        Self {
            observer: self.observer.clone(),
            name: self.name.clone(),
        }
    }
}

impl<N: fmt::Debug + 'static, V: 'static> fmt::Debug for NotificationsObserver<N, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationsObserver")
            .field("name", &self.name)
            .field("activated", &self.observer.is_activated())
            .finish()
    }
}

impl<N, V> NotificationsObserver<N, V>
where
    N: PartialEq + Clone + 'static,
    V: 'static,
{
    /// Create an inactive observer receiving only notifications named `name`.
    pub fn new(name: N, callback: impl Fn(&V) + 'static) -> Self {
        let filter = name.clone();
        let observer = Observer::new(move |notification: &Notification<N, V>, _| {
            if notification.name == filter {
                callback(&notification.value);
            }
        });
        Self {
            observer,
            name: Some(name),
        }
    }

    /// Create an inactive observer receiving every notification.
    pub fn any(callback: impl Fn(&Notification<N, V>) + 'static) -> Self {
        Self {
            observer: Observer::new(move |notification, _| callback(notification)),
            name: None,
        }
    }

    /// Start watching `target`.
    ///
    /// # Errors
    ///
    /// Returns the hook's error if it refuses this observer.
    pub fn observe(&self, target: &NotificationsObservable<N, V>) -> Result<&Self> {
        // Registered before attaching so hooks already see the filter.
        if let Some(name) = &self.name {
            target.names.insert(&self.observer, name.clone());
        }
        if let Err(err) = self.observer.observe(&target.observable) {
            target.names.remove(&self.observer);
            return Err(err);
        }
        Ok(self)
    }

    /// Stop watching `target`.
    pub fn unobserve(&self, target: &NotificationsObservable<N, V>) -> &Self {
        self.observer.unobserve(&target.observable);
        target.names.remove(&self.observer);
        self
    }

    /// Attach to every watched observable.
    ///
    /// # Errors
    ///
    /// Returns the first hook error; the observer is then deactivated.
    pub fn activate(&self) -> Result<&Self> {
        self.observer.activate()?;
        Ok(self)
    }

    /// Detach from every watched observable.
    pub fn deactivate(&self) -> &Self {
        self.observer.deactivate();
        self
    }

    /// Whether the observer is activated.
    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.observer.is_activated()
    }

    /// The name filter, `None` for an observer receiving everything.
    #[must_use]
    pub fn name(&self) -> Option<&N> {
        self.name.as_ref()
    }

    /// The underlying core observer.
    #[must_use]
    pub fn observer(&self) -> &Observer<Notification<N, V>> {
        &self.observer
    }
}

/// Attached observers matching one notification name.
///
/// Every call to [`Matches::iter`] takes a fresh snapshot, so the sequence can
/// be walked any number of times.
pub struct Matches<N: 'static, V: 'static> {
    observable: Option<Observable<Notification<N, V>>>,
    names: Rc<NameTable<N, V>>,
    name: N,
}

impl<N: fmt::Debug + 'static, V: 'static> fmt::Debug for Matches<N, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matches").field("name", &self.name).finish()
    }
}

impl<N, V> Matches<N, V>
where
    N: PartialEq + Clone + 'static,
    V: 'static,
{
    /// Walk the currently attached matching observers.
    #[must_use]
    pub fn iter(&self) -> MatchesIter<'_, N, V> {
        let snapshot = self
            .observable
            .as_ref()
            .map(Observable::observers)
            .unwrap_or_default();
        MatchesIter {
            snapshot: snapshot.into_iter(),
            matches: self,
        }
    }

    /// Whether no attached observer matches.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// The name being matched.
    #[must_use]
    pub fn name(&self) -> &N {
        &self.name
    }

    fn accepts(&self, observer: &Observer<Notification<N, V>>) -> bool {
        self.names
            .get(observer)
            .is_none_or(|filter| filter == self.name)
    }
}

impl<'a, N, V> IntoIterator for &'a Matches<N, V>
where
    N: PartialEq + Clone + 'static,
    V: 'static,
{
    type Item = Observer<Notification<N, V>>;
    type IntoIter = MatchesIter<'a, N, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`Matches::iter`].
pub struct MatchesIter<'a, N: 'static, V: 'static> {
    snapshot: std::vec::IntoIter<Observer<Notification<N, V>>>,
    matches: &'a Matches<N, V>,
}

impl<N, V> Iterator for MatchesIter<'_, N, V>
where
    N: PartialEq + Clone + 'static,
    V: 'static,
{
    type Item = Observer<Notification<N, V>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.snapshot
            .by_ref()
            .find(|observer| self.matches.accepts(observer))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Open,
        Close,
    }

    fn source() -> (NotificationsObservable<Event, u32>, NotificationsContext<Event, u32>) {
        NotificationsObservable::new_with(|context| ((), context))
    }

    #[test]
    fn named_observer_filters_by_name() {
        let (observable, context) = source();
        let opens = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&opens);
        let _observer = observable
            .on(Event::Open, move |value| sink.borrow_mut().push(*value))
            .unwrap();

        context.dispatch(Event::Open, 1);
        context.dispatch(Event::Close, 2);
        context.dispatch(Event::Open, 3);
        assert_eq!(*opens.borrow(), vec![1, 3]);
    }

    #[test]
    fn unnamed_observer_receives_everything() {
        let (observable, context) = source();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _observer = observable
            .pipe_to(move |notification| sink.borrow_mut().push(*notification.name()))
            .unwrap();

        context.dispatch(Event::Open, 1);
        context.dispatch(Event::Close, 2);
        assert_eq!(*seen.borrow(), vec![Event::Open, Event::Close]);
    }

    #[test]
    fn core_observer_counts_as_unnamed() {
        let (observable, _context) = source();
        let _raw = observable.as_observable().pipe_to(|_, _| {}).unwrap();
        assert_eq!(observable.matches(Event::Open).iter().count(), 1);
        assert_eq!(observable.matches(Event::Close).iter().count(), 1);
    }

    #[test]
    fn matches_is_restartable_and_tracks_membership() {
        let (observable, context) = source();
        let open = observable.on(Event::Open, |_| {}).unwrap();
        let _close = observable.on(Event::Close, |_| {}).unwrap();

        let matches = context.matches(Event::Open);
        assert_eq!(matches.iter().count(), 1);
        assert_eq!((&matches).into_iter().count(), 1);
        assert!(context.is_observed_for(Event::Close));

        open.deactivate();
        assert!(matches.is_empty());
        assert!(!context.is_observed_for(Event::Open));
        assert_eq!(context.observer_count(), 1);
    }

    #[test]
    fn unobserve_forgets_name() {
        let (observable, _context) = source();
        let observer = observable.on(Event::Open, |_| {}).unwrap();
        assert_eq!(observer.name(), Some(&Event::Open));
        observer.unobserve(&observable);
        assert_eq!(observable.observer_count(), 0);
        assert!(observable.matches(Event::Open).is_empty());
    }

    #[test]
    fn hook_sees_filter_of_attaching_observer() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let observable: NotificationsObservable<Event, u32> =
            NotificationsObservable::new(move |context| {
                crate::observable::FnHook::new(
                    move |_: &Observer<Notification<Event, u32>>| {
                        sink.borrow_mut().push(context.is_observed_for(Event::Close));
                        Ok(())
                    },
                    |_: &Observer<Notification<Event, u32>>| {},
                )
            });
        let _open = observable.on(Event::Open, |_| {}).unwrap();
        let _close = observable.on(Event::Close, |_| {}).unwrap();
        assert_eq!(*seen.borrow(), vec![false, true]);
    }

    #[test]
    fn notification_accessors() {
        let notification = Notification::new("tick", 4);
        assert_eq!(notification.name(), &"tick");
        assert_eq!(notification.value(), &4);
        assert_eq!(notification.into_parts(), ("tick", 4));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn notification_serializes_as_pair() {
        let json = serde_json::to_string(&Notification::new("cancel", 1)).unwrap();
        assert_eq!(json, r#"{"name":"cancel","value":1}"#);
    }
}
