#![forbid(unsafe_code)]

//! Observer registry: who gets called when a container changes.
//!
//! The registry maps a [`ContainerId`] to an ordered list of
//! `(handle, tag, callback)` registrations. It knows nothing about values or
//! status; containers decide *when* to notify, the registry decides *who*.
//! One registry is shared by every container created from the same
//! [`InstanceRegistry`](crate::InstanceRegistry), so a joined singleton is
//! notified through the same primitive as the instance that triggered it.
//!
//! # Invariants
//!
//! 1. A handle appears at most once per container. Subscribing again
//!    replaces the earlier registration in place (same notification slot).
//! 2. Notification order is subscription order.
//! 3. An untagged subscriber is notified by every pass; a tagged subscriber
//!    only by passes whose filter is empty or contains its tag.
//! 4. Callbacks run with no registry borrow held, so they may subscribe,
//!    unsubscribe, or trigger further notifications.

use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;

static NEXT_CONTAINER_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_OBSERVER_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Identity of a container inside an [`ObserverRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(u64);

impl ContainerId {
    pub(crate) fn next() -> Self {
        Self(NEXT_CONTAINER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Opaque identity of one observer (typically one widget).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

impl ObserverHandle {
    /// Allocate a handle no other caller has been given.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_OBSERVER_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a caller-chosen raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Subscriber-side label scoping which notifications reach it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(Cow<'static, str>);

impl Tag {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for Tag {
    fn from(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }
}

impl From<String> for Tag {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Set of tags a notification pass is restricted to. Empty means everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    tags: Vec<Tag>,
}

impl TagFilter {
    /// A filter admitting every subscriber.
    #[must_use]
    pub const fn all() -> Self {
        Self { tags: Vec::new() }
    }

    /// A filter admitting untagged subscribers plus those tagged with one of
    /// `tags`.
    pub fn only<I, T>(tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        let mut filter = Self::all();
        for tag in tags {
            filter.insert(tag);
        }
        filter
    }

    /// Add a tag, ignoring duplicates.
    pub fn insert(&mut self, tag: impl Into<Tag>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    #[must_use]
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Whether a subscriber registered under `tag` passes this filter.
    #[must_use]
    pub fn admits(&self, tag: Option<&Tag>) -> bool {
        self.tags.is_empty() || tag.is_none_or(|tag| self.tags.contains(tag))
    }
}

struct Registration {
    handle: ObserverHandle,
    tag: Option<Tag>,
    callback: Rc<dyn Fn()>,
}

/// Container-to-subscribers map with tag-filtered dispatch.
#[derive(Default)]
pub struct ObserverRegistry {
    subscribers: RefCell<AHashMap<ContainerId, Vec<Registration>>>,
    notifications: Cell<u64>,
}

impl fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let subscribers = self.subscribers.borrow();
        f.debug_struct("ObserverRegistry")
            .field("containers", &subscribers.len())
            .field(
                "subscribers",
                &subscribers.values().map(Vec::len).sum::<usize>(),
            )
            .field("notifications", &self.notifications.get())
            .finish()
    }
}

impl ObserverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `container` under `handle`.
    ///
    /// Returns `true` if an earlier registration for the same handle was
    /// replaced.
    pub fn subscribe(
        &self,
        container: ContainerId,
        handle: ObserverHandle,
        tag: Option<Tag>,
        callback: impl Fn() + 'static,
    ) -> bool {
        let registration = Registration {
            handle,
            tag,
            callback: Rc::new(callback),
        };
        let mut subscribers = self.subscribers.borrow_mut();
        let list = subscribers.entry(container).or_default();
        match list.iter_mut().find(|r| r.handle == handle) {
            Some(existing) => {
                *existing = registration;
                true
            }
            None => {
                list.push(registration);
                false
            }
        }
    }

    /// Remove `handle`'s registration. Returns `false` if there was none.
    pub fn unsubscribe(&self, container: ContainerId, handle: ObserverHandle) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let Some(list) = subscribers.get_mut(&container) else {
            return false;
        };
        let before = list.len();
        list.retain(|r| r.handle != handle);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(&container);
        }
        removed
    }

    /// Invoke every subscriber of `container` admitted by `filter`, in
    /// subscription order. Returns how many were invoked.
    pub fn notify(&self, container: ContainerId, filter: &TagFilter) -> usize {
        let callbacks: Vec<Rc<dyn Fn()>> = {
            let subscribers = self.subscribers.borrow();
            let Some(list) = subscribers.get(&container) else {
                return 0;
            };
            list.iter()
                .filter(|r| filter.admits(r.tag.as_ref()))
                .map(|r| Rc::clone(&r.callback))
                .collect()
        };
        for callback in &callbacks {
            callback();
        }
        self.notifications
            .set(self.notifications.get() + callbacks.len() as u64);
        callbacks.len()
    }

    #[must_use]
    pub fn subscriber_count(&self, container: ContainerId) -> usize {
        self.subscribers
            .borrow()
            .get(&container)
            .map_or(0, Vec::len)
    }

    #[must_use]
    pub fn is_subscribed(&self, container: ContainerId, handle: ObserverHandle) -> bool {
        self.subscribers
            .borrow()
            .get(&container)
            .is_some_and(|list| list.iter().any(|r| r.handle == handle))
    }

    /// Drop every registration for `container`. Returns how many were removed.
    pub fn clear(&self, container: ContainerId) -> usize {
        self.subscribers
            .borrow_mut()
            .remove(&container)
            .map_or(0, |list| list.len())
    }

    /// Callbacks invoked across all containers since creation.
    #[must_use]
    pub fn total_notifications(&self) -> u64 {
        self.notifications.get()
    }
}

/// RAII guard for a registration; unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    registry: Weak<ObserverRegistry>,
    container: ContainerId,
    handle: ObserverHandle,
}

impl Subscription {
    pub(crate) fn new(
        registry: &Rc<ObserverRegistry>,
        container: ContainerId,
        handle: ObserverHandle,
    ) -> Self {
        Self {
            registry: Rc::downgrade(registry),
            container,
            handle,
        }
    }

    #[must_use]
    pub fn handle(&self) -> ObserverHandle {
        self.handle
    }

    #[must_use]
    pub fn container(&self) -> ContainerId {
        self.container
    }

    /// Whether the registration is still present.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|r| r.is_subscribed(self.container, self.handle))
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("container", &self.container)
            .field("handle", &self.handle)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(self.container, self.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> (Rc<Cell<u32>>, impl Fn() + 'static) {
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        (hits, move || h.set(h.get() + 1))
    }

    #[test]
    fn notify_reaches_all_without_filter() {
        let reg = ObserverRegistry::new();
        let id = ContainerId::next();
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        reg.subscribe(id, ObserverHandle::next(), None, cb_a);
        reg.subscribe(id, ObserverHandle::next(), Some("list".into()), cb_b);

        assert_eq!(reg.notify(id, &TagFilter::all()), 2);
        assert_eq!((a.get(), b.get()), (1, 1));
    }

    #[test]
    fn filter_skips_disjoint_tags_but_not_untagged() {
        let reg = ObserverRegistry::new();
        let id = ContainerId::next();
        let (plain, cb_plain) = counter();
        let (header, cb_header) = counter();
        let (footer, cb_footer) = counter();
        reg.subscribe(id, ObserverHandle::next(), None, cb_plain);
        reg.subscribe(id, ObserverHandle::next(), Some("header".into()), cb_header);
        reg.subscribe(id, ObserverHandle::next(), Some("footer".into()), cb_footer);

        let n = reg.notify(id, &TagFilter::only(["header"]));
        assert_eq!(n, 2);
        assert_eq!((plain.get(), header.get(), footer.get()), (1, 1, 0));
    }

    #[test]
    fn resubscribe_replaces_in_place() {
        let reg = ObserverRegistry::new();
        let id = ContainerId::next();
        let order = Rc::new(RefCell::new(Vec::new()));
        let first = ObserverHandle::next();
        let second = ObserverHandle::next();

        for (handle, label) in [(first, "a"), (second, "b")] {
            let order = Rc::clone(&order);
            reg.subscribe(id, handle, None, move || order.borrow_mut().push(label));
        }
        let o = Rc::clone(&order);
        assert!(reg.subscribe(id, first, None, move || o.borrow_mut().push("a2")));

        assert_eq!(reg.subscriber_count(id), 2);
        reg.notify(id, &TagFilter::all());
        assert_eq!(*order.borrow(), vec!["a2", "b"]);
    }

    #[test]
    fn unsubscribe_is_noop_when_absent() {
        let reg = ObserverRegistry::new();
        let id = ContainerId::next();
        assert!(!reg.unsubscribe(id, ObserverHandle::next()));

        let handle = ObserverHandle::next();
        reg.subscribe(id, handle, None, || {});
        assert!(reg.unsubscribe(id, handle));
        assert!(!reg.unsubscribe(id, handle));
        assert_eq!(reg.notify(id, &TagFilter::all()), 0);
    }

    #[test]
    fn callbacks_may_unsubscribe_reentrantly() {
        let reg = Rc::new(ObserverRegistry::new());
        let id = ContainerId::next();
        let handle = ObserverHandle::next();
        let weak = Rc::downgrade(&reg);
        reg.subscribe(id, handle, None, move || {
            if let Some(reg) = weak.upgrade() {
                reg.unsubscribe(id, handle);
            }
        });

        assert_eq!(reg.notify(id, &TagFilter::all()), 1);
        assert_eq!(reg.subscriber_count(id), 0);
    }

    #[test]
    fn subscription_guard_unsubscribes_on_drop() {
        let reg = Rc::new(ObserverRegistry::new());
        let id = ContainerId::next();
        let handle = ObserverHandle::next();
        reg.subscribe(id, handle, None, || {});
        let guard = Subscription::new(&reg, id, handle);
        assert!(guard.is_active());

        drop(guard);
        assert!(!reg.is_subscribed(id, handle));
    }

    #[test]
    fn containers_are_isolated() {
        let reg = ObserverRegistry::new();
        let a = ContainerId::next();
        let b = ContainerId::next();
        let (hits, cb) = counter();
        reg.subscribe(a, ObserverHandle::next(), None, cb);

        assert_eq!(reg.notify(b, &TagFilter::all()), 0);
        assert_eq!(hits.get(), 0);
        assert_eq!(reg.clear(a), 1);
        assert_eq!(reg.total_notifications(), 0);
    }

    #[test]
    fn tag_filter_dedups() {
        let mut filter = TagFilter::only(["x", "x"]);
        filter.insert("y");
        filter.insert(String::from("y"));
        assert_eq!(filter.tags().len(), 2);
        assert!(filter.admits(None));
        assert!(filter.admits(Some(&Tag::new("y"))));
        assert!(!filter.admits(Some(&Tag::new("z"))));
        assert!(TagFilter::all().admits(Some(&Tag::new("z"))));
    }
}
