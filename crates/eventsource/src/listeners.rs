//! Listener registry for EventSource notifications

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::event::Notification;

/// Callback invoked for each matching notification
pub type Listener = Arc<dyn Fn(&Notification) + Send + Sync>;

/// Handle returned when registering a listener, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Which notifications a listener receives
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Filter {
    All,
    Open,
    Error,
    Message(String),
}

impl Filter {
    fn matches(&self, notification: &Notification) -> bool {
        match (self, notification) {
            (Filter::All, _) => true,
            (Filter::Open, Notification::Open) => true,
            (Filter::Error, Notification::Error(_)) => true,
            (Filter::Message(event_type), Notification::Message(message)) => {
                event_type == message.event_type()
            }
            _ => false,
        }
    }
}

struct Entry {
    filter: Filter,
    callback: Listener,
}

/// Registered listeners, delivered in registration order
#[derive(Clone, Default)]
pub(crate) struct Listeners {
    entries: Arc<DashMap<ListenerId, Entry>>,
    next_id: Arc<AtomicU64>,
}

impl Listeners {
    pub(crate) fn add(&self, filter: Filter, callback: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.insert(id, Entry { filter, callback });
        id
    }

    pub(crate) fn remove(&self, id: ListenerId) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Matching callbacks in registration order.
    ///
    /// The map is released before returning so callbacks may (un)subscribe.
    fn matching(&self, notification: &Notification) -> Vec<Listener> {
        let mut matched: Vec<(ListenerId, Listener)> = self
            .entries
            .iter()
            .filter(|e| e.value().filter.matches(notification))
            .map(|e| (*e.key(), e.value().callback.clone()))
            .collect();
        matched.sort_unstable_by_key(|(id, _)| *id);
        matched.into_iter().map(|(_, callback)| callback).collect()
    }

    /// Deliver a notification, stopping early once `stopped` reports true.
    ///
    /// Returns the number of listeners invoked.
    pub(crate) fn emit(&self, notification: &Notification, stopped: impl Fn() -> bool) -> usize {
        let mut delivered = 0;
        for callback in self.matching(notification) {
            if stopped() {
                break;
            }
            callback(notification);
            delivered += 1;
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MessageEvent;
    use crate::Error;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> Listener {
        let log = log.clone();
        let tag = tag.to_owned();
        Arc::new(move |n: &Notification| log.lock().unwrap().push(format!("{tag}:{}", n.name())))
    }

    #[test]
    fn delivers_in_registration_order() {
        let listeners = Listeners::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b", "c", "d", "e"] {
            listeners.add(Filter::All, recorder(&log, tag));
        }

        let delivered = listeners.emit(&Notification::Open, || false);

        assert_eq!(delivered, 5);
        assert_eq!(
            *log.lock().unwrap(),
            ["a:open", "b:open", "c:open", "d:open", "e:open"]
        );
    }

    #[test]
    fn filters_by_notification_kind() {
        let listeners = Listeners::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        listeners.add(Filter::Open, recorder(&log, "open"));
        listeners.add(Filter::Error, recorder(&log, "error"));
        listeners.add(Filter::Message("message".into()), recorder(&log, "message"));
        listeners.add(Filter::Message("patch".into()), recorder(&log, "patch"));

        listeners.emit(&Notification::Open, || false);
        listeners.emit(
            &Notification::Message(MessageEvent::new("x", "", "patch").unwrap()),
            || false,
        );
        listeners.emit(
            &Notification::Message(MessageEvent::message("x").unwrap()),
            || false,
        );
        listeners.emit(&Notification::Error(Error::invalid_input("x")), || false);

        assert_eq!(
            *log.lock().unwrap(),
            ["open:open", "patch:patch", "message:message", "error:error"]
        );
    }

    #[test]
    fn remove_and_clear() {
        let listeners = Listeners::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = listeners.add(Filter::All, recorder(&log, "a"));
        listeners.add(Filter::All, recorder(&log, "b"));

        assert!(listeners.remove(first));
        assert!(!listeners.remove(first));
        listeners.emit(&Notification::Open, || false);
        assert_eq!(*log.lock().unwrap(), ["b:open"]);

        listeners.clear();
        assert_eq!(listeners.len(), 0);
        assert_eq!(listeners.emit(&Notification::Open, || false), 0);
    }

    #[test]
    fn stops_delivery_once_stopped() {
        let listeners = Listeners::default();
        let stopped = Arc::new(AtomicBool::new(false));
        let log = Arc::new(Mutex::new(Vec::new()));

        let flag = stopped.clone();
        listeners.add(
            Filter::All,
            Arc::new(move |_: &Notification| flag.store(true, Ordering::SeqCst)),
        );
        listeners.add(Filter::All, recorder(&log, "late"));

        let delivered = listeners.emit(&Notification::Open, || stopped.load(Ordering::SeqCst));

        assert_eq!(delivered, 1);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn callbacks_may_subscribe_during_emit() {
        let listeners = Listeners::default();
        let inner = listeners.clone();
        listeners.add(
            Filter::All,
            Arc::new(move |_: &Notification| {
                inner.add(Filter::All, Arc::new(|_: &Notification| {}));
            }),
        );

        listeners.emit(&Notification::Open, || false);

        assert_eq!(listeners.len(), 2);
    }
}
