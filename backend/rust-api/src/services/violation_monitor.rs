use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::models::anticheat::{MonitorEvent, PlatformSignal};

pub type SignalHandler = Arc<dyn Fn(PlatformSignal) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

/// Observable source of raw page signals (the page's `document`).
pub trait SignalSource: Send + Sync {
    fn subscribe(&self, handler: SignalHandler) -> Subscription;

    /// After this returns the handler is never invoked again.
    fn unsubscribe(&self, subscription: Subscription);
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    handlers: HashMap<u64, SignalHandler>,
}

/// In-process signal source fed by the client's HTTP signal reports.
///
/// Handlers run while the bus lock is held: they must not call back into
/// the bus.
#[derive(Default)]
pub struct SignalBus {
    inner: Mutex<BusInner>,
}

impl SignalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delivers a signal to every current subscriber. Returns how many were notified.
    pub fn emit(&self, signal: PlatformSignal) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        for handler in inner.handlers.values() {
            handler(signal);
        }
        inner.handlers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }
}

impl SignalSource for SignalBus {
    fn subscribe(&self, handler: SignalHandler) -> Subscription {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.handlers.insert(id, handler);
        Subscription(id)
    }

    fn unsubscribe(&self, subscription: Subscription) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .remove(&subscription.0);
    }
}

pub trait ViolationCallbacks: Send + Sync {
    fn on_tab_switch(&self);
    fn on_fullscreen_exit(&self);
    fn on_fullscreen_restore(&self);
}

impl<F> ViolationCallbacks for F
where
    F: Fn(MonitorEvent) + Send + Sync,
{
    fn on_tab_switch(&self) {
        self(MonitorEvent::TabSwitchDetected)
    }

    fn on_fullscreen_exit(&self) {
        self(MonitorEvent::FullscreenExited)
    }

    fn on_fullscreen_restore(&self) {
        self(MonitorEvent::FullscreenRestored)
    }
}

/// Tracks page state so repeated raw signals only fire on transitions.
#[derive(Debug)]
struct SignalTracker {
    hidden: bool,
    fullscreen: bool,
}

impl SignalTracker {
    /// The monitor is armed right after fullscreen was entered on a visible page.
    fn armed() -> Self {
        Self {
            hidden: false,
            fullscreen: true,
        }
    }

    fn observe(&mut self, signal: PlatformSignal) -> Option<MonitorEvent> {
        match signal {
            PlatformSignal::VisibilityHidden if !self.hidden => {
                self.hidden = true;
                Some(MonitorEvent::TabSwitchDetected)
            }
            PlatformSignal::VisibilityVisible => {
                self.hidden = false;
                None
            }
            PlatformSignal::FullscreenExited if self.fullscreen => {
                self.fullscreen = false;
                Some(MonitorEvent::FullscreenExited)
            }
            PlatformSignal::FullscreenEntered if !self.fullscreen => {
                self.fullscreen = true;
                Some(MonitorEvent::FullscreenRestored)
            }
            _ => None,
        }
    }
}

/// Turns raw visibility and fullscreen signals into domain callbacks while armed.
pub struct ViolationMonitor {
    source: Arc<dyn SignalSource>,
    subscription: Option<Subscription>,
}

impl ViolationMonitor {
    pub fn new(source: Arc<dyn SignalSource>) -> Self {
        Self {
            source,
            subscription: None,
        }
    }

    /// Arming an already armed monitor keeps the existing subscription.
    pub fn arm(&mut self, callbacks: Arc<dyn ViolationCallbacks>) {
        if self.subscription.is_some() {
            return;
        }

        let tracker = Mutex::new(SignalTracker::armed());
        let handler: SignalHandler = Arc::new(move |signal| {
            let event = tracker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observe(signal);
            match event {
                Some(MonitorEvent::TabSwitchDetected) => callbacks.on_tab_switch(),
                Some(MonitorEvent::FullscreenExited) => callbacks.on_fullscreen_exit(),
                Some(MonitorEvent::FullscreenRestored) => callbacks.on_fullscreen_restore(),
                None => {}
            }
        });

        self.subscription = Some(self.source.subscribe(handler));
        tracing::debug!("Violation monitor armed");
    }

    pub fn disarm(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.source.unsubscribe(subscription);
            tracing::debug!("Violation monitor disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.subscription.is_some()
    }
}

impl Drop for ViolationMonitor {
    fn drop(&mut self) {
        self.disarm();
    }
}
