//! Process-wide counters rendered by the `/metrics` endpoint.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::registry::ConnectionRegistry;

static OPEN_CONNECTIONS: AtomicU64 = AtomicU64::new(0);
static MESSAGES_APPENDED: AtomicU64 = AtomicU64::new(0);
static PUSHES_DELIVERED: AtomicU64 = AtomicU64::new(0);
static PUSHES_DROPPED: AtomicU64 = AtomicU64::new(0);
static STORAGE_ERRORS: AtomicU64 = AtomicU64::new(0);

pub fn connection_opened() {
    OPEN_CONNECTIONS.fetch_add(1, Ordering::Relaxed);
}

pub fn connection_closed() {
    let _ = OPEN_CONNECTIONS.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        current.checked_sub(1)
    });
}

pub fn record_message_appended() {
    MESSAGES_APPENDED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_push_delivered() {
    PUSHES_DELIVERED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_push_dropped() {
    PUSHES_DROPPED.fetch_add(1, Ordering::Relaxed);
}

pub fn record_storage_error() {
    STORAGE_ERRORS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub open_connections: u64,
    pub messages_appended: u64,
    pub pushes_delivered: u64,
    pub pushes_dropped: u64,
    pub storage_errors: u64,
}

pub fn snapshot() -> CounterSnapshot {
    CounterSnapshot {
        open_connections: OPEN_CONNECTIONS.load(Ordering::Relaxed),
        messages_appended: MESSAGES_APPENDED.load(Ordering::Relaxed),
        pushes_delivered: PUSHES_DELIVERED.load(Ordering::Relaxed),
        pushes_dropped: PUSHES_DROPPED.load(Ordering::Relaxed),
        storage_errors: STORAGE_ERRORS.load(Ordering::Relaxed),
    }
}

/// Prometheus text exposition of the counters plus live registry gauges.
pub fn render_prometheus(registry: &ConnectionRegistry) -> String {
    let counters = snapshot();
    let mut out = String::from("whistle_up 1\n");
    let lines = [
        ("whistle_ws_open_connections", counters.open_connections),
        ("whistle_online_users", registry.online_user_count() as u64),
        ("whistle_registered_channels", registry.channel_count() as u64),
        ("whistle_messages_appended_total", counters.messages_appended),
        ("whistle_pushes_delivered_total", counters.pushes_delivered),
        ("whistle_pushes_dropped_total", counters.pushes_dropped),
        ("whistle_storage_errors_total", counters.storage_errors),
    ];
    for (name, value) in lines {
        let _ = writeln!(out, "{name} {value}");
    }
    out
}
