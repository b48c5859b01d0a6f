// ABOUTME: Counters for polling and command execution
// ABOUTME: Recorded through the metrics facade; a no-op unless a recorder is installed

use crate::site::Site;

pub fn record_poll(site: Site, success: bool) {
    metrics::counter!(
        "sechat_polls_total",
        "site" => site.key(),
        "result" => if success { "ok" } else { "error" }
    )
    .increment(1);
}

pub fn record_events_received(site: Site, count: usize) {
    metrics::counter!("sechat_events_received_total", "site" => site.key())
        .increment(count as u64);
}

pub fn record_event_seen(kind: u32) {
    metrics::counter!("sechat_events_seen_total", "event_type" => kind.to_string()).increment(1);
}

pub fn record_event_dispatched(kind: u32) {
    metrics::counter!("sechat_events_dispatched_total", "event_type" => kind.to_string())
        .increment(1);
}

pub fn record_command(name: &str) {
    metrics::counter!("sechat_commands_total", "command" => name.to_string()).increment(1);
}

pub fn record_command_timeout(name: &str) {
    metrics::counter!("sechat_command_timeouts_total", "command" => name.to_string())
        .increment(1);
}

pub fn record_error(kind: &'static str) {
    metrics::counter!("sechat_errors_total", "kind" => kind).increment(1);
}
