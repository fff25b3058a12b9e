use super::RuntimeConfig;

/// Overlay environment overrides onto `cfg`. Unparseable values are ignored.
pub(super) fn apply_overrides<F>(cfg: &mut RuntimeConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(n) = parse::<usize>(&lookup, "ENTITY_RUNTIME_WORKER_THREADS") {
        cfg.executor.worker_threads = n;
    }
    if let Some(n) = parse::<usize>(&lookup, "ENTITY_RUNTIME_MAX_BLOCKING_THREADS") {
        cfg.executor.max_blocking_threads = n;
    }
    if let Some(n) = parse::<usize>(&lookup, "ENTITY_RUNTIME_EVENT_BUFFER") {
        cfg.subscriptions.event_buffer = n;
    }
}

fn parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    lookup(name)?.parse::<T>().ok()
}
