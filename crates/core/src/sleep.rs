use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

const SLICE_MS: u64 = 100;

/// Sleep for exact milliseconds. Zero returns immediately.
pub fn sleep_ms(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Sleep up to `ms`, waking early when `stop` is raised.
/// Returns `false` if the sleep was cut short by the stop flag.
pub fn sleep_unless_stopped(ms: u64, stop: &AtomicBool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(ms);
    loop {
        if stop.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(SLICE_MS)));
    }
}
