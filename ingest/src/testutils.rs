use crate::codec::Submission;
use crate::store::Clock;
use std::sync::atomic::{AtomicU64, Ordering};

pub fn submission(pairs: &[(&str, &str)]) -> Submission {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Always returns the same timestamp, forcing key collisions.
pub struct FixedClock(String);

impl FixedClock {
    pub fn new(timestamp: &str) -> Self {
        Self(timestamp.to_string())
    }
}

impl Clock for FixedClock {
    fn timestamp(&self) -> String {
        self.0.clone()
    }
}

/// Returns a strictly increasing timestamp on every call.
#[derive(Default)]
pub struct SequenceClock(AtomicU64);

impl Clock for SequenceClock {
    fn timestamp(&self) -> String {
        let tick = self.0.fetch_add(1, Ordering::SeqCst);
        format!("2024-05-01 00:00:00.{tick:06}")
    }
}

/// Writes the three fixed pages plus a stylesheet into a fresh directory.
pub fn pages_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.html"), "<h1>index</h1>").unwrap();
    std::fs::write(dir.path().join("message.html"), "<h1>thanks</h1>").unwrap();
    std::fs::write(dir.path().join("error.html"), "<h1>missing</h1>").unwrap();
    std::fs::write(dir.path().join("style.css"), "body { margin: 0 }").unwrap();
    dir
}
