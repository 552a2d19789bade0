use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

/// Records when named steps start and finish, for ordering and overlap assertions.
#[derive(Debug, Default)]
pub struct Probe {
    starts: Mutex<HashMap<String, Instant>>,
    finishes: Mutex<Vec<(String, Instant)>>,
}

impl Probe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self, name: &str) {
        self.starts
            .lock()
            .unwrap()
            .insert(name.to_string(), Instant::now());
    }

    pub fn finish(&self, name: &str) {
        self.finishes
            .lock()
            .unwrap()
            .push((name.to_string(), Instant::now()));
    }

    pub fn started(&self, name: &str) -> Option<Instant> {
        self.starts.lock().unwrap().get(name).copied()
    }

    pub fn finished(&self, name: &str) -> Option<Instant> {
        self.finishes
            .lock()
            .unwrap()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| *t)
    }

    /// Whether the step started at all.
    pub fn ran(&self, name: &str) -> bool {
        self.started(name).is_some()
    }

    /// Step names in the order they finished.
    pub fn finish_order(&self) -> Vec<String> {
        self.finishes
            .lock()
            .unwrap()
            .iter()
            .map(|(n, _)| n.clone())
            .collect()
    }

    /// True when both steps had started before either finished.
    pub fn overlapped(&self, a: &str, b: &str) -> bool {
        match (
            self.started(a),
            self.started(b),
            self.finished(a),
            self.finished(b),
        ) {
            (Some(sa), Some(sb), Some(fa), Some(fb)) => sa.max(sb) < fa.min(fb),
            _ => false,
        }
    }
}
