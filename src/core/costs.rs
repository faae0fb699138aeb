use std::sync::{Arc, Mutex};

/// Per-model USD rates per 1M tokens: (prompt, completion).
/// Unknown models fall back to a small default so cost tracking keeps
/// working when a new model name shows up.
const MODEL_RATES: &[(&str, f64, f64)] = &[
    ("gpt-4o", 2.50, 10.00),
    ("gpt-4o-mini", 0.15, 0.60),
    ("gpt-4.1", 2.00, 8.00),
    ("gpt-4.1-mini", 0.40, 1.60),
    ("gpt-4.1-nano", 0.10, 0.40),
    ("o3", 2.00, 8.00),
    ("o4-mini", 1.10, 4.40),
    ("claude-sonnet-4", 3.00, 15.00),
    ("claude-haiku-3.5", 0.80, 4.00),
    ("gemini-2.5-flash", 0.30, 2.50),
    ("gemini-2.5-pro", 1.25, 10.00),
];

const DEFAULT_RATE: (f64, f64) = (0.50, 1.50);

fn rate_for(model: &str) -> (f64, f64) {
    let lower = model.to_ascii_lowercase();
    // Longest prefix wins so "gpt-4o-mini" does not match the "gpt-4o" row.
    let mut best: Option<(&str, f64, f64)> = None;
    for &(name, p, c) in MODEL_RATES {
        if lower.starts_with(name) {
            match best {
                Some((prev, _, _)) if prev.len() >= name.len() => {}
                _ => best = Some((name, p, c)),
            }
        }
    }
    best.map(|(_, p, c)| (p, c)).unwrap_or(DEFAULT_RATE)
}

#[derive(Debug, Default, Clone, Copy)]
struct CostState {
    total_cost: f64,
    prompt_tokens: u64,
    completion_tokens: u64,
}

/// Task-scoped, monotonically non-decreasing cost accumulator.
/// Shared across every LLM call a task makes; mutations go through
/// `on_usage` only, so the total can never go down.
#[derive(Debug, Clone, Default)]
pub struct CostTracker {
    state: Arc<Mutex<CostState>>,
}

/// Snapshot of the running totals, shaped for the `cost` stream event.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CostSnapshot {
    pub total_tokens: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_cost: f64,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record usage reported by a provider. Returns the updated snapshot so
    /// callers can emit a cost event without re-locking.
    pub fn on_usage(&self, prompt_tokens: u64, completion_tokens: u64, model: &str) -> CostSnapshot {
        let (prompt_rate, completion_rate) = rate_for(model);
        let cost = (prompt_tokens as f64 * prompt_rate
            + completion_tokens as f64 * completion_rate)
            / 1_000_000.0;

        let mut state = self.state.lock().expect("cost tracker poisoned");
        state.total_cost += cost;
        state.prompt_tokens += prompt_tokens;
        state.completion_tokens += completion_tokens;
        CostSnapshot {
            total_tokens: state.prompt_tokens + state.completion_tokens,
            prompt_tokens: state.prompt_tokens,
            completion_tokens: state.completion_tokens,
            total_cost: state.total_cost,
        }
    }

    pub fn total(&self) -> f64 {
        self.state.lock().expect("cost tracker poisoned").total_cost
    }

    pub fn snapshot(&self) -> CostSnapshot {
        let state = self.state.lock().expect("cost tracker poisoned");
        CostSnapshot {
            total_tokens: state.prompt_tokens + state.completion_tokens,
            prompt_tokens: state.prompt_tokens,
            completion_tokens: state.completion_tokens,
            total_cost: state.total_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_is_monotonic() {
        let tracker = CostTracker::new();
        let mut last = 0.0;
        for _ in 0..50 {
            let snap = tracker.on_usage(1000, 500, "gpt-4o-mini");
            assert!(snap.total_cost >= last);
            last = snap.total_cost;
        }
        assert!(tracker.total() > 0.0);
    }

    #[test]
    fn longest_model_prefix_wins() {
        assert_eq!(rate_for("gpt-4o-mini-2024"), (0.15, 0.60));
        assert_eq!(rate_for("gpt-4o-2024"), (2.50, 10.00));
    }

    #[test]
    fn unknown_model_uses_default_rate() {
        assert_eq!(rate_for("some-new-model"), DEFAULT_RATE);
    }
}
