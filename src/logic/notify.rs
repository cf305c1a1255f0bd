use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};

/// Signals surfaced to external observers (GUI, slicing trigger). One batch
/// per logical action, coalesced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    QualityCatalogRebuilt,
    ActiveQualityChanged,
    MaterialChanged { position: usize },
    VariantChanged { position: usize },
    ExtruderEnabledChanged { position: usize },
    /// Per-setting variant; coalescing keeps only the last value per key.
    SettingValueChanged { key: String, value: Value },
    /// A user override was moved to the machine stack because its extruder
    /// went away. Informational notice, not an error.
    SettingRelocated { key: String },
}

#[derive(Default)]
struct NotifierState {
    depth: usize,
    pending: Vec<Signal>,
    batches: Vec<Vec<Signal>>,
}

/// Notification-suppression scope. Internal mutations emit freely; observers
/// get exactly one coalesced batch when the outermost scope closes.
#[derive(Default)]
pub struct Notifier {
    state: Mutex<NotifierState>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a batched-update region. Scopes nest; only the outermost flush
    /// produces a batch.
    pub fn batch(&self) -> BatchGuard<'_> {
        self.state.lock().depth += 1;
        BatchGuard { notifier: self }
    }

    pub fn emit(&self, signal: Signal) {
        let mut state = self.state.lock();
        state.pending.push(signal);
        if state.depth == 0 {
            Self::flush(&mut state);
        }
    }

    /// Consolidated batches accumulated since the last call.
    pub fn take_batches(&self) -> Vec<Vec<Signal>> {
        std::mem::take(&mut self.state.lock().batches)
    }

    fn flush(state: &mut NotifierState) {
        if state.pending.is_empty() {
            return;
        }
        let batch = Self::coalesce(std::mem::take(&mut state.pending));
        state.batches.push(batch);
    }

    /// Duplicate signals collapse to one; per-setting signals keep only the
    /// last value per key, at the position of the first occurrence.
    fn coalesce(pending: Vec<Signal>) -> Vec<Signal> {
        let mut batch: Vec<Signal> = Vec::new();
        for signal in pending {
            match &signal {
                Signal::SettingValueChanged { key, .. } => {
                    let existing = batch.iter_mut().find(|s| {
                        matches!(s, Signal::SettingValueChanged { key: k, .. } if k == key)
                    });
                    match existing {
                        Some(slot) => *slot = signal,
                        None => batch.push(signal),
                    }
                }
                _ => {
                    if !batch.contains(&signal) {
                        batch.push(signal);
                    }
                }
            }
        }
        batch
    }
}

/// RAII handle for one batched-update region.
pub struct BatchGuard<'a> {
    notifier: &'a Notifier,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.notifier.state.lock();
        state.depth -= 1;
        if state.depth == 0 {
            Notifier::flush(&mut state);
        }
    }
}

/// Coalesces bursts of catalog mutations: the rebuild runs once, a fixed
/// interval after the last observed change. Flushed at manager sync points;
/// there is no background timer.
#[derive(Debug)]
pub struct RebuildDebouncer {
    interval: Duration,
    last_change: Option<Instant>,
}

impl RebuildDebouncer {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_change: None,
        }
    }

    pub fn note_change(&mut self) {
        self.last_change = Some(Instant::now());
    }

    pub fn is_pending(&self) -> bool {
        self.last_change.is_some()
    }

    /// True once per quiet period: a change was observed and the interval
    /// since the last one has elapsed. Clears the pending state.
    pub fn take_if_due(&mut self) -> bool {
        match self.last_change {
            Some(last) if last.elapsed() >= self.interval => {
                self.last_change = None;
                true
            }
            _ => false,
        }
    }

    /// Clear pending state unconditionally (used by forced rebuilds).
    pub fn reset(&mut self) {
        self.last_change = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn one_batch_per_logical_action() {
        let notifier = Notifier::new();
        {
            let _scope = notifier.batch();
            notifier.emit(Signal::MaterialChanged { position: 0 });
            {
                let _inner = notifier.batch();
                notifier.emit(Signal::ActiveQualityChanged);
            }
            notifier.emit(Signal::ActiveQualityChanged);
        }
        let batches = notifier.take_batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0],
            vec![
                Signal::MaterialChanged { position: 0 },
                Signal::ActiveQualityChanged
            ]
        );
    }

    #[test]
    fn per_setting_signals_keep_last_value_per_key() {
        let notifier = Notifier::new();
        {
            let _scope = notifier.batch();
            notifier.emit(Signal::SettingValueChanged {
                key: "layer_height".into(),
                value: json!(0.2),
            });
            notifier.emit(Signal::SettingValueChanged {
                key: "speed_print".into(),
                value: json!(60),
            });
            notifier.emit(Signal::SettingValueChanged {
                key: "layer_height".into(),
                value: json!(0.1),
            });
        }
        let batches = notifier.take_batches();
        assert_eq!(
            batches[0],
            vec![
                Signal::SettingValueChanged {
                    key: "layer_height".into(),
                    value: json!(0.1)
                },
                Signal::SettingValueChanged {
                    key: "speed_print".into(),
                    value: json!(60)
                },
            ]
        );
    }

    #[test]
    fn emit_outside_a_scope_flushes_immediately() {
        let notifier = Notifier::new();
        notifier.emit(Signal::QualityCatalogRebuilt);
        assert_eq!(notifier.take_batches().len(), 1);
    }

    #[test]
    fn debouncer_fires_once_after_the_quiet_period() {
        let mut debouncer = RebuildDebouncer::new(Duration::ZERO);
        assert!(!debouncer.take_if_due());
        debouncer.note_change();
        debouncer.note_change();
        assert!(debouncer.take_if_due());
        assert!(!debouncer.take_if_due());
    }

    #[test]
    fn debouncer_waits_out_the_interval() {
        let mut debouncer = RebuildDebouncer::new(Duration::from_secs(3600));
        debouncer.note_change();
        assert!(debouncer.is_pending());
        assert!(!debouncer.take_if_due());
        debouncer.reset();
        assert!(!debouncer.is_pending());
    }
}
