//! Event producer: build, sample, and emit envelopes.
//!
//! # Selection
//!
//! Candidates from all three datasets are fed through a reservoir of
//! `max_events` slots (Algorithm R) and the reservoir is then shuffled. The
//! result is a uniformly random subset in uniformly random order, the same
//! distribution as shuffling every candidate and keeping a prefix, without
//! holding more than `max_events` envelopes in memory.
//!
//! # Emission
//!
//! Envelopes are published one at a time, keyed by
//! [`Envelope::partition_key`], with a fixed delay between publishes. The
//! first publish failure aborts the run; retrying is the log client's job.

use crate::error::ProducerError;
use crate::source::{SourceSet, for_each_row};
use orderstream_core::environment::Clock;
use orderstream_core::event::Envelope;
use orderstream_core::event_bus::LogPublisher;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// Tuning for one producer run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerSettings {
    /// Cap on emitted events.
    pub max_events: usize,
    /// Pause after each publish.
    pub emit_delay: Duration,
    /// Log progress every this many events (0 disables).
    pub progress_every: usize,
    /// Seed for a reproducible selection and order.
    pub seed: Option<u64>,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            max_events: 50_000,
            emit_delay: Duration::from_millis(20),
            progress_every: 10_000,
            seed: None,
        }
    }
}

/// Uniform random sample of fixed capacity.
struct Reservoir<T> {
    capacity: usize,
    seen: usize,
    items: Vec<T>,
    rng: StdRng,
}

impl<T> Reservoir<T> {
    fn new(capacity: usize, rng: StdRng) -> Self {
        Self {
            capacity,
            seen: 0,
            items: Vec::with_capacity(capacity.min(1 << 16)),
            rng,
        }
    }

    fn offer(&mut self, item: T) {
        if self.items.len() < self.capacity {
            self.items.push(item);
        } else {
            let slot = self.rng.gen_range(0..=self.seen);
            if slot < self.capacity {
                self.items[slot] = item;
            }
        }
        self.seen += 1;
    }

    /// The sample in random order.
    fn into_shuffled(mut self) -> Vec<T> {
        self.items.shuffle(&mut self.rng);
        self.items
    }
}

/// Publishes source rows to the log as envelopes.
pub struct EventProducer {
    publisher: Arc<dyn LogPublisher>,
    clock: Arc<dyn Clock>,
    settings: ProducerSettings,
}

impl EventProducer {
    /// Create a producer.
    #[must_use]
    pub fn new(
        publisher: Arc<dyn LogPublisher>,
        clock: Arc<dyn Clock>,
        settings: ProducerSettings,
    ) -> Self {
        Self {
            publisher,
            clock,
            settings,
        }
    }

    fn rng(&self) -> StdRng {
        self.settings
            .seed
            .map_or_else(StdRng::from_entropy, StdRng::seed_from_u64)
    }

    /// Select at most `max_events` envelopes, uniformly at random, in random
    /// order.
    #[must_use]
    pub fn select(&self, candidates: impl IntoIterator<Item = Envelope>) -> Vec<Envelope> {
        let mut reservoir = Reservoir::new(self.settings.max_events, self.rng());
        for envelope in candidates {
            reservoir.offer(envelope);
        }
        reservoir.into_shuffled()
    }

    /// Build one envelope per source row and select the events to emit.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError::Source`] if a dataset cannot be read.
    pub fn load(&self, sources: &SourceSet) -> Result<Vec<Envelope>, ProducerError> {
        let mut reservoir = Reservoir::new(self.settings.max_events, self.rng());
        for (event_type, path) in sources.datasets() {
            let rows = for_each_row(path, |row| {
                reservoir.offer(Envelope::from_row(event_type, &row, self.clock.as_ref()));
            })?;
            tracing::info!(event_type = %event_type, path = %path.display(), rows = rows, "Loaded source dataset");
        }
        let candidates = reservoir.seen;
        let selected = reservoir.into_shuffled();
        tracing::info!(candidates = candidates, selected = selected.len(), "Selected events to emit");
        Ok(selected)
    }

    /// Publish `envelopes` in order, pacing and reporting progress.
    ///
    /// Returns the number of events published.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError`] on the first envelope that cannot be
    /// serialized or published.
    pub async fn emit(&self, envelopes: &[Envelope]) -> Result<usize, ProducerError> {
        let total = envelopes.len();

        for (index, envelope) in envelopes.iter().enumerate() {
            let payload = envelope.to_bytes()?;
            self.publisher
                .publish(envelope.partition_key(), &payload)
                .await
                .map_err(|source| ProducerError::Publish {
                    emitted: index,
                    source,
                })?;
            metrics::counter!("orderstream_events_produced_total").increment(1);

            let emitted = index + 1;
            if self.settings.progress_every > 0 && emitted % self.settings.progress_every == 0 {
                tracing::info!(emitted = emitted, total = total, "Emission progress");
            }

            if !self.settings.emit_delay.is_zero() {
                tokio::time::sleep(self.settings.emit_delay).await;
            }
        }

        Ok(total)
    }

    /// Load, select, and emit.
    ///
    /// # Errors
    ///
    /// Returns [`ProducerError`] if a dataset cannot be read or a publish
    /// fails.
    pub async fn run(&self, sources: &SourceSet) -> Result<usize, ProducerError> {
        let envelopes = self.load(sources)?;
        tracing::info!(events = envelopes.len(), "Streaming events");
        let emitted = self.emit(&envelopes).await?;
        tracing::info!(emitted = emitted, "Done");
        Ok(emitted)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use orderstream_testing::{InMemoryEventLog, fixtures, test_clock};
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn producer(log: &InMemoryEventLog, max_events: usize, seed: u64) -> EventProducer {
        EventProducer::new(
            Arc::new(log.clone()),
            Arc::new(test_clock()),
            ProducerSettings {
                max_events,
                emit_delay: Duration::ZERO,
                progress_every: 2,
                seed: Some(seed),
            },
        )
    }

    fn orders(count: usize) -> Vec<Envelope> {
        (0..count)
            .map(|n| Envelope::order_snapshot(&fixtures::order_row(&format!("o{n}"), "created")))
            .collect()
    }

    #[test]
    fn select_caps_and_keeps_distinct_candidates() {
        let log = InMemoryEventLog::new(1);
        let selected = producer(&log, 5, 7).select(orders(20));

        assert_eq!(selected.len(), 5);
        let ids: HashSet<_> = selected.iter().map(|e| e.order_id.clone()).collect();
        assert_eq!(ids.len(), 5);
    }

    #[test]
    fn select_is_reproducible_with_a_seed() {
        let log = InMemoryEventLog::new(1);
        let first = producer(&log, 10, 42).select(orders(30));
        let second = producer(&log, 10, 42).select(orders(30));
        assert_eq!(first, second);
    }

    #[test]
    fn reservoir_gives_every_candidate_a_chance() {
        let log = InMemoryEventLog::new(1);
        let mut seen = HashSet::new();
        for seed in 0..200 {
            for envelope in producer(&log, 2, seed).select(orders(6)) {
                seen.insert(envelope.order_id);
            }
        }
        assert_eq!(seen.len(), 6);
    }

    #[tokio::test]
    async fn emit_publishes_keyed_by_order_id() {
        let log = InMemoryEventLog::new(4);
        let blank = Envelope::order_snapshot(&fixtures::with(
            fixtures::order_row("x", "created"),
            "order_id",
            "",
        ));
        let envelopes = vec![orders(1).remove(0), blank];

        let emitted = producer(&log, 10, 1).emit(&envelopes).await.unwrap();

        assert_eq!(emitted, 2);
        let keys: Vec<_> = log.records().into_iter().map(|(key, _)| key).collect();
        assert_eq!(keys, vec!["o0".to_string(), "unknown".to_string()]);
    }

    #[tokio::test]
    async fn first_publish_failure_aborts() {
        let log = InMemoryEventLog::new(1);
        log.fail_publish_at(1);

        let result = producer(&log, 10, 1).emit(&orders(3)).await;

        assert!(matches!(result, Err(ProducerError::Publish { emitted: 1, .. })));
        assert_eq!(log.len(), 1);
    }

    proptest! {
        #[test]
        fn selection_size_is_min_of_cap_and_candidates(cap in 0_usize..12, count in 0_usize..12, seed in any::<u64>()) {
            let log = InMemoryEventLog::new(1);
            let selected = producer(&log, cap, seed).select(orders(count));
            prop_assert_eq!(selected.len(), cap.min(count));
        }
    }
}
