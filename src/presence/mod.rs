//! Card presence detection
//!
//! Polls the sensor transport on a background task and turns raw reads into
//! edge-triggered arrival/departure events. Removal is debounced: the reader
//! routinely drops a single poll while a card sits on the pad, so a card only
//! counts as gone after several consecutive empty reads.

pub mod transport;

use crate::card::CardId;
use crate::config::SensorConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use transport::{PresenceFileTransport, SensorTransport};

/// Edge-triggered presence event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// A card was placed on the pad, or a different card replaced the one
    /// that was there (swap without an observed removal).
    CardArrived(CardId),
    /// The present card has been gone for the full debounce window.
    CardDeparted,
}

/// Debounce state machine, separated from the polling loop so the rule is
/// testable without timing.
///
/// One `observe` per poll: a non-empty read arrives (or swaps) immediately
/// and resets the miss counter; an empty read only departs the card after
/// `threshold` consecutive misses.
#[derive(Debug)]
pub struct DebounceState {
    threshold: u32,
    present: Option<CardId>,
    misses: u32,
}

impl DebounceState {
    pub fn new(threshold: u32) -> Self {
        Self {
            // A threshold of 0 would depart a card that was never missed
            threshold: threshold.max(1),
            present: None,
            misses: 0,
        }
    }

    /// Feed one poll result, returning the event it triggers, if any.
    pub fn observe(&mut self, read: Option<CardId>) -> Option<PresenceEvent> {
        match read {
            Some(id) => {
                self.misses = 0;
                if self.present.as_ref() == Some(&id) {
                    None
                } else {
                    self.present = Some(id.clone());
                    Some(PresenceEvent::CardArrived(id))
                }
            }
            None => {
                if self.present.is_none() {
                    self.misses = 0;
                    return None;
                }
                self.misses += 1;
                if self.misses >= self.threshold {
                    self.present = None;
                    self.misses = 0;
                    Some(PresenceEvent::CardDeparted)
                } else {
                    None
                }
            }
        }
    }

    pub fn is_present(&self) -> bool {
        self.present.is_some()
    }
}

/// Background poller emitting [`PresenceEvent`]s over a channel
pub struct PresenceDetector {
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PresenceDetector {
    /// Spawn the polling task.
    ///
    /// Cadence is short while the pad is empty and longer while a card is
    /// present, to keep the bus quiet during playback. Transport errors are
    /// absorbed: each one is logged, counts as a single empty read, and adds
    /// the configured backoff before the next poll.
    pub fn start(
        transport: Arc<dyn SensorTransport>,
        settings: SensorConfig,
    ) -> (Self, mpsc::Receiver<PresenceEvent>) {
        let (event_tx, event_rx) = mpsc::channel(16);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            info!("Presence detector started");
            let mut debounce = DebounceState::new(settings.departure_threshold);

            loop {
                let mut errored = false;
                let read = match transport.read_presence(settings.read_timeout()).await {
                    Ok(Some(raw)) => match CardId::parse(&raw) {
                        Some(id) => Some(id),
                        None => {
                            debug!("Discarding unparseable read: {:?}", raw);
                            None
                        }
                    },
                    Ok(None) => None,
                    Err(e) => {
                        warn!("Sensor read failed: {:#}", e);
                        errored = true;
                        None
                    }
                };

                if let Some(event) = debounce.observe(read) {
                    match &event {
                        PresenceEvent::CardArrived(id) => info!("🪪 Card detected: {}", id),
                        PresenceEvent::CardDeparted => info!("🪪 Card removed"),
                    }
                    if event_tx.send(event).await.is_err() {
                        debug!("Event receiver dropped, stopping presence detector");
                        break;
                    }
                }

                if errored {
                    tokio::select! {
                        _ = shutdown_rx.recv() => break,
                        _ = tokio::time::sleep(settings.error_backoff()) => {}
                    }
                }

                let cadence = if debounce.is_present() {
                    settings.poll_interval_present()
                } else {
                    settings.poll_interval_absent()
                };
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(cadence) => {}
                }
            }

            debug!("Presence detector stopped");
        });

        (
            Self {
                shutdown_tx: Some(shutdown_tx),
                handle: Some(handle),
            },
            event_rx,
        )
    }

    /// Stop polling and wait for the task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for PresenceDetector {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    fn id(s: &str) -> CardId {
        CardId::parse(s).unwrap()
    }

    fn read(s: &str) -> Option<CardId> {
        Some(id(s))
    }

    #[test]
    fn single_arrival_per_card() {
        let mut state = DebounceState::new(3);
        assert_eq!(
            state.observe(read("ABCD")),
            Some(PresenceEvent::CardArrived(id("ABCD")))
        );
        // Same card again: no duplicate event
        assert_eq!(state.observe(read("ABCD")), None);
        assert_eq!(state.observe(read("ABCD")), None);
    }

    #[test]
    fn dropouts_below_threshold_are_absorbed() {
        let mut state = DebounceState::new(3);
        state.observe(read("ABCD"));

        assert_eq!(state.observe(None), None);
        assert_eq!(state.observe(None), None);
        // The card comes back before the third miss
        assert_eq!(state.observe(read("ABCD")), None);
        assert!(state.is_present());

        // The counter was reset by the successful read
        assert_eq!(state.observe(None), None);
        assert_eq!(state.observe(None), None);
        assert_eq!(state.observe(None), Some(PresenceEvent::CardDeparted));
    }

    #[test]
    fn departure_fires_exactly_once() {
        let mut state = DebounceState::new(3);
        state.observe(read("ABCD"));
        state.observe(None);
        state.observe(None);
        assert_eq!(state.observe(None), Some(PresenceEvent::CardDeparted));
        // Still empty: no further departures without a new arrival
        assert_eq!(state.observe(None), None);
        assert_eq!(state.observe(None), None);
        assert_eq!(state.observe(None), None);
    }

    #[test]
    fn card_swap_fires_arrival_without_departure() {
        let mut state = DebounceState::new(3);
        assert_eq!(
            state.observe(read("AAAA")),
            Some(PresenceEvent::CardArrived(id("AAAA")))
        );
        assert_eq!(
            state.observe(read("BBBB")),
            Some(PresenceEvent::CardArrived(id("BBBB")))
        );
        assert!(state.is_present());
    }

    #[test]
    fn empty_pad_never_departs() {
        let mut state = DebounceState::new(3);
        for _ in 0..10 {
            assert_eq!(state.observe(None), None);
        }
    }

    proptest! {
        /// Replay arbitrary read sequences and check the debounce contract:
        /// a departure happens iff a card was present and the last
        /// `threshold` reads were all empty, and never twice without an
        /// arrival in between.
        #[test]
        fn debounce_contract(
            reads in prop::collection::vec(
                prop_oneof![
                    Just(None),
                    Just(Some("AAAA")),
                    Just(Some("BBBB")),
                ],
                0..64,
            ),
            threshold in 1u32..5,
        ) {
            let mut state = DebounceState::new(threshold);
            let mut present = false;
            let mut consecutive_empty = 0u32;

            for raw in reads {
                let event = state.observe(raw.map(|s| id(s)));

                match raw {
                    Some(_) => consecutive_empty = 0,
                    None => consecutive_empty += 1,
                }

                match event {
                    Some(PresenceEvent::CardArrived(_)) => {
                        prop_assert!(raw.is_some());
                        present = true;
                    }
                    Some(PresenceEvent::CardDeparted) => {
                        prop_assert!(present, "departed without a card present");
                        prop_assert!(
                            consecutive_empty >= threshold,
                            "departed after only {} empty reads",
                            consecutive_empty
                        );
                        present = false;
                    }
                    None => {}
                }

                // The machine departs exactly when the threshold is crossed
                if present && consecutive_empty >= threshold {
                    prop_assert!(
                        matches!(event, Some(PresenceEvent::CardDeparted)),
                        "missed a departure at the threshold"
                    );
                }
            }
        }
    }

    /// Transport that replays a scripted list of poll results, then stays
    /// empty.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<Option<String>, String>>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<Option<String>, String>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
            })
        }
    }

    #[async_trait]
    impl SensorTransport for ScriptedTransport {
        async fn read_presence(&self, _timeout: Duration) -> Result<Option<String>> {
            match self.script.lock().pop_front() {
                Some(Ok(read)) => Ok(read),
                Some(Err(msg)) => Err(anyhow::anyhow!(msg)),
                None => Ok(None),
            }
        }
    }

    fn fast_settings() -> SensorConfig {
        SensorConfig {
            read_timeout_ms: 10,
            departure_threshold: 3,
            poll_interval_absent_ms: 1,
            poll_interval_present_ms: 1,
            error_backoff_ms: 1,
            ..SensorConfig::default()
        }
    }

    #[tokio::test]
    async fn detector_emits_arrival_then_debounced_departure() {
        let transport = ScriptedTransport::new(vec![
            Ok(Some("04a3b2c1".to_string())),
            Ok(Some("04a3b2c1".to_string())),
            Ok(None),
            Ok(None),
            Ok(None),
        ]);
        let (mut detector, mut events) = PresenceDetector::start(transport, fast_settings());

        assert_eq!(
            events.recv().await,
            Some(PresenceEvent::CardArrived(id("04A3B2C1")))
        );
        assert_eq!(events.recv().await, Some(PresenceEvent::CardDeparted));
        detector.stop().await;
    }

    #[tokio::test]
    async fn read_errors_count_toward_departure() {
        let transport = ScriptedTransport::new(vec![
            Ok(Some("ABCD".to_string())),
            Err("bus timeout".to_string()),
            Err("bus timeout".to_string()),
            Err("bus timeout".to_string()),
        ]);
        let (mut detector, mut events) = PresenceDetector::start(transport, fast_settings());

        assert_eq!(
            events.recv().await,
            Some(PresenceEvent::CardArrived(id("ABCD")))
        );
        assert_eq!(events.recv().await, Some(PresenceEvent::CardDeparted));
        detector.stop().await;
    }

    #[tokio::test]
    async fn stop_joins_promptly() {
        let transport = ScriptedTransport::new(vec![]);
        let (mut detector, _events) = PresenceDetector::start(transport, fast_settings());

        tokio::time::timeout(Duration::from_secs(1), detector.stop())
            .await
            .expect("detector did not stop within a poll interval");
    }
}
