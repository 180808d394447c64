use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use taklink_cot::{CotMessage, FlowTag, SequenceCounter, global_sequence};

/// How often the background task looks at the seen-message registry.
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

/// Registry size above which a prune pass resets it.
pub const SEEN_LIMIT: usize = 1000;

/// What to do with a received multicast datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Deliver the message to the caller.
    Process,
    /// The message carries our own origin tag; drop it.
    SelfOrigin,
    /// A message with this origin and an equal or higher sequence was
    /// already delivered; drop it.
    AlreadySeen,
}

/// Anti-duplication and anti-loop bookkeeping for mesh multicast.
///
/// Outgoing CoT messages get a flow tag minted (or a hop appended when
/// forwarding someone else's message). Incoming messages are checked
/// against the tag: our own broadcasts and replays of already-seen
/// sequences are suppressed. Non-CoT payloads pass through untouched in
/// both directions.
pub struct FlowTagRelay {
    client_id: String,
    sequence: Arc<SequenceCounter>,
    /// Highest sequence delivered so far, per origin.
    seen: Mutex<HashMap<String, u64>>,
}

impl FlowTagRelay {
    pub fn new(client_id: impl Into<String>) -> FlowTagRelay {
        FlowTagRelay::with_sequence(client_id, global_sequence())
    }

    /// Build a relay drawing from an isolated counter. Tests use this to
    /// get deterministic sequence numbers.
    pub fn with_sequence(
        client_id: impl Into<String>,
        sequence: Arc<SequenceCounter>,
    ) -> FlowTagRelay {
        FlowTagRelay {
            client_id: client_id.into(),
            sequence,
            seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Tag an outgoing payload.
    ///
    /// Returns the enriched document, or `None` when the payload is not
    /// a CoT event and must be sent as-is.
    pub fn process_outgoing(&self, payload: &[u8]) -> Option<Vec<u8>> {
        let mut message = match CotMessage::parse(payload) {
            Ok(message) => message,
            Err(err) => {
                log::debug!("sending raw data without flow tag processing: {err}");
                return None;
            }
        };
        match message.flow_tag().map(|tag| tag.origin == self.client_id) {
            None => {
                log::debug!("adding flow tag to outgoing message");
                message.set_flow_tag(FlowTag::mint(&self.client_id, &self.sequence));
            }
            Some(false) => {
                log::debug!("recording hop on forwarded message");
                if let Some(tag) = message.flow_tag_mut() {
                    tag.add_hop(&self.client_id);
                }
            }
            // Re-sending our own message; leave the tag alone.
            Some(true) => {}
        }
        Some(message.serialize())
    }

    /// Decide whether a received payload should reach the caller.
    ///
    /// Untagged or non-CoT payloads are always processed.
    pub fn classify_incoming(&self, payload: &[u8]) -> Disposition {
        let message = match CotMessage::parse(payload) {
            Ok(message) => message,
            Err(_) => return Disposition::Process,
        };
        let Some(tag) = message.flow_tag() else {
            return Disposition::Process;
        };
        if tag.origin == self.client_id {
            return Disposition::SelfOrigin;
        }
        let mut seen = self.seen.lock().unwrap();
        if let Some(&highest) = seen.get(&tag.origin) {
            if highest >= tag.sequence {
                return Disposition::AlreadySeen;
            }
        }
        seen.insert(tag.origin.clone(), tag.sequence);
        Disposition::Process
    }

    /// One prune pass: reset the registry once it grows past
    /// [SEEN_LIMIT]. Suppression restarts from scratch afterwards,
    /// which trades a short window of possible re-delivery for bounded
    /// memory.
    pub fn prune(&self) {
        let mut seen = self.seen.lock().unwrap();
        if seen.len() > SEEN_LIMIT {
            log::debug!("pruning {} seen-message entries", seen.len());
            *seen = HashMap::new();
        }
    }

    #[cfg(test)]
    fn seen_len(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

/// Spawn the background pruning loop for a relay.
///
/// Runs [FlowTagRelay::prune] every [PRUNE_INTERVAL] until the returned
/// child token is cancelled. Cancelling the child does not cancel the
/// caller's token.
pub(crate) fn spawn_prune_task(
    relay: Arc<FlowTagRelay>,
    token: &CancellationToken,
) -> CancellationToken {
    let prune_token = token.child_token();
    tokio::spawn({
        let prune_token = prune_token.clone();
        async move {
            let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = prune_token.cancelled() => return,
                    _ = ticker.tick() => relay.prune(),
                }
            }
        }
    });
    prune_token
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay() -> FlowTagRelay {
        FlowTagRelay::with_sequence("test-client", Arc::new(SequenceCounter::new()))
    }

    fn tagged(origin: &str, sequence: u64) -> Vec<u8> {
        format!(
            "<event><detail><_flow-tags_ f=\"{origin}\" m=\"{sequence}\" t=\"1000\"/></detail></event>"
        )
        .into_bytes()
    }

    #[test]
    fn outgoing_untagged_message_gets_a_tag() {
        let relay = relay();
        let out = relay
            .process_outgoing(b"<event><detail/></event>")
            .expect("CoT payload");
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("_flow-tags_"));
        assert!(text.contains("f=\"test-client\""));
        assert!(text.contains("m=\"1\""));
    }

    #[test]
    fn outgoing_forwarded_message_gains_a_hop() {
        let relay = relay();
        let out = relay
            .process_outgoing(&tagged("third-client", 555))
            .expect("CoT payload");
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("f=\"third-client\""));
        assert!(text.contains("m=\"555\""));
        assert!(text.contains("test-client"));
    }

    #[test]
    fn outgoing_own_message_is_left_untouched() {
        let relay = relay();
        let payload = tagged("test-client", 123);
        let out = relay.process_outgoing(&payload).expect("CoT payload");
        assert_eq!(payload, out);
    }

    #[test]
    fn outgoing_non_xml_passes_through_raw() {
        let relay = relay();
        assert!(relay.process_outgoing(b"not xml at all").is_none());
    }

    #[test]
    fn incoming_untagged_message_is_processed() {
        let relay = relay();
        assert_eq!(
            Disposition::Process,
            relay.classify_incoming(b"<event><detail/></event>")
        );
    }

    #[test]
    fn incoming_own_message_is_suppressed() {
        let relay = relay();
        assert_eq!(
            Disposition::SelfOrigin,
            relay.classify_incoming(&tagged("test-client", 123))
        );
    }

    #[test]
    fn incoming_duplicate_is_suppressed_once_seen() {
        let relay = relay();
        let payload = tagged("other-client", 456);
        assert_eq!(Disposition::Process, relay.classify_incoming(&payload));
        assert_eq!(Disposition::AlreadySeen, relay.classify_incoming(&payload));
    }

    #[test]
    fn incoming_lower_sequence_is_suppressed() {
        let relay = relay();
        assert_eq!(
            Disposition::Process,
            relay.classify_incoming(&tagged("other-client", 456))
        );
        assert_eq!(
            Disposition::AlreadySeen,
            relay.classify_incoming(&tagged("other-client", 455))
        );
    }

    #[test]
    fn incoming_higher_sequence_is_processed() {
        let relay = relay();
        assert_eq!(
            Disposition::Process,
            relay.classify_incoming(&tagged("other-client", 456))
        );
        assert_eq!(
            Disposition::Process,
            relay.classify_incoming(&tagged("other-client", 789))
        );
    }

    #[test]
    fn origins_are_tracked_independently() {
        let relay = relay();
        assert_eq!(
            Disposition::Process,
            relay.classify_incoming(&tagged("alpha", 10))
        );
        assert_eq!(
            Disposition::Process,
            relay.classify_incoming(&tagged("beta", 5))
        );
        assert_eq!(
            Disposition::AlreadySeen,
            relay.classify_incoming(&tagged("alpha", 10))
        );
        assert_eq!(
            Disposition::Process,
            relay.classify_incoming(&tagged("beta", 6))
        );
    }

    #[test]
    fn incoming_non_xml_is_processed() {
        let relay = relay();
        assert_eq!(Disposition::Process, relay.classify_incoming(b"\x00\x01"));
    }

    #[test]
    fn prune_resets_only_past_the_limit() {
        let relay = relay();
        for i in 0..SEEN_LIMIT {
            relay.classify_incoming(&tagged(&format!("origin-{i}"), 1));
        }
        relay.prune();
        assert_eq!(SEEN_LIMIT, relay.seen_len());

        relay.classify_incoming(&tagged("one-more", 1));
        relay.prune();
        assert_eq!(0, relay.seen_len());

        // After a reset, previously seen sequences flow again.
        assert_eq!(
            Disposition::Process,
            relay.classify_incoming(&tagged("origin-0", 1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn prune_task_clears_registry_on_tick_and_stops_on_cancel() -> anyhow::Result<()> {
        let relay = Arc::new(relay());
        for i in 0..=SEEN_LIMIT {
            relay.classify_incoming(&tagged(&format!("origin-{i}"), 1));
        }
        assert!(relay.seen_len() > SEEN_LIMIT);

        let token = CancellationToken::new();
        let prune_token = spawn_prune_task(Arc::clone(&relay), &token);

        tokio::time::sleep(PRUNE_INTERVAL + Duration::from_secs(1)).await;
        assert_eq!(0, relay.seen_len());

        // After cancellation the registry grows unchecked.
        prune_token.cancel();
        for i in 0..=SEEN_LIMIT {
            relay.classify_incoming(&tagged(&format!("refill-{i}"), 1));
        }
        tokio::time::sleep(PRUNE_INTERVAL * 2).await;
        assert!(relay.seen_len() > SEEN_LIMIT);

        // The caller's token is unaffected.
        assert!(!token.is_cancelled());
        Ok(())
    }
}
