use lazy_static::lazy_static;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Per-message relay metadata carried in the `_flow-tags_` element.
///
/// A tag is minted once, by the client that first injects the message
/// into the mesh. Every client that forwards (rather than originates)
/// the message appends its own identifier to `hops` and leaves the rest
/// of the tag untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowTag {
    /// Identifier of the client that injected the message.
    pub origin: String,
    /// Message sequence number, strictly increasing per process.
    pub sequence: u64,
    /// Creation time, milliseconds since the UNIX epoch.
    pub timestamp_ms: i64,
    /// Identifiers of clients that forwarded the message, in order.
    pub hops: Vec<String>,
    /// Schema version attribute, carried verbatim when present.
    pub version: Option<String>,
}

impl FlowTag {
    /// Mint a fresh tag for an outgoing message.
    pub fn mint(origin: impl Into<String>, counter: &SequenceCounter) -> FlowTag {
        FlowTag {
            origin: origin.into(),
            sequence: counter.next(),
            timestamp_ms: now_millis(),
            hops: Vec::new(),
            version: None,
        }
    }

    /// Record that `client_id` forwarded this message.
    pub fn add_hop(&mut self, client_id: impl Into<String>) {
        self.hops.push(client_id.into());
    }
}

/// Monotonically increasing message sequence counter.
///
/// All flow-tag producers in a process must draw from the same counter
/// so that sequence numbers stay strictly increasing per origin; use
/// [global_sequence] unless a test needs an isolated counter.
#[derive(Debug)]
pub struct SequenceCounter(AtomicU64);

impl SequenceCounter {
    pub const fn new() -> SequenceCounter {
        SequenceCounter(AtomicU64::new(0))
    }

    /// Next sequence number, starting at 1. Never resets.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    static ref GLOBAL_SEQUENCE: Arc<SequenceCounter> = Arc::new(SequenceCounter::new());
}

/// The process-wide sequence counter shared by all flow-tag producers.
pub fn global_sequence() -> Arc<SequenceCounter> {
    Arc::clone(&GLOBAL_SEQUENCE)
}

/// Current time in integer milliseconds since the UNIX epoch.
pub fn now_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(_) => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_starts_at_one_and_increases() {
        let counter = SequenceCounter::new();
        assert_eq!(1, counter.next());
        assert_eq!(2, counter.next());
        assert_eq!(3, counter.next());
    }

    #[test]
    fn sequence_is_strictly_increasing_across_threads() {
        let counter = Arc::new(SequenceCounter::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            handles.push(std::thread::spawn(move || {
                (0..100).map(|_| counter.next()).collect::<Vec<_>>()
            }));
        }
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(800, all.len());
        assert_eq!(800, *all.last().unwrap());
    }

    #[test]
    fn minted_tag_has_origin_and_empty_hops() {
        let counter = SequenceCounter::new();
        let tag = FlowTag::mint("client-1", &counter);
        assert_eq!("client-1", tag.origin);
        assert_eq!(1, tag.sequence);
        assert!(tag.hops.is_empty());
        assert!(tag.version.is_none());
        assert!(tag.timestamp_ms > 0);
    }

    #[test]
    fn add_hop_appends_in_order() {
        let counter = SequenceCounter::new();
        let mut tag = FlowTag::mint("client-1", &counter);
        tag.add_hop("relay-a");
        tag.add_hop("relay-b");
        assert_eq!(vec!["relay-a".to_string(), "relay-b".to_string()], tag.hops);
    }
}
