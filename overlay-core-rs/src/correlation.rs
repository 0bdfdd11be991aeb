//! Request/answer correlation
//!
//! A node records one entry per request it is waiting on, keyed by the
//! request's originator and RequestId. Locally originated requests hold the
//! caller's completion channel; forwarded requests remember the neighbour
//! that handed the request over, so the answer can retrace the path, and
//! carry a deadline after which the node's sweep drops them.
//!
//! Removing an entry is the only way to deliver an answer, which makes
//! delivery at-most-once. Answered keys are kept in a bounded LRU so that
//! retries of an already answered request are recognised.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::envelope::{OverlayMessage, Request, RequestId};
use crate::path::NodeId;

/// Correlation key: the originator of a request and its id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub originator: NodeId,
    pub request_id: RequestId,
}

impl CorrelationKey {
    pub fn new(originator: impl Into<NodeId>, request_id: RequestId) -> Self {
        Self {
            originator: originator.into(),
            request_id,
        }
    }

    /// Key of an inbound request; `None` if it carries no path
    pub fn for_request(request: &Request) -> Option<Self> {
        request
            .source()
            .map(|source| Self::new(source, request.request_id.clone()))
    }

    /// Key an answer is matched against: answers are addressed to the originator
    pub fn for_answer(message: &OverlayMessage) -> Self {
        let originator = message
            .destination()
            .addressee()
            .cloned()
            .unwrap_or_else(NodeId::csms);
        Self::new(originator, message.request_id().clone())
    }
}

impl std::fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.originator, self.request_id)
    }
}

/// What a node is waiting for
#[derive(Debug)]
pub enum Pending {
    /// Originated here; the caller awaits the answer
    Local {
        caller: oneshot::Sender<OverlayMessage>,
        generation: u64,
    },
    /// Forwarded; the answer goes back to `origin` unless it expires first
    Forwarded {
        origin: NodeId,
        generation: u64,
        expires_at: Instant,
    },
}

impl Pending {
    /// Registration number, unique within one table
    pub fn generation(&self) -> u64 {
        match self {
            Pending::Local { generation, .. } | Pending::Forwarded { generation, .. } => *generation,
        }
    }
}

struct Inner {
    pending: HashMap<CorrelationKey, Pending>,
    answered: LruCache<CorrelationKey, ()>,
    next_generation: u64,
}

impl Inner {
    /// Pending here or answered recently
    fn is_known(&self, key: &CorrelationKey) -> bool {
        self.pending.contains_key(key) || self.answered.contains(key)
    }

    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

/// Pending requests of one node
pub struct CorrelationTable {
    inner: Mutex<Inner>,
}

impl CorrelationTable {
    pub fn new(dedup_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(dedup_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                pending: HashMap::new(),
                answered: LruCache::new(capacity),
                next_generation: 0,
            }),
        }
    }

    /// Register a locally originated request.
    ///
    /// Returns the entry's generation and the channel the answer arrives
    /// on, or `None` when the key is already pending or was recently
    /// answered.
    pub fn register_local(&self, key: CorrelationKey) -> Option<(u64, oneshot::Receiver<OverlayMessage>)> {
        let mut inner = self.inner.lock();
        if inner.is_known(&key) {
            return None;
        }
        let generation = inner.next_generation();
        let (caller, rx) = oneshot::channel();
        inner.pending.insert(key, Pending::Local { caller, generation });
        Some((generation, rx))
    }

    /// Register a forwarded request that lives for `lifetime`.
    ///
    /// Returns the entry's generation, or `None` when the key is already
    /// pending or was recently answered.
    pub fn register_forwarded(&self, key: CorrelationKey, origin: NodeId, lifetime: Duration) -> Option<u64> {
        let mut inner = self.inner.lock();
        if inner.is_known(&key) {
            return None;
        }
        let generation = inner.next_generation();
        inner.pending.insert(
            key,
            Pending::Forwarded {
                origin,
                generation,
                expires_at: Instant::now() + lifetime,
            },
        );
        Some(generation)
    }

    /// Mark a request as answered locally.
    ///
    /// Returns `false` for a retry of a request already seen here.
    pub fn claim_local_answer(&self, key: &CorrelationKey) -> bool {
        let mut inner = self.inner.lock();
        if inner.is_known(key) {
            return false;
        }
        inner.answered.put(key.clone(), ());
        true
    }

    /// Take the entry an answer belongs to, remembering the key as answered
    pub fn complete(&self, key: &CorrelationKey) -> Option<Pending> {
        let mut inner = self.inner.lock();
        let pending = inner.pending.remove(key)?;
        inner.answered.put(key.clone(), ());
        Some(pending)
    }

    /// Drop an entry without an answer (send failure, local timeout).
    ///
    /// Only the registration numbered `generation` is removed.
    pub fn cancel(&self, key: &CorrelationKey, generation: u64) -> Option<Pending> {
        let mut inner = self.inner.lock();
        if inner.pending.get(key)?.generation() != generation {
            return None;
        }
        inner.pending.remove(key)
    }

    /// Remove forwarded entries whose lifetime ended at or before `now`.
    ///
    /// Returns each expired key with the neighbour it came from.
    pub fn expire_due(&self, now: Instant) -> Vec<(CorrelationKey, NodeId)> {
        let mut inner = self.inner.lock();
        let due: Vec<CorrelationKey> = inner
            .pending
            .iter()
            .filter(|(_, pending)| matches!(pending, Pending::Forwarded { expires_at, .. } if *expires_at <= now))
            .map(|(key, _)| key.clone())
            .collect();

        due.into_iter()
            .filter_map(|key| match inner.pending.remove(&key) {
                Some(Pending::Forwarded { origin, .. }) => Some((key, origin)),
                _ => None,
            })
            .collect()
    }

    pub fn is_pending(&self, key: &CorrelationKey) -> bool {
        self.inner.lock().pending.contains_key(key)
    }

    pub fn was_answered(&self, key: &CorrelationKey) -> bool {
        self.inner.lock().answered.contains(key)
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CorrelationTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CorrelationTable")
            .field("pending", &inner.pending.len())
            .field("answered", &inner.answered.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Action, Payload, Response};
    use crate::path::NetworkPath;
    use crate::routing::Destination;

    const LIFETIME: Duration = Duration::from_secs(60);

    fn key(originator: &str, id: &str) -> CorrelationKey {
        CorrelationKey::new(originator, RequestId::from(id))
    }

    #[test]
    fn test_forwarded_entry_completes_once() {
        let table = CorrelationTable::new(8);
        let generation = table.register_forwarded(key("cs1", "r1"), "lc".into(), LIFETIME);
        assert!(generation.is_some());
        assert!(table.is_pending(&key("cs1", "r1")));

        match table.complete(&key("cs1", "r1")) {
            Some(Pending::Forwarded { origin, .. }) => assert_eq!(origin, NodeId::from("lc")),
            other => panic!("unexpected entry: {:?}", other),
        }
        assert!(table.complete(&key("cs1", "r1")).is_none());
        assert!(!table.is_pending(&key("cs1", "r1")));
        assert!(table.was_answered(&key("cs1", "r1")));
    }

    #[test]
    fn test_same_id_from_different_originators() {
        let table = CorrelationTable::new(8);
        assert!(table.register_forwarded(key("cs1", "r1"), "lc".into(), LIFETIME).is_some());
        assert!(table.register_forwarded(key("cs2", "r1"), "lc".into(), LIFETIME).is_some());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_duplicates_rejected() {
        let table = CorrelationTable::new(8);
        assert!(table.register_forwarded(key("cs1", "r1"), "lc".into(), LIFETIME).is_some());
        assert!(table.register_forwarded(key("cs1", "r1"), "lc".into(), LIFETIME).is_none());

        table.complete(&key("cs1", "r1"));
        assert!(table.register_forwarded(key("cs1", "r1"), "lc".into(), LIFETIME).is_none());

        assert!(table.claim_local_answer(&key("cs1", "r2")));
        assert!(!table.claim_local_answer(&key("cs1", "r2")));
    }

    #[test]
    fn test_local_key_in_use_is_refused() {
        let table = CorrelationTable::new(8);
        let (generation, _rx) = table.register_local(key("cs1", "r1")).unwrap();
        assert!(table.register_local(key("cs1", "r1")).is_none());

        // The refused registration left the first one untouched
        match table.complete(&key("cs1", "r1")) {
            Some(Pending::Local { generation: g, .. }) => assert_eq!(g, generation),
            other => panic!("unexpected entry: {:?}", other),
        }
        assert!(table.register_local(key("cs1", "r1")).is_none());
    }

    #[test]
    fn test_cancel_only_removes_own_registration() {
        let table = CorrelationTable::new(8);
        let (first, _rx) = table.register_local(key("cs1", "r1")).unwrap();
        assert!(table.cancel(&key("cs1", "r1"), first + 1).is_none());
        assert!(table.is_pending(&key("cs1", "r1")));

        assert!(table.cancel(&key("cs1", "r1"), first).is_some());
        assert!(table.is_empty());
        assert!(!table.was_answered(&key("cs1", "r1")));
    }

    #[test]
    fn test_answered_set_is_bounded() {
        let table = CorrelationTable::new(2);
        for id in ["a", "b", "c"] {
            assert!(table.claim_local_answer(&key("cs1", id)));
        }
        assert!(!table.was_answered(&key("cs1", "a")));
        assert!(table.was_answered(&key("cs1", "c")));
    }

    #[test]
    fn test_expire_due_takes_only_overdue_forwards() {
        let table = CorrelationTable::new(8);
        table.register_forwarded(key("cs1", "short"), "lc".into(), Duration::from_millis(50));
        table.register_forwarded(key("cs1", "long"), "lc".into(), Duration::from_secs(5));
        let _local = table.register_local(key("gw", "mine")).unwrap();

        let registered = Instant::now();
        assert!(table.expire_due(registered).is_empty());

        let expired = table.expire_due(registered + Duration::from_millis(60));
        assert_eq!(expired, vec![(key("cs1", "short"), NodeId::from("lc"))]);
        assert_eq!(table.len(), 2);
        assert!(!table.was_answered(&key("cs1", "short")));
    }

    #[tokio::test]
    async fn test_local_completion() {
        let table = CorrelationTable::new(8);
        let (_, rx) = table.register_local(key("cs1", "r1")).unwrap();

        let mut request = Request::new(Action::Heartbeat, Payload::empty(), Destination::Csms);
        request.request_id = RequestId::from("r1");
        request.network_path = NetworkPath::from(["cs1"]);
        assert_eq!(CorrelationKey::for_request(&request), Some(key("cs1", "r1")));

        let answer = OverlayMessage::Response(Response::for_request(&request, Payload::empty()));
        assert_eq!(CorrelationKey::for_answer(&answer), key("cs1", "r1"));

        match table.complete(&CorrelationKey::for_answer(&answer)) {
            Some(Pending::Local { caller, .. }) => caller.send(answer.clone()).unwrap(),
            other => panic!("unexpected entry: {:?}", other),
        }
        assert_eq!(rx.await.unwrap(), answer);
    }
}
