//! Selection of the partition a message is published to.

use num_bigint::BigUint;
use rand::Rng;
use sha2::{Digest, Sha256};

/// Chooses a partition in `0..partition_count` for each message.
pub trait MessageRouter: Send + Sync {
    fn route(&mut self, key: &[u8]) -> usize;
}

/// Creates a router whenever the partition count of a topic changes.
pub trait MessageRouterFactory: Send + Sync + 'static {
    fn new_router(&self, partition_count: usize) -> Box<dyn MessageRouter>;
}

/// Cycles through the partitions, starting at a random one.
#[derive(Debug)]
pub struct RoundRobinRouter {
    partition_count: usize,
    next_partition: usize,
}

impl RoundRobinRouter {
    pub fn new(partition_count: usize) -> Self {
        let start = if partition_count > 0 {
            rand::thread_rng().gen_range(0..partition_count)
        } else {
            0
        };
        Self::with_start(partition_count, start)
    }

    pub fn with_start(partition_count: usize, start: usize) -> Self {
        Self {
            partition_count,
            next_partition: start,
        }
    }
}

impl MessageRouter for RoundRobinRouter {
    fn route(&mut self, _key: &[u8]) -> usize {
        if self.partition_count == 0 {
            return 0;
        }
        let partition = self.next_partition % self.partition_count;
        self.next_partition = (partition + 1) % self.partition_count;
        partition
    }
}

/// Maps ordering keys to partitions by the SHA-256 digest of the key,
/// read as a big-endian integer, modulo the partition count.
#[derive(Debug)]
pub struct HashingRouter {
    partition_count: usize,
}

impl HashingRouter {
    pub fn new(partition_count: usize) -> Self {
        Self { partition_count }
    }

    /// The partition of `key`, or `None` for an empty key which has no
    /// affinity to any partition.
    pub fn route_key(&self, key: &[u8]) -> Option<usize> {
        if key.is_empty() || self.partition_count == 0 {
            return None;
        }
        let digest = Sha256::digest(key);
        let partition = BigUint::from_bytes_be(&digest) % BigUint::from(self.partition_count);
        // zero has no digits
        Some(partition.to_u64_digits().first().copied().unwrap_or(0) as usize)
    }
}

/// Routes keyed messages by hash and keyless messages round-robin.
#[derive(Debug)]
pub struct DefaultRouter {
    hashing: HashingRouter,
    round_robin: RoundRobinRouter,
}

impl DefaultRouter {
    pub fn new(partition_count: usize) -> Self {
        Self {
            hashing: HashingRouter::new(partition_count),
            round_robin: RoundRobinRouter::new(partition_count),
        }
    }
}

impl MessageRouter for DefaultRouter {
    fn route(&mut self, key: &[u8]) -> usize {
        match self.hashing.route_key(key) {
            Some(partition) => partition,
            None => self.round_robin.route(key),
        }
    }
}

#[derive(Debug, Default)]
pub struct DefaultRouterFactory;

impl MessageRouterFactory for DefaultRouterFactory {
    fn new_router(&self, partition_count: usize) -> Box<dyn MessageRouter> {
        Box::new(DefaultRouter::new(partition_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin() {
        let mut router = RoundRobinRouter::with_start(3, 2);
        let routed = (0..5).map(|_| router.route(b"")).collect::<Vec<_>>();
        assert_eq!(routed, vec![2, 0, 1, 2, 0]);

        for _ in 0..20 {
            let mut router = RoundRobinRouter::new(4);
            let first = router.route(b"");
            assert!(first < 4);
            assert_eq!(router.route(b""), (first + 1) % 4);
        }
    }

    #[test]
    fn test_hashing_is_stable() {
        let router = HashingRouter::new(29);
        for key in [&b"a"[..], b"ordering-key", b"\x00\xff"] {
            let partition = router.route_key(key).unwrap();
            assert!(partition < 29);
            assert_eq!(router.route_key(key), Some(partition));
            assert_eq!(HashingRouter::new(29).route_key(key), Some(partition));
        }
        assert_eq!(router.route_key(b""), None);
    }

    #[test]
    fn test_hashing_matches_digest_modulo() {
        // a big-endian value mod 2 is the parity of its last byte
        let digest = Sha256::digest(b"k");
        let expected = (digest[31] % 2) as usize;
        assert_eq!(HashingRouter::new(2).route_key(b"k"), Some(expected));
        assert_eq!(HashingRouter::new(1).route_key(b"k"), Some(0));
    }

    #[test]
    fn test_default_router() {
        let mut router = DefaultRouter::new(8);
        let keyed = router.route(b"key");
        for _ in 0..10 {
            assert_eq!(router.route(b"key"), keyed);
        }
        let keyless = (0..8).map(|_| router.route(b"")).collect::<std::collections::HashSet<_>>();
        assert_eq!(keyless.len(), 8);
    }
}
