//! Time-ordered unique ids
//!
//! Layout (63 bits): milliseconds since [`EPOCH_MS`] in the top 41 bits,
//! then a 10-bit node id, then a 12-bit per-millisecond sequence. The node id
//! fills the generator's 5-bit machine and 5-bit node fields.

use crate::config::MAX_NODE_ID;
use crate::{Error, Result};
use snowflake::SnowflakeIdGenerator;
use std::sync::Mutex;
use std::time::{Duration, UNIX_EPOCH};

/// Custom epoch, 2010-11-04T01:42:54.657Z
pub const EPOCH_MS: i64 = 1_288_834_974_657;

const HALF_NODE_BITS: u16 = 5;

/// Generator for one node; distinct nodes never collide
pub struct Snowflake {
    node: u16,
    generator: Mutex<SnowflakeIdGenerator>,
}

impl Snowflake {
    pub fn new(node: u16) -> Result<Self> {
        if node > MAX_NODE_ID {
            return Err(Error::Config(format!(
                "Node id {} out of range 0..={}",
                node, MAX_NODE_ID
            )));
        }

        let machine = i32::from(node >> HALF_NODE_BITS);
        let low = i32::from(node & ((1 << HALF_NODE_BITS) - 1));
        let epoch = UNIX_EPOCH + Duration::from_millis(EPOCH_MS as u64);

        Ok(Self {
            node,
            generator: Mutex::new(SnowflakeIdGenerator::with_epoch(machine, low, epoch)),
        })
    }

    pub fn node(&self) -> u16 {
        self.node
    }

    /// Next id; strictly increasing per generator
    pub fn generate(&self) -> i64 {
        // The generator is never left half-written, so a poisoned lock is still usable
        let mut generator = self
            .generator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        generator.real_time_generate()
    }

    /// Next id in decimal form
    pub fn generate_string(&self) -> String {
        self.generate().to_string()
    }
}

impl std::fmt::Debug for Snowflake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snowflake").field("node", &self.node).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    const STEP_BITS: u32 = 12;
    const TIME_SHIFT: u32 = 2 * HALF_NODE_BITS as u32 + STEP_BITS;

    fn node_of(id: i64) -> u16 {
        ((id >> STEP_BITS) & i64::from(MAX_NODE_ID)) as u16
    }

    fn timestamp_of(id: i64) -> i64 {
        (id >> TIME_SHIFT) + EPOCH_MS
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    #[test]
    fn test_ids_increase_and_are_unique() {
        let generator = Snowflake::new(1).unwrap();

        let ids: Vec<i64> = (0..10_000).map(|_| generator.generate()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_id_fields() {
        for node in [0, 1, 31, 32, 513, MAX_NODE_ID] {
            let generator = Snowflake::new(node).unwrap();
            let before = now_ms();
            let id = generator.generate();
            let after = now_ms();

            assert!(id > 0);
            assert_eq!(node_of(id), node);
            assert!((before..=after).contains(&timestamp_of(id)));
        }
    }

    #[test]
    fn test_nodes_do_not_collide() {
        let a = Arc::new(Snowflake::new(1).unwrap());
        let b = Arc::new(Snowflake::new(2).unwrap());

        let handles: Vec<_> = [a, b]
            .into_iter()
            .map(|generator| {
                std::thread::spawn(move || (0..5_000).map(|_| generator.generate()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn test_rejects_wide_node() {
        assert!(Snowflake::new(1024).is_err());
        assert!(Snowflake::new(1023).is_ok());
    }

    #[test]
    fn test_generate_string_is_decimal() {
        let generator = Snowflake::new(7).unwrap();
        let id: i64 = generator.generate_string().parse().unwrap();
        assert_eq!(node_of(id), 7);
    }
}
