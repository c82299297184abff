/// Random loss applied to outgoing datagrams.
#[derive(Debug, Clone, Default)]
pub struct PacketLossSimulation {
    pub enabled: bool,
    /// 0 to 100.
    pub loss_percent: f32,
}

impl PacketLossSimulation {
    pub fn new(loss_percent: f32) -> Self {
        Self {
            enabled: true,
            loss_percent,
        }
    }

    pub fn should_drop(&self) -> bool {
        if !self.enabled || self.loss_percent <= 0.0 {
            return false;
        }
        rand_percent() * 100.0 < self.loss_percent
    }
}

/// Uniform value in `[0, 1]`.
pub fn rand_percent() -> f32 {
    rand_u64() as f32 / u64::MAX as f32
}

pub fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hash, Hasher};
    use std::time::Instant;

    let mut hasher = RandomState::new().build_hasher();
    Instant::now().hash(&mut hasher);
    hasher.finish()
}

/// Message-level counters kept by the dispatch layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetStats {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub unreliable_messages_sent: u64,
    pub unreliable_messages_received: u64,
}

/// Packet-level counters kept by the datagram driver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub packets_sent: u64,
    pub packets_resent: u64,
    pub packets_received: u64,
    pub received_duplicate_count: u64,
    pub short_packet_count: u64,
    pub dropped_datagrams: u64,
}

impl TransportStats {
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("packetsSent                = {}", self.packets_sent),
            format!("packetsReSent              = {}", self.packets_resent),
            format!("packetsReceived            = {}", self.packets_received),
            format!("receivedDuplicateCount     = {}", self.received_duplicate_count),
            format!("shortPacketCount           = {}", self.short_packet_count),
            format!("droppedDatagrams           = {}", self.dropped_datagrams),
        ]
    }
}

impl NetStats {
    pub fn lines(&self) -> Vec<String> {
        vec![
            format!("unreliable messages sent   = {}", self.unreliable_messages_sent),
            format!("unreliable messages recv   = {}", self.unreliable_messages_received),
            format!("reliable messages sent     = {}", self.messages_sent),
            format!("reliable messages received = {}", self.messages_received),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_simulation_never_drops() {
        let sim = PacketLossSimulation::default();
        assert!((0..100).all(|_| !sim.should_drop()));
    }

    #[test]
    fn test_full_loss_always_drops() {
        let sim = PacketLossSimulation::new(100.0);
        assert!((0..100).all(|_| sim.should_drop()));
    }

    #[test]
    fn test_rand_percent_in_range() {
        for _ in 0..100 {
            let p = rand_percent();
            assert!((0.0..=1.0).contains(&p));
        }
    }
}
