use crate::PlayerId;
use log::debug;
use std::collections::HashMap;

/// Result of the local player picking up a coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoldGain {
    pub count: u32,
    /// True only on the pickup that moved the count onto the threshold.
    pub reached_threshold: bool,
}

/// Gold counts of every player as seen by one peer.
///
/// Only the owner ever increments its own count; everybody else mirrors the
/// replicated value and never writes back.
#[derive(Debug, Clone)]
pub struct WalletBook {
    local: PlayerId,
    threshold: u32,
    counts: HashMap<PlayerId, u32>,
}

impl WalletBook {
    pub fn new(local: PlayerId, threshold: u32) -> Self {
        Self {
            local,
            threshold,
            counts: HashMap::new(),
        }
    }

    pub fn count(&self, player: PlayerId) -> u32 {
        self.counts.get(&player).copied().unwrap_or(0)
    }

    pub fn gain_local(&mut self) -> GoldGain {
        let count = self.counts.entry(self.local).or_insert(0);
        let previous = *count;
        *count += 1;
        GoldGain {
            count: *count,
            reached_threshold: previous < self.threshold && *count >= self.threshold,
        }
    }

    /// Mirrors another player's replicated count. Updates addressed to the
    /// local player are ignored since this peer is their only writer.
    pub fn apply_remote(&mut self, player: PlayerId, count: u32) -> bool {
        if player == self.local {
            debug!("Ignoring replicated gold count for local player {}", player);
            return false;
        }
        let entry = self.counts.entry(player).or_insert(0);
        if *entry == count {
            return false;
        }
        *entry = count;
        true
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn clear(&mut self) {
        self.counts.clear();
    }
}
