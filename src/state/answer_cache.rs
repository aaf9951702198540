//! Last reply sent to each client.
//!
//! The link is lossy, so clients retransmit a request until they get an
//! answer. A retransmission carries the same sequence number as the original
//! and must be answered with the exact same bytes, without running the
//! operation a second time.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::proto::frame::offset;
use crate::proto::{format_mac, MacAddr, MAX_FRAME_LEN};

/// Number of clients remembered at once.
pub const ANSWER_CACHE_SIZE: usize = 16;

#[derive(Debug, Clone)]
struct Answer {
    mac: MacAddr,
    frame: Vec<u8>,
    /// Generation of the last update; 0 means never used.
    generation: u64,
    updated: Option<DateTime<Utc>>,
}

impl Answer {
    fn empty() -> Self {
        Self {
            mac: [0; 6],
            frame: Vec::new(),
            generation: 0,
            updated: None,
        }
    }

    fn is_used(&self) -> bool {
        self.generation != 0
    }
}

pub struct AnswerCache {
    entries: Vec<Answer>,
    generation: u64,
}

impl Default for AnswerCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AnswerCache {
    pub fn new() -> Self {
        Self {
            entries: vec![Answer::empty(); ANSWER_CACHE_SIZE],
            generation: 0,
        }
    }

    /// The cached reply for `mac`, if it answers sequence number `seq`.
    pub fn replay(&self, mac: &MacAddr, seq: u8) -> Option<&[u8]> {
        let entry = self.lookup(mac)?;
        match entry.frame.get(offset::SEQUENCE) {
            Some(&cached) if cached == seq => Some(&entry.frame),
            _ => None,
        }
    }

    /// Remember `reply` as the latest answer sent to `mac`, taking over the
    /// least recently updated slot if `mac` has none yet.
    pub fn store(&mut self, mac: &MacAddr, reply: &[u8]) -> &[u8] {
        let idx = self.slot_for(mac);
        self.generation += 1;

        let entry = &mut self.entries[idx];
        if entry.is_used() && entry.mac != *mac {
            let since = entry
                .updated
                .map(|t| (Utc::now() - t).num_seconds())
                .unwrap_or_default();
            debug!("answer_cache_evict(mac={}, idle={}s)", format_mac(&entry.mac), since);
        }
        entry.mac = *mac;
        entry.frame.clear();
        entry.frame.extend_from_slice(&reply[..reply.len().min(MAX_FRAME_LEN)]);
        entry.generation = self.generation;
        entry.updated = Some(Utc::now());
        &entry.frame
    }

    /// Drop whatever was cached for `mac` so a later retransmission is
    /// processed afresh.
    pub fn forget(&mut self, mac: &MacAddr) {
        if let Some(idx) = self.position(mac) {
            self.entries[idx].frame.clear();
        }
    }

    /// Number of distinct clients currently remembered.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_used()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a request `seq` from `mac` is a retransmission already answered.
    pub fn contains_reply(&self, mac: &MacAddr, seq: u8) -> bool {
        self.replay(mac, seq).is_some()
    }

    pub fn contains(&self, mac: &MacAddr) -> bool {
        self.position(mac).is_some()
    }

    fn lookup(&self, mac: &MacAddr) -> Option<&Answer> {
        self.position(mac).map(|idx| &self.entries[idx])
    }

    fn position(&self, mac: &MacAddr) -> Option<usize> {
        self.entries.iter().position(|e| e.is_used() && e.mac == *mac)
    }

    fn slot_for(&self, mac: &MacAddr) -> usize {
        if let Some(idx) = self.position(mac) {
            return idx;
        }
        self.entries
            .iter()
            .enumerate()
            .min_by_key(|(_, e)| e.generation)
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }
}
