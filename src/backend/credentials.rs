//! Backend credential pool.
//!
//! The pool round-robins across credential slots and marks a slot as
//! cooling down when the backend reports a quota or auth failure on it.
//! Rotation decisions are serialized behind one lock; the calls made with a
//! leased credential are not.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::warn;

use crate::error::BackendError;

/// Default cooldown applied to a slot after a quota/auth failure.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

/// One credential and its cooldown state.
#[derive(Debug, Clone)]
struct CredentialSlot {
    key: String,
    cooldown_until: Option<Instant>,
}

impl CredentialSlot {
    fn usable(&self, now: Instant) -> bool {
        match self.cooldown_until {
            Some(until) => now >= until,
            None => true,
        }
    }
}

/// A credential handed out for one backend call.
#[derive(Debug, Clone)]
pub struct LeasedCredential {
    /// Index of the slot the key came from.
    pub slot_id: usize,
    /// The credential itself.
    pub key: String,
}

#[derive(Debug)]
struct PoolState {
    slots: Vec<CredentialSlot>,
    cursor: usize,
}

/// Round-robin pool of backend credentials.
#[derive(Debug)]
pub struct CredentialPool {
    state: Mutex<PoolState>,
    cooldown: Duration,
}

impl CredentialPool {
    /// Build a pool from raw keys. Pools with fewer than two keys still work
    /// but cannot rotate past a quota failure.
    pub fn new(keys: Vec<String>) -> Self {
        Self::with_cooldown(keys, DEFAULT_COOLDOWN)
    }

    pub fn with_cooldown(keys: Vec<String>, cooldown: Duration) -> Self {
        if keys.len() < 2 {
            warn!(
                slots = keys.len(),
                "credential pool has fewer than two slots; rotation will be a no-op"
            );
        }
        let slots = keys
            .into_iter()
            .map(|key| CredentialSlot {
                key,
                cooldown_until: None,
            })
            .collect();
        Self {
            state: Mutex::new(PoolState { slots, cursor: 0 }),
            cooldown,
        }
    }

    /// Number of slots in the pool.
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().slots.is_empty()
    }

    /// Lease the next usable credential, advancing the round-robin cursor.
    ///
    /// Fails with [`BackendError::NoCredential`] when the pool is empty or
    /// every slot is cooling down.
    pub fn lease(&self) -> Result<LeasedCredential, BackendError> {
        let now = Instant::now();
        let mut state = self.state.lock();
        let slot_count = state.slots.len();
        if slot_count == 0 {
            return Err(BackendError::NoCredential);
        }

        for offset in 0..slot_count {
            let idx = (state.cursor + offset) % slot_count;
            if state.slots[idx].usable(now) {
                state.cursor = (idx + 1) % slot_count;
                return Ok(LeasedCredential {
                    slot_id: idx,
                    key: state.slots[idx].key.clone(),
                });
            }
        }
        Err(BackendError::NoCredential)
    }

    /// Mark a slot as cooling down after a quota/auth failure on it.
    pub fn mark_cooldown(&self, slot_id: usize) {
        let mut state = self.state.lock();
        if let Some(slot) = state.slots.get_mut(slot_id) {
            slot.cooldown_until = Some(Instant::now() + self.cooldown);
        }
    }

    /// Number of slots currently usable.
    pub fn usable_slots(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .slots
            .iter()
            .filter(|s| s.usable(now))
            .count()
    }
}
