//! Rotating concurrency shard slot
//!
//! Ordered queues deliver one group to one consumer at a time. If every message
//! carried the same group key, all duplication would be serialized. The Router
//! stamps each invocation's output with `vault<slot>` and advances the slot once
//! per invocation, spreading traffic across up to `width` groups.
//!
//! The slot is owned by whoever owns the Router; there is no process-wide state.
//! It is a distribution aid only: two Router instances may well pick the same slot.

use rand::Rng;
use std::sync::atomic::{AtomicU32, Ordering};

/// Prefix of every ordering-group key
pub const GROUP_KEY_PREFIX: &str = "vault";

#[derive(Debug)]
pub struct ShardSlot {
    slot: AtomicU32,
    width: u32,
}

impl ShardSlot {
    /// Start at a uniformly random slot so concurrently started instances do not
    /// all begin on group 0
    pub fn random(width: u32) -> Self {
        let width = width.max(1);
        let initial = rand::rng().random_range(0..width);
        Self::starting_at(initial, width)
    }

    pub fn starting_at(initial: u32, width: u32) -> Self {
        let width = width.max(1);
        Self {
            slot: AtomicU32::new(initial % width),
            width,
        }
    }

    pub fn current(&self) -> u32 {
        self.slot.load(Ordering::SeqCst)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn group_key(&self) -> String {
        format!("{}{}", GROUP_KEY_PREFIX, self.current())
    }

    /// Move to the next slot, wrapping at `width`; returns the new slot
    pub fn advance(&self) -> u32 {
        let width = self.width;
        let previous = self
            .slot
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |slot| {
                Some((slot + 1) % width)
            })
            .unwrap_or_else(|slot| slot);
        (previous + 1) % width
    }
}
