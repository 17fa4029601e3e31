//! Total order over a session timeline.
//!
//! Key, most significant first:
//! 1. timestamp ascending; a message with a timestamp sorts before one without,
//! 2. sequence ascending under the same presence rule,
//! 3. arrival index ascending.
//!
//! The arrival index makes the order total, so re-sorting the same input never moves rows.

use crate::domain::Message;
use std::cmp::Ordering;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct OrderKey {
    timestamp_absent: bool,
    timestamp_ms: i64,
    sequence_absent: bool,
    sequence: u64,
    arrival: u64,
}

impl OrderKey {
    pub fn of(message: &Message) -> Self {
        Self {
            timestamp_absent: message.timestamp_ms.is_none(),
            timestamp_ms: message.timestamp_ms.unwrap_or(0),
            sequence_absent: message.sequence.is_none(),
            sequence: message.sequence.unwrap_or(0),
            arrival: message.arrival,
        }
    }
}

pub fn compare_messages(a: &Message, b: &Message) -> Ordering {
    OrderKey::of(a).cmp(&OrderKey::of(b))
}

pub fn order_messages(mut messages: Vec<Message>) -> Vec<Message> {
    messages.sort_by_cached_key(OrderKey::of);
    messages
}

/// Position at which `message` keeps `sorted` ordered. Equal keys land after existing rows.
pub fn insertion_index(sorted: &[Message], message: &Message) -> usize {
    let key = OrderKey::of(message);
    match sorted.last() {
        None => return 0,
        Some(last) if OrderKey::of(last) <= key => return sorted.len(),
        Some(_) => {}
    }
    sorted.partition_point(|existing| OrderKey::of(existing) <= key)
}

pub fn is_ordered(messages: &[Message]) -> bool {
    messages
        .windows(2)
        .all(|pair| compare_messages(&pair[0], &pair[1]) != Ordering::Greater)
}
