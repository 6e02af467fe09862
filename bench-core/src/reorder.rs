//! One-packet reorder-and-swap transform.
//!
//! Each flow direction is a two-state machine: *empty* or *holding* exactly
//! one datagram. With reordering enabled, the first datagram of a pair is
//! held and re-emitted after the second one, producing one adjacent swap per
//! two datagrams. With reordering disabled, datagrams pass straight through
//! and any held datagram stays put until the next swap or a [`drain`].
//!
//! The buffer never holds more than one datagram per flow key.
//!
//! [`drain`]: ReorderBuffer::drain

use std::collections::HashMap;
use std::hash::Hash;

/// What to transmit after feeding one datagram to the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Datagram was stored; transmit nothing yet.
    Hold,
    /// Transmit this datagram now.
    Send(Vec<u8>),
    /// Transmit `current` first, then the previously held datagram.
    Swap {
        /// The datagram that just arrived.
        current: Vec<u8>,
        /// The datagram that was waiting in the buffer.
        held: Vec<u8>,
    },
}

impl Dispatch {
    /// Datagrams to transmit, in transmission order.
    pub fn into_datagrams(self) -> Vec<Vec<u8>> {
        match self {
            Dispatch::Hold => Vec::new(),
            Dispatch::Send(datagram) => vec![datagram],
            Dispatch::Swap { current, held } => vec![current, held],
        }
    }
}

/// Per-flow pending datagrams for one direction.
#[derive(Debug)]
pub struct ReorderBuffer<K> {
    pending: HashMap<K, Vec<u8>>,
}

impl<K> Default for ReorderBuffer<K> {
    fn default() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> ReorderBuffer<K> {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one datagram for `flow` through the transform.
    ///
    /// The datagram is copied when held, so the caller may reuse its
    /// receive buffer immediately.
    pub fn dispatch(&mut self, flow: K, datagram: &[u8], reordering: bool) -> Dispatch {
        if !reordering {
            return Dispatch::Send(datagram.to_vec());
        }

        match self.pending.remove(&flow) {
            Some(held) => Dispatch::Swap {
                current: datagram.to_vec(),
                held,
            },
            None => {
                self.pending.insert(flow, datagram.to_vec());
                Dispatch::Hold
            }
        }
    }

    /// Remove and return every pending datagram.
    pub fn drain(&mut self) -> Vec<(K, Vec<u8>)> {
        self.pending.drain().collect()
    }

    /// Whether `flow` currently holds a datagram.
    pub fn is_holding(&self, flow: &K) -> bool {
        self.pending.contains_key(flow)
    }

    /// Number of flows holding a datagram.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Check if no flow holds a datagram.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
