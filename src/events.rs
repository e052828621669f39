// src/events.rs
//
// Shared value types for the decode/apply path. Everything here is Copy and
// allocation-free; packet payload ownership lives in pool::Pkt.

use serde::{Deserialize, Serialize};

/// Dense symbol id assigned by the symbol table. 0 is reserved ("none" for
/// lookups, "all symbols" in subscriptions, "unchanged" in Replace events).
pub type SymbolId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

impl Side {
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

/// Decoded order-book-affecting ITCH event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Add {
        order_id: u64,
        side: Side,
        qty: u32,
        px: u32,
        sym: SymbolId,
    },
    Execute {
        order_id: u64,
        exec_qty: u32,
    },
    Cancel {
        order_id: u64,
        qty: u32,
    },
    Delete {
        order_id: u64,
    },
    /// `sym == 0` means "symbol unchanged"; the apply layer resolves it from
    /// the original order id.
    Replace {
        old_id: u64,
        new_id: u64,
        qty: u32,
        px: u32,
        sym: SymbolId,
    },
}

/// Inline copy of a single ITCH message, sized for the largest layout we
/// recognise. Used by the arbiter's gap buffer so out-of-order messages
/// never touch the heap.
#[derive(Debug, Clone, Copy)]
pub struct SmallMsg {
    pub len: u32,
    pub bytes: [u8; 64],
}

impl SmallMsg {
    #[inline]
    pub fn copy_from(data: &[u8]) -> Self {
        let mut m = SmallMsg { len: 0, bytes: [0u8; 64] };
        let n = data.len().min(m.bytes.len());
        m.bytes[..n].copy_from_slice(&data[..n]);
        m.len = n as u32;
        m
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl Default for SmallMsg {
    fn default() -> Self {
        SmallMsg { len: 0, bytes: [0u8; 64] }
    }
}
