// src/wire.rs
//
// NASDAQ TotalView-ITCH 5.0 fixed message layouts and the single-message
// decoder. Layouts are #[repr(C)] zerocopy structs read straight off the
// packet bytes; all multi-byte integers are big-endian on the wire.
//
// Recognised types (enough to drive a full order-by-order book):
//  'S' system event, 'R' stock directory, 'A'/'F' add order, 'E'/'C'
//  executed, 'X' cancel (reduce shares), 'D' delete, 'U' replace.
// Unknown tags terminate the enclosing packet.

use crate::events::{Event, Side};
use crate::symtab::SymbolTable;
use zerocopy::byteorder::{BigEndian, U16, U32, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

type B16 = U16<BigEndian>;
type B32 = U32<BigEndian>;
type B64 = U64<BigEndian>;

#[repr(C)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct CommonHeader {
    pub message_type: u8,
    pub stock_locate: B16,
    pub tracking_number: B16,
}

#[repr(C)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct SystemEvent {
    pub message_type: u8,
    pub stock_locate: B16,
    pub tracking_number: B16,
    pub timestamp: [u8; 6],
    pub event_code: u8,
}

#[repr(C)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct StockDirectory {
    pub message_type: u8,
    pub stock_locate: B16,
    pub tracking_number: B16,
    pub timestamp: [u8; 6],
    pub stock: [u8; 8],
    pub market_category: u8,
    pub financial_status: u8,
    pub round_lot_size: B32,
    pub round_lots_only: u8,
    pub issue_classification: u8,
    pub issue_subtype: [u8; 2],
    pub authenticity: u8,
    pub short_sale_threshold: u8,
    pub ipo_flag: u8,
    pub luld_tier: u8,
    pub etp_flag: u8,
    pub etp_leverage: B32,
    pub inverse_indicator: u8,
}

#[repr(C)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct AddOrder {
    pub message_type: u8,
    pub stock_locate: B16,
    pub tracking_number: B16,
    pub timestamp: [u8; 6],
    pub order_ref: B64,
    pub side: u8, // b'B' or b'S'
    pub shares: B32,
    pub stock: [u8; 8],
    pub price: B32, // 1/10000 dollars
}

#[repr(C)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct AddOrderMpid {
    pub message_type: u8,
    pub stock_locate: B16,
    pub tracking_number: B16,
    pub timestamp: [u8; 6],
    pub order_ref: B64,
    pub side: u8,
    pub shares: B32,
    pub stock: [u8; 8],
    pub price: B32,
    pub attribution: [u8; 4],
}

#[repr(C)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct OrderExecuted {
    pub message_type: u8,
    pub stock_locate: B16,
    pub tracking_number: B16,
    pub timestamp: [u8; 6],
    pub order_ref: B64,
    pub executed_shares: B32,
    pub match_number: B64,
}

#[repr(C)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct OrderExecutedWithPrice {
    pub message_type: u8,
    pub stock_locate: B16,
    pub tracking_number: B16,
    pub timestamp: [u8; 6],
    pub order_ref: B64,
    pub executed_shares: B32,
    pub match_number: B64,
    pub printable: u8,
    pub execution_price: B32,
}

#[repr(C)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct OrderCancel {
    pub message_type: u8,
    pub stock_locate: B16,
    pub tracking_number: B16,
    pub timestamp: [u8; 6],
    pub order_ref: B64,
    pub canceled_shares: B32,
}

#[repr(C)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct OrderDelete {
    pub message_type: u8,
    pub stock_locate: B16,
    pub tracking_number: B16,
    pub timestamp: [u8; 6],
    pub order_ref: B64,
}

#[repr(C)]
#[derive(Clone, Copy, FromZeroes, FromBytes, AsBytes, Unaligned)]
pub struct OrderReplace {
    pub message_type: u8,
    pub stock_locate: B16,
    pub tracking_number: B16,
    pub timestamp: [u8; 6],
    pub original_order_ref: B64,
    pub new_order_ref: B64,
    pub shares: B32,
    pub price: B32,
}

pub const HEADER_SIZE: usize = std::mem::size_of::<CommonHeader>();

/// Fixed size of a message by type tag; 0 for unknown tags.
#[inline]
pub fn message_size(tag: u8) -> u32 {
    match tag {
        b'S' => std::mem::size_of::<SystemEvent>() as u32,
        b'R' => std::mem::size_of::<StockDirectory>() as u32,
        b'A' => std::mem::size_of::<AddOrder>() as u32,
        b'F' => std::mem::size_of::<AddOrderMpid>() as u32,
        b'E' => std::mem::size_of::<OrderExecuted>() as u32,
        b'C' => std::mem::size_of::<OrderExecutedWithPrice>() as u32,
        b'X' => std::mem::size_of::<OrderCancel>() as u32,
        b'D' => std::mem::size_of::<OrderDelete>() as u32,
        b'U' => std::mem::size_of::<OrderReplace>() as u32,
        _ => 0,
    }
}

/// Tracking number from the common header, widened to u64. 0 when the
/// message is too short to carry one.
#[inline]
pub fn tracking_number(msg: &[u8]) -> u64 {
    match CommonHeader::read_from_prefix(msg) {
        Some(hdr) => u64::from(hdr.tracking_number.get()),
        None => 0,
    }
}

pub struct DecodeResult {
    /// None for admin messages ('S', 'R') and unknown/truncated input.
    pub event: Option<Event>,
    /// Bytes consumed; 0 tells the caller to stop scanning this packet.
    pub message_size: u32,
}

#[inline]
fn side_from(b: u8) -> Side {
    if b == b'B' {
        Side::Bid
    } else {
        Side::Ask
    }
}

/// Decode a single message from the front of `buf`. Allocation-free; the
/// only side effect is interning symbols from directory and add messages.
pub fn decode_one(buf: &[u8], symtab: &mut SymbolTable) -> DecodeResult {
    let mut out = DecodeResult { event: None, message_size: 0 };
    if buf.len() < HEADER_SIZE {
        return out;
    }
    let tag = buf[0];
    let msize = message_size(tag);
    if msize == 0 || msize as usize > buf.len() {
        return out;
    }
    out.message_size = msize;

    // Length was validated against the tag size above, so the prefix reads
    // below cannot fail.
    match tag {
        b'A' => {
            let msg = AddOrder::read_from_prefix(buf).unwrap();
            let sym = symtab.get_or_intern(&msg.stock);
            out.event = Some(Event::Add {
                order_id: msg.order_ref.get(),
                side: side_from(msg.side),
                qty: msg.shares.get(),
                px: msg.price.get(),
                sym,
            });
        }
        b'F' => {
            let msg = AddOrderMpid::read_from_prefix(buf).unwrap();
            let sym = symtab.get_or_intern(&msg.stock);
            out.event = Some(Event::Add {
                order_id: msg.order_ref.get(),
                side: side_from(msg.side),
                qty: msg.shares.get(),
                px: msg.price.get(),
                sym,
            });
        }
        b'E' => {
            let msg = OrderExecuted::read_from_prefix(buf).unwrap();
            out.event = Some(Event::Execute {
                order_id: msg.order_ref.get(),
                exec_qty: msg.executed_shares.get(),
            });
        }
        b'C' => {
            let msg = OrderExecutedWithPrice::read_from_prefix(buf).unwrap();
            out.event = Some(Event::Execute {
                order_id: msg.order_ref.get(),
                exec_qty: msg.executed_shares.get(),
            });
        }
        b'X' => {
            let msg = OrderCancel::read_from_prefix(buf).unwrap();
            out.event = Some(Event::Cancel {
                order_id: msg.order_ref.get(),
                qty: msg.canceled_shares.get(),
            });
        }
        b'D' => {
            let msg = OrderDelete::read_from_prefix(buf).unwrap();
            out.event = Some(Event::Delete { order_id: msg.order_ref.get() });
        }
        b'U' => {
            // Replace carries no symbol; sym 0 means "same as the original".
            let msg = OrderReplace::read_from_prefix(buf).unwrap();
            out.event = Some(Event::Replace {
                old_id: msg.original_order_ref.get(),
                new_id: msg.new_order_ref.get(),
                qty: msg.shares.get(),
                px: msg.price.get(),
                sym: 0,
            });
        }
        b'R' => {
            // Directory messages produce no book event but seed the table.
            let msg = StockDirectory::read_from_prefix(buf).unwrap();
            let _ = symtab.get_or_intern(&msg.stock);
        }
        _ => {
            // 'S' and anything else size-known: consume, no event.
        }
    }
    out
}

// ----------------------------- encoders ---------------------------------
//
// Used by the replay tool and by the round-trip tests. Timestamps are left
// zeroed; the decoder ignores them.

pub fn pad_symbol(name: &str) -> [u8; 8] {
    let mut s = [b' '; 8];
    let b = name.as_bytes();
    let n = b.len().min(8);
    s[..n].copy_from_slice(&b[..n]);
    s
}

pub fn encode_add(tracking: u16, order_id: u64, side: Side, qty: u32, stock: [u8; 8], px: u32) -> AddOrder {
    AddOrder {
        message_type: b'A',
        stock_locate: B16::new(0),
        tracking_number: B16::new(tracking),
        timestamp: [0; 6],
        order_ref: B64::new(order_id),
        side: if side == Side::Bid { b'B' } else { b'S' },
        shares: B32::new(qty),
        stock,
        price: B32::new(px),
    }
}

pub fn encode_execute(tracking: u16, order_id: u64, qty: u32) -> OrderExecuted {
    OrderExecuted {
        message_type: b'E',
        stock_locate: B16::new(0),
        tracking_number: B16::new(tracking),
        timestamp: [0; 6],
        order_ref: B64::new(order_id),
        executed_shares: B32::new(qty),
        match_number: B64::new(0),
    }
}

pub fn encode_cancel(tracking: u16, order_id: u64, qty: u32) -> OrderCancel {
    OrderCancel {
        message_type: b'X',
        stock_locate: B16::new(0),
        tracking_number: B16::new(tracking),
        timestamp: [0; 6],
        order_ref: B64::new(order_id),
        canceled_shares: B32::new(qty),
    }
}

pub fn encode_delete(tracking: u16, order_id: u64) -> OrderDelete {
    OrderDelete {
        message_type: b'D',
        stock_locate: B16::new(0),
        tracking_number: B16::new(tracking),
        timestamp: [0; 6],
        order_ref: B64::new(order_id),
    }
}

pub fn encode_replace(tracking: u16, old_id: u64, new_id: u64, qty: u32, px: u32) -> OrderReplace {
    OrderReplace {
        message_type: b'U',
        stock_locate: B16::new(0),
        tracking_number: B16::new(tracking),
        timestamp: [0; 6],
        original_order_ref: B64::new(old_id),
        new_order_ref: B64::new(new_id),
        shares: B32::new(qty),
        price: B32::new(px),
    }
}

pub fn encode_directory(tracking: u16, stock: [u8; 8], lot: u32) -> StockDirectory {
    let mut msg = StockDirectory::new_zeroed();
    msg.message_type = b'R';
    msg.tracking_number = B16::new(tracking);
    msg.stock = stock;
    msg.round_lot_size = B32::new(lot);
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symtab::SymbolTable;

    #[test]
    fn sizes_match_itch_layouts() {
        assert_eq!(message_size(b'S'), 12);
        assert_eq!(message_size(b'R'), 39);
        assert_eq!(message_size(b'A'), 36);
        assert_eq!(message_size(b'F'), 40);
        assert_eq!(message_size(b'E'), 31);
        assert_eq!(message_size(b'C'), 36);
        assert_eq!(message_size(b'X'), 23);
        assert_eq!(message_size(b'D'), 19);
        assert_eq!(message_size(b'U'), 35);
        assert_eq!(message_size(b'?'), 0);
    }

    #[test]
    fn add_round_trips() {
        let mut tab = SymbolTable::new();
        let wire = encode_add(7, 42, Side::Bid, 100, pad_symbol("AAPL"), 49_900);
        let res = decode_one(wire.as_bytes(), &mut tab);
        assert_eq!(res.message_size, 36);
        match res.event {
            Some(Event::Add { order_id, side, qty, px, sym }) => {
                assert_eq!(order_id, 42);
                assert_eq!(side, Side::Bid);
                assert_eq!(qty, 100);
                assert_eq!(px, 49_900);
                assert_eq!(tab.view(sym), b"AAPL");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(tracking_number(wire.as_bytes()), 7);
    }

    #[test]
    fn execute_cancel_delete_replace_round_trip() {
        let mut tab = SymbolTable::new();

        let e = encode_execute(1, 5, 30);
        assert_eq!(
            decode_one(e.as_bytes(), &mut tab).event,
            Some(Event::Execute { order_id: 5, exec_qty: 30 })
        );

        let x = encode_cancel(2, 5, 10);
        assert_eq!(
            decode_one(x.as_bytes(), &mut tab).event,
            Some(Event::Cancel { order_id: 5, qty: 10 })
        );

        let d = encode_delete(3, 5);
        assert_eq!(decode_one(d.as_bytes(), &mut tab).event, Some(Event::Delete { order_id: 5 }));

        let u = encode_replace(4, 5, 6, 80, 50_100);
        assert_eq!(
            decode_one(u.as_bytes(), &mut tab).event,
            Some(Event::Replace { old_id: 5, new_id: 6, qty: 80, px: 50_100, sym: 0 })
        );
    }

    #[test]
    fn truncated_and_unknown_stop_the_packet() {
        let mut tab = SymbolTable::new();
        let wire = encode_add(1, 1, Side::Ask, 10, pad_symbol("MSFT"), 51_000);
        // Truncated: type says 36 bytes but only 20 available.
        let res = decode_one(&wire.as_bytes()[..20], &mut tab);
        assert_eq!(res.message_size, 0);
        assert!(res.event.is_none());
        // Unknown tag.
        let res = decode_one(b"Zxxxxxxxxxx", &mut tab);
        assert_eq!(res.message_size, 0);
        // Shorter than the common header.
        let res = decode_one(b"A", &mut tab);
        assert_eq!(res.message_size, 0);
    }

    #[test]
    fn directory_interns_symbol_without_event() {
        let mut tab = SymbolTable::new();
        let r = encode_directory(1, pad_symbol("TSLA"), 100);
        let res = decode_one(r.as_bytes(), &mut tab);
        assert_eq!(res.message_size, 39);
        assert!(res.event.is_none());
        assert_ne!(tab.lookup(&pad_symbol("TSLA")), 0);
    }
}
