//! Script number helpers
//!
//! Only what coinbase construction and the BIP34 height check need.

pub const OP_0: u8 = 0x00;
pub const OP_1NEGATE: u8 = 0x4f;
pub const OP_1: u8 = 0x51;
pub const OP_TRUE: u8 = OP_1;
pub const OP_RETURN: u8 = 0x6a;

/// Minimal little-endian script-number serialization
pub fn script_num_bytes(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut out = Vec::with_capacity(9);
    while magnitude > 0 {
        out.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }
    // The sign lives in the top bit of the last byte
    let last = out.len() - 1;
    if out[last] & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        out[last] |= 0x80;
    }
    out
}

/// Script fragment pushing `value` the way the reference's `CScript << n` does
///
/// Small integers use the dedicated opcodes; everything else is a direct push
/// of the minimal script number. This is the exact prefix BIP34 requires at
/// the start of a coinbase scriptSig.
pub fn push_int(value: i64) -> Vec<u8> {
    match value {
        0 => vec![OP_0],
        -1 => vec![OP_1NEGATE],
        1..=16 => vec![OP_1 + (value as u8) - 1],
        _ => {
            let data = script_num_bytes(value);
            let mut out = Vec::with_capacity(data.len() + 1);
            out.push(data.len() as u8);
            out.extend_from_slice(&data);
            out
        }
    }
}

/// Coinbase scriptSig prefix committing to `height` (BIP34)
pub fn coinbase_height_prefix(height: u64) -> Vec<u8> {
    push_int(height as i64)
}
