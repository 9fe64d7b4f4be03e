//! CRC-7 as used by the Jrk G2 serial protocol.
//! Table-driven: XOR each byte into the remainder, then substitute from the table.

/// Generator polynomial, bit-reversed for the LSB-first shift.
pub const CRC7_POLY: u8 = 0x91;

pub const CRC7_TABLE: [u8; 256] = build_table();

const fn build_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut b = 0;
    while b < 256 {
        let mut v = b as u8;
        let mut i = 0;
        while i < 8 {
            if v & 0x01 != 0 {
                v ^= CRC7_POLY;
            }
            v >>= 1;
            i += 1;
        }
        table[b] = v;
        b += 1;
    }
    table
}

/// Checksum byte appended to an outgoing command frame.
pub fn crc7(msg: &[u8]) -> u8 {
    msg.iter()
        .fold(0u8, |rem, &byte| CRC7_TABLE[(rem ^ byte) as usize])
}
