/// Converts a `u64` to an 8-byte array in big-endian byte order.
///
/// Big-endian keys keep sled's lexicographic order equal to numeric order,
/// so version records iterate by index.
///
/// # Examples
/// ```
/// use d_config::convert::safe_kv;
///
/// let bytes = safe_kv(0x1234_5678_9ABC_DEF0);
/// assert_eq!(bytes, [0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC, 0xDE, 0xF0]);
/// ```
pub const fn safe_kv(num: u64) -> [u8; 8] {
    num.to_be_bytes()
}
