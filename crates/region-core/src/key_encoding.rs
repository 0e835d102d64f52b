//! META row-key encoding
//!
//! META stores one row per region, keyed so that a plain bytewise sort puts
//! regions in (table, start key, epoch) order:
//!
//! - Region row: `{table}\0{escaped start key}\0\x01{epoch: u64 BE}`
//! - Forward search key: `{table}\0{escaped key}\0\x01{0xFF x 8}`
//! - Previous-region search key: `{table}\0{escaped key}\0\x01`
//! - Last-region search key: `{table}\x01`
//!
//! Start keys may contain arbitrary bytes, so `0x00` is escaped as `0x00 0xFF`
//! and the key ends with `0x00 0x01`. The escaped form sorts after the
//! terminator, which keeps the encoding order preserving and prefix free no
//! matter what epoch follows. Table names never contain `0x00` and are written
//! raw.

/// Separator bytes used by the encoding
pub mod separator {
    /// Terminates the table name and starts the start-key terminator
    pub const TERMINATOR: u8 = 0x00;
    /// Follows an escaped `0x00` inside a start key
    pub const ESCAPE: u8 = 0xFF;
    /// Second byte of the start-key terminator
    pub const KEY_END: u8 = 0x01;
    /// Sorts after every row of a table and before the next table
    pub const TABLE_END: u8 = 0x01;
}

/// Width of the big-endian epoch suffix
pub const EPOCH_LEN: usize = 8;

fn push_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        buf.push(b);
        if b == separator::TERMINATOR {
            buf.push(separator::ESCAPE);
        }
    }
    buf.push(separator::TERMINATOR);
    buf.push(separator::KEY_END);
}

fn prefix(table: &[u8], key: &[u8], extra: usize) -> Vec<u8> {
    let mut result = Vec::with_capacity(table.len() + key.len() + 3 + extra);
    result.extend_from_slice(table);
    result.push(separator::TERMINATOR);
    push_escaped(&mut result, key);
    result
}

/// Build the META row key of a region
pub fn region_row_key(table: &[u8], start_key: &[u8], epoch: u64) -> Vec<u8> {
    let mut result = prefix(table, start_key, EPOCH_LEN);
    result.extend_from_slice(&epoch.to_be_bytes());
    result
}

/// Build the key whose closest-row-before in META is the region covering `key`
///
/// Sorts after the row of every region of `table` starting at or before `key`,
/// whatever its epoch, and before every region starting after `key`.
pub fn region_search_key(table: &[u8], key: &[u8]) -> Vec<u8> {
    let mut result = prefix(table, key, EPOCH_LEN);
    result.extend_from_slice(&[0xFF; EPOCH_LEN]);
    result
}

/// Build the key whose closest-row-before in META is the region preceding `key`
///
/// Sorts after the row of every region starting strictly before `key` and
/// before the row of any region starting exactly at `key`. Used to walk a
/// table backwards one region at a time.
pub fn previous_region_search_key(table: &[u8], key: &[u8]) -> Vec<u8> {
    prefix(table, key, 0)
}

/// Build the key whose closest-row-before in META is the last region of `table`
pub fn last_region_search_key(table: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(table.len() + 1);
    result.extend_from_slice(table);
    result.push(separator::TABLE_END);
    result
}

/// Extract the table name from a META row key
pub fn table_of_row_key(row_key: &[u8]) -> Option<&[u8]> {
    let end = row_key
        .iter()
        .position(|&b| b == separator::TERMINATOR)?;
    Some(&row_key[..end])
}

/// Render a key for logs and error messages
pub fn pretty(bytes: &[u8]) -> String {
    bytes
        .iter()
        .flat_map(|&b| std::ascii::escape_default(b))
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_row_key_layout() {
        let key = region_row_key(b"table", b"k\0y", 7);
        let mut expected = b"table\0k\0\xFFy\0\x01".to_vec();
        expected.extend_from_slice(&7u64.to_be_bytes());
        assert_eq!(key, expected);
        assert_eq!(table_of_row_key(&key), Some(&b"table"[..]));
    }

    #[test]
    fn test_row_keys_sort_by_start_key_then_epoch() {
        let a = region_row_key(b"t", b"", 9);
        let b = region_row_key(b"t", b"a", 1);
        let c = region_row_key(b"t", b"a", 2);
        let d = region_row_key(b"t", b"a\0", 1);
        let e = region_row_key(b"t", b"b", 1);
        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
        assert!(d < e);
    }

    #[test]
    fn test_escaped_null_sorts_after_any_epoch() {
        let high_epoch = region_row_key(b"t", b"a", u64::MAX);
        let next = region_row_key(b"t", b"a\0", 0);
        assert!(high_epoch < next);
        assert!(region_search_key(b"t", b"a") < next);
    }

    #[test]
    fn test_search_keys_bracket_region_rows() {
        let row = region_row_key(b"t", b"key", 1234567890);
        // Forward search on the start key itself finds the region
        assert!(row <= region_search_key(b"t", b"key"));
        // Forward search on a larger key still finds it
        assert!(row <= region_search_key(b"t", b"kez"));
        // Previous-region search on the start key skips it
        assert!(row > previous_region_search_key(b"t", b"key"));
        // But not on any larger key
        assert!(row < previous_region_search_key(b"t", b"key\0"));
        assert!(row < last_region_search_key(b"t"));
    }

    #[test]
    fn test_last_region_search_key_stops_at_table_boundary() {
        let high = region_row_key(b"t", b"\xFF\xFF\xFF", u64::MAX);
        let other = region_row_key(b"t\x01", b"", 0);
        let longer = region_row_key(b"tt", b"", 0);
        let search = last_region_search_key(b"t");
        assert!(high < search);
        assert!(search < other);
        assert!(search < longer);
    }

    #[test]
    fn test_pretty() {
        assert_eq!(pretty(b"abc"), "abc");
        assert_eq!(pretty(b"a\0\xFF"), "a\\x00\\xff");
    }
}
