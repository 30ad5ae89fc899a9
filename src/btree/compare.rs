//! Three-way key comparators over raw field bytes

use std::cmp::Ordering;

use crate::record::ColumnType;

/// Orders two keys, looking at their first `len` bytes
pub trait KeyComparator {
    fn compare(&self, a: &[u8], b: &[u8], len: usize) -> Ordering;
}

impl<F> KeyComparator for F
where
    F: Fn(&[u8], &[u8], usize) -> Ordering,
{
    fn compare(&self, a: &[u8], b: &[u8], len: usize) -> Ordering {
        self(a, b, len)
    }
}

fn prefix(bytes: &[u8], len: usize) -> &[u8] {
    &bytes[..len.min(bytes.len())]
}

/// Lexicographic byte order
pub fn compare_bytes(a: &[u8], b: &[u8], len: usize) -> Ordering {
    prefix(a, len).cmp(prefix(b, len))
}

/// Little-endian signed integers (4 or 8 bytes)
pub fn compare_int(a: &[u8], b: &[u8], len: usize) -> Ordering {
    if len >= 8 {
        read_i64(a).cmp(&read_i64(b))
    } else {
        read_i32(a).cmp(&read_i32(b))
    }
}

/// Little-endian IEEE floats (4 or 8 bytes), total order
pub fn compare_float(a: &[u8], b: &[u8], len: usize) -> Ordering {
    if len >= 8 {
        f64::from_bits(read_i64(a) as u64).total_cmp(&f64::from_bits(read_i64(b) as u64))
    } else {
        f32::from_bits(read_i32(a) as u32).total_cmp(&f32::from_bits(read_i32(b) as u32))
    }
}

/// NUL-terminated strings
pub fn compare_str(a: &[u8], b: &[u8], len: usize) -> Ordering {
    let a = prefix(a, len);
    let b = prefix(b, len);
    let a = &a[..a.iter().position(|&c| c == 0).unwrap_or(a.len())];
    let b = &b[..b.iter().position(|&c| c == 0).unwrap_or(b.len())];
    a.cmp(b)
}

/// Comparator matching a column's encoding
pub fn comparator_for(column_type: ColumnType) -> fn(&[u8], &[u8], usize) -> Ordering {
    match column_type {
        ColumnType::Int => compare_int,
        ColumnType::Float => compare_float,
        ColumnType::Char(_) => compare_str,
    }
}

fn read_i32(bytes: &[u8]) -> i32 {
    let mut buf = [0u8; 4];
    let n = bytes.len().min(4);
    buf[..n].copy_from_slice(&bytes[..n]);
    i32::from_le_bytes(buf)
}

fn read_i64(bytes: &[u8]) -> i64 {
    let mut buf = [0u8; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    i64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_int_is_signed() {
        let a = (-5i32).to_le_bytes();
        let b = 3i32.to_le_bytes();
        assert_eq!(compare_int(&a, &b, 4), Ordering::Less);
        assert_eq!(compare_bytes(&a, &b, 4), Ordering::Greater);

        let a = (-5i64).to_le_bytes();
        let b = 3i64.to_le_bytes();
        assert_eq!(compare_int(&a, &b, 8), Ordering::Less);
    }

    #[test]
    fn test_compare_float() {
        let a = (-1.5f64).to_le_bytes();
        let b = 0.25f64.to_le_bytes();
        assert_eq!(compare_float(&a, &b, 8), Ordering::Less);
        assert_eq!(compare_float(&b, &b, 8), Ordering::Equal);
    }

    #[test]
    fn test_compare_str_stops_at_nul() {
        let mut a = [0u8; 10];
        a[..3].copy_from_slice(b"abc");
        assert_eq!(compare_str(&a, b"abc", 10), Ordering::Equal);
        assert_eq!(compare_str(&a, b"abd", 10), Ordering::Less);
        assert_eq!(compare_str(b"ab", &a, 10), Ordering::Less);
    }

    #[test]
    fn test_closure_comparator() {
        let reversed = |a: &[u8], b: &[u8], len: usize| compare_bytes(b, a, len);
        assert_eq!(reversed.compare(b"a", b"b", 1), Ordering::Greater);
        assert_eq!(
            comparator_for(ColumnType::Int).compare(&1i32.to_le_bytes(), &2i32.to_le_bytes(), 4),
            Ordering::Less
        );
    }
}
