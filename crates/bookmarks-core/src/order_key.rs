//! Order Key Allocator.
//!
//! Produces lexicographically comparable strings over a base-62 alphabet
//! such that for any two keys `a < b`, `generate_key_between(a, b)` returns
//! a `c` with `a < c < b`. Stateless by design: a free function, not a
//! struct, since allocation only ever depends on its two arguments.

use crate::error::OrderKeyError;

const ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
const BASE: u32 = ALPHABET.len() as u32;

fn digit_value(c: u8) -> u32 {
    ALPHABET.iter().position(|&a| a == c).expect("key contains only alphabet characters") as u32
}

fn digit_char(v: u32) -> u8 {
    ALPHABET[v as usize]
}

const FIRST: u8 = ALPHABET[0];
const LAST: u8 = ALPHABET[(BASE - 1) as usize];
const MID: u32 = BASE / 2;

/// Generate a key strictly between `left` and `right`. Either bound may be
/// absent (insertion at the very start / very end of a sibling list).
///
/// # Errors
///
/// Returns [`OrderKeyError::InvalidOrder`] if `left >= right` when both are
/// present — the caller is expected to pass the moving node's neighbors in
/// order, so this is a caller bug, not a runtime condition.
pub fn generate_key_between(left: Option<&str>, right: Option<&str>) -> Result<String, OrderKeyError> {
    if let (Some(l), Some(r)) = (left, right) {
        if l >= r {
            return Err(OrderKeyError::InvalidOrder);
        }
    }

    match (left, right) {
        (None, None) => Ok(String::from_utf8(vec![digit_char(MID)]).unwrap()),
        (None, Some(r)) => Ok(key_before(r)),
        (Some(l), None) => Ok(key_after(l)),
        (Some(l), Some(r)) => Ok(key_between(l, r)),
    }
}

/// A key strictly less than `r`, as short as possible.
fn key_before(r: &str) -> String {
    let bytes = r.as_bytes();
    let mut out = Vec::new();
    for &b in bytes {
        let v = digit_value(b);
        if v > 0 {
            out.push(digit_char(v - 1));
            return bytes_to_string(out);
        }
        out.push(FIRST);
    }
    // r was all FIRST digits (e.g. "0" or "00"): append one more FIRST digit
    // below it by extending — "0" is already minimal, so go one level deeper.
    out.push(FIRST);
    bytes_to_string(out)
}

/// A key strictly greater than `l`, as short as possible.
fn key_after(l: &str) -> String {
    let bytes = l.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    for (i, &b) in bytes.iter().enumerate() {
        let v = digit_value(b);
        if v < BASE - 1 {
            out.push(digit_char(v + 1));
            out.extend_from_slice(&bytes[i + 1..].iter().map(|_| FIRST).collect::<Vec<_>>());
            return bytes_to_string(out);
        }
        out.push(LAST);
    }
    // l was all LAST digits: append a mid digit to go one level deeper.
    out.push(digit_char(MID));
    bytes_to_string(out)
}

/// A key strictly between `l` and `r`, given `l < r`.
fn key_between(l: &str, r: &str) -> String {
    let lb = l.as_bytes();
    let rb = r.as_bytes();
    let mut out = Vec::new();
    let max_len = lb.len().max(rb.len());

    for i in 0..max_len {
        let lv = lb.get(i).map(|&b| digit_value(b)).unwrap_or(0);
        let rv = rb.get(i).map(|&b| digit_value(b));

        match rv {
            None => {
                // r is shorter than this position: l still has trailing
                // digits that must be greater than "nothing", so step up.
                if lv < BASE - 1 {
                    out.push(digit_char(lv + 1));
                    return bytes_to_string(out);
                }
                out.push(digit_char(lv));
                continue;
            }
            Some(rv) => {
                if lv + 1 < rv {
                    let mid = lv + (rv - lv) / 2;
                    out.push(digit_char(mid));
                    return bytes_to_string(out);
                } else if lv + 1 == rv {
                    out.push(digit_char(lv));
                    // Need to go deeper: find a key after l's remaining suffix.
                    let suffix = if i + 1 < lb.len() {
                        key_after(std::str::from_utf8(&lb[i + 1..]).unwrap())
                    } else {
                        key_after("")
                    };
                    out.extend_from_slice(suffix.as_bytes());
                    return bytes_to_string(out);
                } else {
                    // lv == rv, digits match at this position, continue.
                    out.push(digit_char(lv));
                    continue;
                }
            }
        }
    }

    // l and r were identical up to max_len (shouldn't happen if l < r
    // strictly, but guard anyway by extending one more midpoint digit).
    out.push(digit_char(MID));
    bytes_to_string(out)
}

fn bytes_to_string(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes).expect("alphabet is ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn between_none_none_is_midpoint() {
        let k = generate_key_between(None, None).unwrap();
        assert_eq!(k, "V");
    }

    #[test]
    fn between_none_and_right() {
        let k = generate_key_between(None, Some("V")).unwrap();
        assert!(k.as_str() < "V");
    }

    #[test]
    fn between_left_and_none() {
        let k = generate_key_between(Some("V"), None).unwrap();
        assert!(k.as_str() > "V");
    }

    #[test]
    fn between_two_keys_with_room() {
        let k = generate_key_between(Some("A"), Some("C")).unwrap();
        assert!(k.as_str() > "A" && k.as_str() < "C");
    }

    #[test]
    fn between_adjacent_keys_grows_longer() {
        let k = generate_key_between(Some("A"), Some("B")).unwrap();
        assert!(k.as_str() > "A" && k.as_str() < "B");
        assert!(k.len() > 1);
    }

    #[test]
    fn repeated_midpoint_insertion_stays_ordered() {
        let mut keys = vec!["A".to_string(), "z".to_string()];
        for _ in 0..20 {
            let mid = generate_key_between(Some(&keys[0]), Some(&keys[1])).unwrap();
            assert!(mid.as_str() > keys[0].as_str());
            assert!(mid.as_str() < keys[1].as_str());
            keys[1] = mid;
        }
    }

    #[test]
    fn invalid_order_rejected() {
        assert_eq!(
            generate_key_between(Some("C"), Some("A")).unwrap_err(),
            OrderKeyError::InvalidOrder
        );
        assert_eq!(
            generate_key_between(Some("A"), Some("A")).unwrap_err(),
            OrderKeyError::InvalidOrder
        );
    }

    #[test]
    fn dense_sequential_inserts_between_same_pair_stay_ordered() {
        // Simulate always inserting at index 0 between a fixed left bound
        // and a shrinking right bound — a common adversarial pattern for
        // fractional indexing schemes.
        let left = "A".to_string();
        let mut right = "z".to_string();
        let mut history = vec![right.clone()];
        for _ in 0..50 {
            let k = generate_key_between(Some(&left), Some(&right)).unwrap();
            assert!(k.as_str() > left.as_str());
            assert!(k.as_str() < right.as_str());
            right = k.clone();
            history.push(k);
        }
        for w in history.windows(2) {
            assert!(w[1] <= w[0]);
        }
    }
}
