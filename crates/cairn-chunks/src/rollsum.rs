//! Rolling window checksum (the rsync "rollsum")
//!
//! Two running sums over a fixed-size window. Sliding the window by one byte
//! costs O(1), and the value for a window never depends on what came before
//! it, so it can be recomputed from the block bytes alone. The block index
//! keeps the set of every value it has seen and consults it before paying for
//! an exact BLAKE3 lookup.

use std::collections::VecDeque;

const CHAR_OFFSET: u32 = 31;

/// Rolling checksum over the last `window` bytes pushed.
#[derive(Debug, Clone)]
pub struct RollingChecksum {
    window: usize,
    buf: VecDeque<u8>,
    s1: u32,
    s2: u32,
}

impl RollingChecksum {
    /// Create an empty rolling state. A zero window is treated as 1.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        RollingChecksum {
            window,
            buf: VecDeque::with_capacity(window),
            s1: 0,
            s2: 0,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// True once `window` bytes have been pushed.
    pub fn is_full(&self) -> bool {
        self.buf.len() == self.window
    }

    /// Push one byte, evicting the oldest one when the window is full.
    pub fn push(&mut self, byte: u8) {
        if self.buf.len() < self.window {
            self.roll_in(byte);
        } else if let Some(out) = self.buf.pop_front() {
            self.rotate(out, byte);
        }
        self.buf.push_back(byte);
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.push(b);
        }
    }

    /// Current checksum of the bytes in the window.
    pub fn value(&self) -> u64 {
        digest(self.s1, self.s2)
    }

    fn roll_in(&mut self, c: u8) {
        self.s1 = self.s1.wrapping_add(c as u32 + CHAR_OFFSET);
        self.s2 = self.s2.wrapping_add(self.s1);
    }

    fn rotate(&mut self, out: u8, c: u8) {
        let count = self.window as u32;
        self.s1 = self.s1.wrapping_add(c as u32).wrapping_sub(out as u32);
        self.s2 = self
            .s2
            .wrapping_add(self.s1)
            .wrapping_sub(count.wrapping_mul(out as u32 + CHAR_OFFSET));
    }
}

fn digest(s1: u32, s2: u32) -> u64 {
    ((s2 << 16) | (s1 & 0xffff)) as u64
}

/// Checksum of a complete window, computed from scratch.
pub fn rolling_checksum(window: &[u8]) -> u64 {
    let mut s1: u32 = 0;
    let mut s2: u32 = 0;
    for &c in window {
        s1 = s1.wrapping_add(c as u32 + CHAR_OFFSET);
        s2 = s2.wrapping_add(s1);
    }
    digest(s1, s2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn known_small_window() {
        // s1 = (1+31) + (2+31) + (3+31) = 99, s2 = 32 + 65 + 99 = 196
        assert_eq!(rolling_checksum(&[1, 2, 3]), (196u64 << 16) | 99);
    }

    #[test]
    fn fills_then_slides() {
        let mut rs = RollingChecksum::new(3);
        rs.push(1);
        rs.push(2);
        assert!(!rs.is_full());
        rs.push(3);
        assert!(rs.is_full());
        assert_eq!(rs.value(), rolling_checksum(&[1, 2, 3]));
        rs.push(4);
        assert_eq!(rs.value(), rolling_checksum(&[2, 3, 4]));
    }

    #[test]
    fn zero_window_behaves_as_one() {
        let mut rs = RollingChecksum::new(0);
        assert_eq!(rs.window(), 1);
        rs.extend(b"xyz");
        assert_eq!(rs.value(), rolling_checksum(b"z"));
    }

    #[test]
    fn equal_windows_equal_values() {
        let mut a = RollingChecksum::new(4);
        a.extend(b"prefix-aaaa");
        let mut b = RollingChecksum::new(4);
        b.extend(b"aaaa");
        assert_eq!(a.value(), b.value());
    }

    proptest! {
        /// Sliding must agree with a from-scratch computation at every step.
        #[test]
        fn rolling_matches_recompute(
            data in proptest::collection::vec(any::<u8>(), 1..=2048),
            window in 1usize..=64,
        ) {
            let mut rs = RollingChecksum::new(window);
            for (i, &b) in data.iter().enumerate() {
                rs.push(b);
                let start = (i + 1).saturating_sub(window);
                prop_assert_eq!(rs.value(), rolling_checksum(&data[start..=i]));
            }
        }
    }
}
