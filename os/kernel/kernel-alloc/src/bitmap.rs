//! A bit array over caller-provided words.

use core::fmt;

/// `len` bits stored LSB-first in `u64` words.
pub struct Bitmap<'a> {
    words: &'a mut [u64],
    len: usize,
}

impl<'a> Bitmap<'a> {
    /// Number of words needed to hold `bits` bits.
    ///
    /// ```
    /// # use kernel_alloc::Bitmap;
    /// assert_eq!(Bitmap::words_for(0), 0);
    /// assert_eq!(Bitmap::words_for(64), 1);
    /// assert_eq!(Bitmap::words_for(65), 2);
    /// ```
    #[must_use]
    pub const fn words_for(bits: usize) -> usize {
        bits.div_ceil(64)
    }

    /// View `words` as a bitmap of `len` bits, all cleared.
    ///
    /// # Panics
    /// If `words` is too short for `len` bits.
    pub fn new(words: &'a mut [u64], len: usize) -> Self {
        assert!(
            words.len() >= Self::words_for(len),
            "{} words cannot hold {len} bits",
            words.len()
        );
        let mut bitmap = Self { words, len };
        bitmap.fill(false);
        bitmap
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// # Panics
    /// If `index` is out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.len, "bit {index} out of range ({})", self.len);
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// # Panics
    /// If `index` is out of range.
    pub fn set(&mut self, index: usize, value: bool) {
        assert!(index < self.len, "bit {index} out of range ({})", self.len);
        let mask = 1 << (index % 64);
        if value {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
    }

    /// Set every bit in `start..end`.
    pub fn set_range(&mut self, start: usize, end: usize, value: bool) {
        for index in start..end {
            self.set(index, value);
        }
    }

    /// Set every bit, leaving the unused tail of the last word clear.
    pub fn fill(&mut self, value: bool) {
        let used = Self::words_for(self.len);
        self.words[..used].fill(if value { u64::MAX } else { 0 });
        self.words[used..].fill(0);
        if value && self.len % 64 != 0 {
            self.words[used - 1] = (1 << (self.len % 64)) - 1;
        }
    }

    /// Number of set bits.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// The backing words.
    #[must_use]
    pub fn words(&self) -> &[u64] {
        self.words
    }
}

impl fmt::Debug for Bitmap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bitmap")
            .field("len", &self.len)
            .field("set", &self.count_ones())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut words = [u64::MAX; 2];
        let mut bitmap = Bitmap::new(&mut words, 100);
        assert_eq!(bitmap.count_ones(), 0);

        bitmap.set(0, true);
        bitmap.set(63, true);
        bitmap.set(64, true);
        bitmap.set(99, true);
        assert!(bitmap.get(63) && bitmap.get(64) && !bitmap.get(65));
        assert_eq!(bitmap.count_ones(), 4);

        bitmap.set(63, false);
        assert!(!bitmap.get(63));
        assert_eq!(bitmap.words(), &[1, 1 | (1 << 35)]);
    }

    #[test]
    fn fill_leaves_tail_clear() {
        let mut words = [0; 2];
        let mut bitmap = Bitmap::new(&mut words, 70);
        bitmap.fill(true);
        assert_eq!(bitmap.count_ones(), 70);
        assert_eq!(bitmap.words()[1], 0x3F);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn out_of_range_panics() {
        let mut words = [0; 1];
        let bitmap = Bitmap::new(&mut words, 10);
        let _ = bitmap.get(10);
    }
}
