#![forbid(unsafe_code)]

/// A fixed-length bit vector over `[0, len)`.
///
/// Bits are stored little-endian within each `u64` word:
/// - bit 0 is the LSB of word 0
/// - bit 63 is the MSB of word 0
///
/// Bits past `len` in the last word are always kept clear, so population counts and word scans
/// never need to mask them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
    len: usize,
    ones: usize,
}

fn word_count(bits: usize) -> usize {
    (bits + 63) / 64
}

fn tail_mask(bits: usize) -> Option<u64> {
    let rem = bits % 64;
    (rem != 0).then(|| (1u64 << rem) - 1)
}

impl BitSet {
    /// Create a bit set of `len` bits, all clear.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; word_count(len)],
            len,
            ones: 0,
        }
    }

    /// Create a bit set of `len` bits, all set.
    pub fn all(len: usize) -> Self {
        let mut words = vec![u64::MAX; word_count(len)];
        if let (Some(mask), Some(last)) = (tail_mask(len), words.last_mut()) {
            *last = mask;
        }
        Self {
            words,
            len,
            ones: len,
        }
    }

    pub fn from_indices(len: usize, indices: impl IntoIterator<Item = usize>) -> Self {
        let mut bits = Self::new(len);
        for idx in indices {
            bits.set(idx);
        }
        bits
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.len, "BitSet index {index} out of bounds ({})", self.len);
        (self.words[index / 64] >> (index % 64)) & 1 == 1
    }

    pub fn set(&mut self, index: usize) {
        assert!(index < self.len, "BitSet index {index} out of bounds ({})", self.len);
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        if *word & mask == 0 {
            *word |= mask;
            self.ones += 1;
        }
    }

    pub fn clear(&mut self, index: usize) {
        assert!(index < self.len, "BitSet index {index} out of bounds ({})", self.len);
        let mask = 1u64 << (index % 64);
        let word = &mut self.words[index / 64];
        if *word & mask != 0 {
            *word &= !mask;
            self.ones -= 1;
        }
    }

    /// Number of set bits.
    pub fn count(&self) -> usize {
        self.ones
    }

    pub fn all_set(&self) -> bool {
        self.ones == self.len
    }

    /// First set bit at or after `from`.
    pub fn next(&self, from: usize) -> Option<usize> {
        if from >= self.len {
            return None;
        }
        let mut word_idx = from / 64;
        let mut word = self.words[word_idx] & (u64::MAX << (from % 64));
        loop {
            if word != 0 {
                return Some(word_idx * 64 + word.trailing_zeros() as usize);
            }
            word_idx += 1;
            word = *self.words.get(word_idx)?;
        }
    }

    /// Index of the `k`-th (0-based) set bit.
    pub fn nth(&self, mut k: usize) -> Option<usize> {
        if k >= self.ones {
            return None;
        }
        for (word_idx, &word) in self.words.iter().enumerate() {
            let ones = word.count_ones() as usize;
            if k < ones {
                let mut w = word;
                for _ in 0..k {
                    w &= w - 1;
                }
                return Some(word_idx * 64 + w.trailing_zeros() as usize);
            }
            k -= ones;
        }
        None
    }

    /// Iterate set bits in ascending order.
    pub fn iter(&self) -> Ones<'_> {
        Ones {
            words: &self.words,
            word_idx: 0,
            word: self.words.first().copied().unwrap_or(0),
        }
    }

    /// Visit every set bit in ascending order.
    pub fn scan(&self, mut visit: impl FnMut(usize)) {
        for idx in self.iter() {
            visit(idx);
        }
    }

    pub fn not_inplace(&mut self) {
        for w in &mut self.words {
            *w = !*w;
        }
        if let (Some(mask), Some(last)) = (tail_mask(self.len), self.words.last_mut()) {
            *last &= mask;
        }
        self.ones = self.len - self.ones;
    }

    pub fn and_inplace(&mut self, other: &BitSet) {
        assert_eq!(self.len, other.len, "BitSet length mismatch");
        let mut ones = 0usize;
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w &= *o;
            ones += w.count_ones() as usize;
        }
        self.ones = ones;
    }

    pub fn or_inplace(&mut self, other: &BitSet) {
        assert_eq!(self.len, other.len, "BitSet length mismatch");
        let mut ones = 0usize;
        for (w, o) in self.words.iter_mut().zip(&other.words) {
            *w |= *o;
            ones += w.count_ones() as usize;
        }
        self.ones = ones;
    }

    pub fn as_words(&self) -> &[u64] {
        &self.words
    }
}

impl<'a> IntoIterator for &'a BitSet {
    type Item = usize;
    type IntoIter = Ones<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the set bits of a [`BitSet`], skipping empty words.
pub struct Ones<'a> {
    words: &'a [u64],
    word_idx: usize,
    word: u64,
}

impl Iterator for Ones<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        while self.word == 0 {
            self.word_idx += 1;
            self.word = *self.words.get(self.word_idx)?;
        }
        let bit = self.word.trailing_zeros() as usize;
        self.word &= self.word - 1;
        Some(self.word_idx * 64 + bit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_masks_trailing_bits() {
        let bits = BitSet::all(70);
        assert_eq!(bits.count(), 70);
        assert_eq!(bits.as_words()[1], (1u64 << 6) - 1);
        assert!(bits.all_set());
    }

    #[test]
    fn next_skips_empty_words() {
        let bits = BitSet::from_indices(300, [3, 130, 299]);
        assert_eq!(bits.next(0), Some(3));
        assert_eq!(bits.next(4), Some(130));
        assert_eq!(bits.next(131), Some(299));
        assert_eq!(bits.next(300), None);
    }

    #[test]
    fn nth_finds_kth_set_bit() {
        let bits = BitSet::from_indices(200, [1, 64, 65, 190]);
        assert_eq!(bits.nth(0), Some(1));
        assert_eq!(bits.nth(2), Some(65));
        assert_eq!(bits.nth(3), Some(190));
        assert_eq!(bits.nth(4), None);
    }

    #[test]
    fn not_keeps_length_and_count() {
        let mut bits = BitSet::from_indices(10, [0, 9]);
        bits.not_inplace();
        assert_eq!(bits.count(), 8);
        assert!(!bits.get(0));
        assert!(bits.get(5));
        assert_eq!(bits.iter().last(), Some(8));
    }

    #[test]
    fn and_or_recount() {
        let mut a = BitSet::from_indices(100, [1, 2, 3, 70]);
        let b = BitSet::from_indices(100, [2, 3, 4, 99]);
        let mut c = a.clone();
        a.and_inplace(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![2, 3]);
        c.or_inplace(&b);
        assert_eq!(c.count(), 6);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn get_out_of_range_panics() {
        BitSet::new(4).get(4);
    }
}
