/// A fixed-length vector of single-bit flags.
///
/// This is a reimplementation instead of using a `Vec<bool>` because the latter
/// wastes 7 bits per flag, and instead of using the `bitvec` crate because we
/// don't need pretty much any of the features that it provides.
///
/// The length is set on construction and never changes. The number of set
/// flags is tracked on every write so that counting is O(1).
pub struct FlagVec {
    data: Vec<u64>,
    length: usize,
    ones: usize,
}

impl FlagVec {
    /// Creates a vector of `length` cleared flags.
    #[must_use]
    pub fn new(length: usize) -> Self {
        Self {
            data: vec![0; (length + 63) / 64],
            length,
            ones: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Returns the number of set flags.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.ones
    }

    /// Sets the flag at the given index to the given value, and returns the old
    /// value.
    ///
    /// ## Panics
    ///
    /// Panics if `index` is not less than the length of the vector.
    pub fn set(&mut self, index: usize, value: bool) -> bool {
        assert!(
            index < self.length,
            "flag index {index} out of bounds (length {})",
            self.length
        );

        let int_index = index / 64;
        let bit_index = index % 64;

        let old_value = self.data[int_index] & (1 << bit_index) != 0;

        self.data[int_index] =
            (self.data[int_index] & !(1 << bit_index)) | u64::from(value) << bit_index;

        match (old_value, value) {
            (false, true) => self.ones += 1,
            (true, false) => self.ones -= 1,
            _ => {}
        }

        old_value
    }

    /// Returns the value of the flag at the given index, or false if the index
    /// is out of bounds.
    #[must_use]
    pub fn get(&self, index: usize) -> bool {
        if index >= self.length {
            false
        } else {
            self.data[index / 64] & (1 << (index % 64)) != 0
        }
    }

    /// Returns the lowest index whose flag is cleared, if any.
    #[must_use]
    pub fn first_zero(&self) -> Option<usize> {
        for (int_index, word) in self.data.iter().enumerate() {
            if *word != u64::MAX {
                // Bits past `length` in the last word are always clear, so this
                // can land outside the vector when every real flag is set.
                let index = int_index * 64 + word.trailing_ones() as usize;
                return (index < self.length).then_some(index);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanity() {
        let mut vec = FlagVec::new(130);

        assert_eq!(vec.len(), 130);
        assert_eq!(vec.data.len(), 3);
        assert_eq!(vec.count_ones(), 0);
        assert!(!vec.get(0));
        assert!(!vec.get(1_000_000_000));

        assert!(!vec.set(0, true));
        assert!(vec.get(0));
        assert_eq!(vec.count_ones(), 1);

        assert!(!vec.set(129, true));
        assert!(vec.set(129, true));
        assert_eq!(vec.count_ones(), 2);

        assert!(vec.set(129, false));
        assert!(!vec.get(129));
        assert_eq!(vec.count_ones(), 1);
    }

    #[test]
    fn first_zero() {
        let mut vec = FlagVec::new(70);
        assert_eq!(vec.first_zero(), Some(0));

        for i in 0..65 {
            vec.set(i, true);
        }
        assert_eq!(vec.first_zero(), Some(65));

        vec.set(3, false);
        assert_eq!(vec.first_zero(), Some(3));

        for i in 0..70 {
            vec.set(i, true);
        }
        assert_eq!(vec.first_zero(), None);
        assert_eq!(vec.count_ones(), 70);
    }

    #[test]
    fn empty() {
        let vec = FlagVec::new(0);
        assert!(vec.is_empty());
        assert_eq!(vec.first_zero(), None);
    }

    #[test]
    #[should_panic]
    fn set_out_of_bounds() {
        let mut vec = FlagVec::new(4);
        vec.set(4, true);
    }
}
