/// The id a freshly programmed bootloader answers with. Give such a board a
/// proper id before flashing it, or every fresh board on the bus takes the
/// same upload.
pub const UNASSIGNED_ID: u8 = 0;

/// Board ids seen on the bus, one bit per possible id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BoardSet {
    bits: [u32; 8],
}

impl BoardSet {
    pub const fn new() -> Self {
        Self { bits: [0; 8] }
    }

    /// Returns whether `id` was new.
    pub fn insert(&mut self, id: u8) -> bool {
        let (word, bit) = Self::slot(id);
        let fresh = self.bits[word] & bit == 0;
        self.bits[word] |= bit;
        fresh
    }

    pub fn contains(&self, id: u8) -> bool {
        let (word, bit) = Self::slot(id);
        self.bits[word] & bit != 0
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|w| *w == 0)
    }

    /// Ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..=u8::MAX).filter(move |id| self.contains(*id))
    }

    fn slot(id: u8) -> (usize, u32) {
        ((id / 32) as usize, 1 << (id % 32))
    }
}
