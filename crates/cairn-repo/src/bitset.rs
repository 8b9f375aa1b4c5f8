use cairn_core::{CairnError, CairnResult};

/// Growable set of small non-negative row ids, one bit per id.
///
/// Serialized as little-endian `u64` words with trailing zero words trimmed,
/// so equal sets always produce equal bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet(Vec<u64>);

impl RowSet {
    pub fn new() -> Self {
        RowSet(Vec::new())
    }

    pub fn insert(&mut self, id: u64) {
        let (word, bit) = split(id);
        if self.0.len() <= word {
            self.0.resize(word + 1, 0);
        }
        self.0[word] |= 1 << bit;
    }

    pub fn remove(&mut self, id: u64) {
        let (word, bit) = split(id);
        if let Some(w) = self.0.get_mut(word) {
            *w &= !(1 << bit);
        }
    }

    pub fn contains(&self, id: u64) -> bool {
        let (word, bit) = split(id);
        self.0.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    pub fn len(&self) -> usize {
        self.0.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|w| *w == 0)
    }

    /// Ids in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.0.iter().enumerate().flat_map(|(i, &word)| {
            (0..64u64)
                .filter(move |bit| word & (1 << bit) != 0)
                .map(move |bit| i as u64 * 64 + bit)
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let used = self.0.iter().rposition(|w| *w != 0).map_or(0, |i| i + 1);
        self.0[..used].iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    pub fn from_bytes(bytes: &[u8]) -> CairnResult<Self> {
        if bytes.len() % 8 != 0 {
            return Err(CairnError::soft(format!(
                "row set of {} bytes is not a whole number of words",
                bytes.len()
            )));
        }
        let words = bytes
            .chunks_exact(8)
            .map(|c| {
                let mut word = [0u8; 8];
                word.copy_from_slice(c);
                u64::from_le_bytes(word)
            })
            .collect();
        Ok(RowSet(words))
    }
}

impl FromIterator<u64> for RowSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut set = RowSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

fn split(id: u64) -> (usize, u64) {
    ((id / 64) as usize, id % 64)
}
