use crate::error::{Result, TrackError};

const WORD_BITS: u32 = 64;

/// Watched segments of one timeline, one bit per segment.
///
/// The length is fixed at creation (the timeline's segment count); bits are
/// only ever set, never cleared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceSet {
    segment_count: u32,
    words: Vec<u64>,
}

impl PresenceSet {
    pub fn with_len(segment_count: u32) -> Self {
        let words = segment_count.div_ceil(WORD_BITS) as usize;
        Self {
            segment_count,
            words: vec![0; words],
        }
    }

    pub fn segment_count(&self) -> u32 {
        self.segment_count
    }

    pub fn watched_count(&self) -> u32 {
        self.words.iter().map(|word| word.count_ones()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn contains(&self, index: u32) -> bool {
        if index >= self.segment_count {
            return false;
        }
        let (word, bit) = Self::locate(index);
        self.words[word] & (1 << bit) != 0
    }

    /// Marks `index` watched. Returns whether the bit was newly set.
    pub fn insert(&mut self, index: u32) -> Result<bool> {
        if index >= self.segment_count {
            return Err(TrackError::invalid(format!(
                "segment {index} is outside [0, {})",
                self.segment_count
            )));
        }
        let (word, bit) = Self::locate(index);
        let mask = 1u64 << bit;
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        Ok(fresh)
    }

    pub fn max(&self) -> Option<u32> {
        self.words
            .iter()
            .enumerate()
            .rev()
            .find(|(_, word)| **word != 0)
            .map(|(idx, word)| idx as u32 * WORD_BITS + (WORD_BITS - 1 - word.leading_zeros()))
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.segment_count).filter(move |index| self.contains(*index))
    }

    /// One `0|1` entry per segment, in timeline order.
    pub fn to_bits(&self) -> Vec<u8> {
        (0..self.segment_count)
            .map(|index| u8::from(self.contains(index)))
            .collect()
    }

    /// Packed form for storage: bit `i % 8` of byte `i / 8` is segment `i`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let byte_len = self.segment_count.div_ceil(8) as usize;
        let mut bytes = Vec::with_capacity(byte_len);
        for word in &self.words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes.truncate(byte_len);
        bytes
    }

    pub fn from_bytes(segment_count: u32, bytes: &[u8]) -> Result<Self> {
        let expected = segment_count.div_ceil(8) as usize;
        if bytes.len() != expected {
            return Err(TrackError::invalid(format!(
                "presence bitmap has {} bytes, expected {expected} for {segment_count} segments",
                bytes.len()
            )));
        }

        let mut set = Self::with_len(segment_count);
        for (chunk_idx, chunk) in bytes.chunks(8).enumerate() {
            let mut raw = [0u8; 8];
            raw[..chunk.len()].copy_from_slice(chunk);
            set.words[chunk_idx] = u64::from_le_bytes(raw);
        }

        let tail = segment_count % WORD_BITS;
        if tail != 0 {
            if let Some(last) = set.words.last() {
                if last >> tail != 0 {
                    return Err(TrackError::invalid(
                        "presence bitmap marks segments beyond the timeline".to_string(),
                    ));
                }
            }
        }

        Ok(set)
    }

    fn locate(index: u32) -> (usize, u32) {
        ((index / WORD_BITS) as usize, index % WORD_BITS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut set = PresenceSet::with_len(12);
        assert!(set.insert(3).unwrap());
        assert!(!set.insert(3).unwrap());
        assert_eq!(set.watched_count(), 1);
    }

    #[test]
    fn test_insert_rejects_out_of_range() {
        let mut set = PresenceSet::with_len(12);
        assert!(set.insert(12).is_err());
        assert!(set.insert(9999).is_err());
        assert!(set.is_empty());
        assert!(!set.contains(9999));
    }

    #[test]
    fn test_max_tracks_highest_index() {
        let mut set = PresenceSet::with_len(200);
        assert_eq!(set.max(), None);
        set.insert(10).unwrap();
        set.insert(2).unwrap();
        assert_eq!(set.max(), Some(10));
        set.insert(130).unwrap();
        assert_eq!(set.max(), Some(130));
        set.insert(64).unwrap();
        assert_eq!(set.max(), Some(130));
    }

    #[test]
    fn test_to_bits_has_one_entry_per_segment() {
        let mut set = PresenceSet::with_len(5);
        set.insert(0).unwrap();
        set.insert(3).unwrap();
        assert_eq!(set.to_bits(), vec![1, 0, 0, 1, 0]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 3]);
    }

    #[test]
    fn test_packed_bytes_restore_the_same_set() {
        let mut set = PresenceSet::with_len(70);
        for index in [0, 7, 8, 63, 64, 69] {
            set.insert(index).unwrap();
        }
        let bytes = set.to_bytes();
        assert_eq!(bytes.len(), 9);
        assert_eq!(bytes[0], 0b1000_0001);

        let restored = PresenceSet::from_bytes(70, &bytes).unwrap();
        assert_eq!(restored, set);
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length_and_stray_bits() {
        assert!(PresenceSet::from_bytes(12, &[0]).is_err());
        // 12 segments -> bits 12..16 of the second byte must be clear
        assert!(PresenceSet::from_bytes(12, &[0, 0b0001_0000]).is_err());
        assert!(PresenceSet::from_bytes(12, &[0xff, 0b0000_1111]).is_ok());
    }
}
