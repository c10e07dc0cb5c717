use crate::error::LandError;

/// Issues the land-wide sequence numbers shared by actions, client events,
/// lifecycle events and emitted server events.
///
/// Owned by exactly one land; there is no process-wide counter.
#[derive(Debug, Default)]
pub struct SequenceAllocator {
    next: u64,
}

impl SequenceAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    pub fn starting_at(first: u64) -> Self {
        Self { next: first }
    }

    /// Returns the next sequence number. Fails once the counter is
    /// exhausted instead of wrapping.
    pub fn next(&mut self) -> Result<u64, LandError> {
        let sequence = self.next;
        self.next = sequence
            .checked_add(1)
            .ok_or(LandError::SequenceOverflow)?;
        Ok(sequence)
    }

    /// The value the next call to [`next`](Self::next) would return
    pub fn peek(&self) -> u64 {
        self.next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strictly_increasing() {
        let mut allocator = SequenceAllocator::new();
        let issued: Vec<u64> = (0..5).map(|_| allocator.next().unwrap()).collect();
        assert_eq!(issued, vec![0, 1, 2, 3, 4]);
        assert_eq!(allocator.peek(), 5);
    }

    #[test]
    fn test_overflow_is_fatal() {
        let mut allocator = SequenceAllocator::starting_at(u64::MAX - 1);
        assert_eq!(allocator.next().unwrap(), u64::MAX - 1);

        let err = allocator.next().unwrap_err();
        assert!(matches!(err, LandError::SequenceOverflow));
        assert!(err.is_fatal());

        // The counter stays exhausted.
        assert!(allocator.next().is_err());
    }
}
