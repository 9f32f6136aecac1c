/// Boundaries of the frame the current row is evaluated against.
///
/// Frames start at the first row of the partition. The upper bound is a
/// position relative to the partition start and is exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowFrameState {
    upper_bound: usize,
    partition_size: usize,
}

impl WindowFrameState {
    pub fn new(upper_bound: usize, partition_size: usize) -> Self {
        debug_assert!(upper_bound <= partition_size);
        Self {
            upper_bound,
            partition_size,
        }
    }

    pub fn update_upper_bound(&mut self, upper_bound: usize) {
        debug_assert!(upper_bound <= self.partition_size);
        self.upper_bound = upper_bound;
    }

    pub fn upper_bound_exclusive(&self) -> usize {
        self.upper_bound
    }
}
