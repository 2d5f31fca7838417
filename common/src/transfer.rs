//! Transfer sizing and accounting shared by the get and submit planners.

use crate::config::{PARALLEL_TRANSFER_MIN_SIZE, TRANSFER_THREAD_NUM_MAX, TransferConfig};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub bytes_transferred: u64,
    pub files_transferred: usize,
    pub files_skipped: usize,
    pub directories_created: usize,
}

impl std::ops::Add for Summary {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self {
            bytes_transferred: self.bytes_transferred + other.bytes_transferred,
            files_transferred: self.files_transferred + other.files_transferred,
            files_skipped: self.files_skipped + other.files_skipped,
            directories_created: self.directories_created + other.directories_created,
        }
    }
}

impl std::iter::Sum for Summary {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), |a, b| a + b)
    }
}

impl std::fmt::Display for Summary {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "bytes transferred: {}\n\
            files transferred: {}\n\
            files skipped: {}\n\
            directories created: {}",
            bytesize::ByteSize(self.bytes_transferred),
            self.files_transferred,
            self.files_skipped,
            self.directories_created,
        )
    }
}

/// Concurrent streams a file of `size` bytes may open.
///
/// 1 below the parallel threshold or when single threaded; above it one stream per threshold-sized slice,
/// capped by the per-file limit, the scheduler width and the protocol maximum.
pub fn threads_required(size: u64, config: &TransferConfig) -> usize {
    if config.single_threaded || size < PARALLEL_TRANSFER_MIN_SIZE {
        return 1;
    }
    let wanted = size.div_ceil(PARALLEL_TRANSFER_MIN_SIZE);
    let cap = config
        .thread_num_per_file
        .min(config.thread_num)
        .min(TRANSFER_THREAD_NUM_MAX)
        .max(1);
    usize::try_from(wanted).map_or(cap, |wanted| wanted.clamp(1, cap))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn small_files_get_one_stream() {
        let config = TransferConfig::default();
        assert_eq!(threads_required(0, &config), 1);
        assert_eq!(threads_required(10, &config), 1);
        assert_eq!(threads_required(PARALLEL_TRANSFER_MIN_SIZE - 1, &config), 1);
    }

    #[test]
    fn large_files_are_capped() {
        let config = TransferConfig {
            thread_num: 20,
            thread_num_per_file: 3,
            ..Default::default()
        };
        assert_eq!(threads_required(PARALLEL_TRANSFER_MIN_SIZE, &config), 1);
        assert_eq!(threads_required(PARALLEL_TRANSFER_MIN_SIZE + 1, &config), 2);
        assert_eq!(threads_required(u64::MAX, &config), 3);
        let single = TransferConfig {
            single_threaded: true,
            ..config
        };
        assert_eq!(threads_required(u64::MAX, &single), 1);
    }

    #[test]
    fn summaries_add_up() {
        let a = Summary {
            bytes_transferred: 10,
            files_transferred: 1,
            ..Default::default()
        };
        let b = Summary {
            files_skipped: 2,
            directories_created: 1,
            ..Default::default()
        };
        let total: Summary = [a, b].into_iter().sum();
        assert_eq!(total.bytes_transferred, 10);
        assert_eq!(total.files_skipped, 2);
        assert!(total.to_string().contains("files skipped: 2"));
    }

    proptest! {
        #[test]
        fn non_decreasing_in_size(a in any::<u64>(), b in any::<u64>(), per_file in 1usize..30, threads in 1usize..30) {
            let config = TransferConfig {
                thread_num: threads,
                thread_num_per_file: per_file,
                ..Default::default()
            };
            let (small, large) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(threads_required(small, &config) <= threads_required(large, &config));
            prop_assert!(threads_required(large, &config) <= TRANSFER_THREAD_NUM_MAX);
        }
    }
}
