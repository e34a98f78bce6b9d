pub const DEFAULT_SAMPLING_RATE: u8 = 100;
pub const DEFAULT_MAX_BUFFERED_RECORDS: usize = 1000;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 25;
pub const DEFAULT_FLUSH_INTERVAL_SECS: u64 = 10;

