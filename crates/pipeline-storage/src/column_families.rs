//! Column family definitions for RocksDB.
//!
//! - jobs: Job records keyed by id (default compaction)
//! - queue: Messages of every named queue, prefixed by queue name
//! - counters: Monotonic id/sequence counters

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for job records
pub const CF_JOBS: &str = "jobs";

/// Column family name for queue messages
pub const CF_QUEUE: &str = "queue";

/// Column family name for sequence counters
pub const CF_COUNTERS: &str = "counters";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_JOBS, CF_QUEUE, CF_COUNTERS];

/// Options for job records (small JSON documents, compressed)
fn jobs_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_JOBS, jobs_options()),
        ColumnFamilyDescriptor::new(CF_QUEUE, Options::default()),
        ColumnFamilyDescriptor::new(CF_COUNTERS, Options::default()),
    ]
}
