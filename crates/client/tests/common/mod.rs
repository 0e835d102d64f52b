#![allow(dead_code)]

pub mod mock_cluster;
pub mod test_scheduler;

use bytes::Bytes;
use region_client::{Client, Config, RegionInfo, ScanError, ScannerHandle};
use std::sync::Arc;

pub use mock_cluster::{MockCluster, META_SERVER};
pub use test_scheduler::RecordingScheduler;

pub const TABLE: &str = "table";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

pub fn region(start: &'static str, stop: &'static str, epoch: u64) -> RegionInfo {
    RegionInfo::new(TABLE, start, stop, epoch).unwrap()
}

pub struct TestEnv {
    pub cluster: Arc<MockCluster>,
    pub scheduler: Arc<RecordingScheduler>,
    pub client: Client,
}

impl TestEnv {
    pub fn new(batch_size: u32) -> Self {
        init_tracing();
        let cluster = Arc::new(MockCluster::new());
        let scheduler = Arc::new(RecordingScheduler::default());
        let mut config = Config::default();
        config.scan.batch_size = batch_size;
        let client = Client::new(config, cluster.clone(), scheduler.clone()).unwrap();
        Self {
            cluster,
            scheduler,
            client,
        }
    }

    /// Table split as `["", "key")` on server A and `["key", "")` on server B
    pub fn two_regions(batch_size: u32) -> Self {
        let env = Self::new(batch_size);
        env.cluster.add_region(&region("", "key", 1234567890), "a:16020");
        env.cluster.add_region(&region("key", "", 1234567890), "b:16020");
        env
    }

    /// Table split as `["", "g")`, `["g", "p")`, `["p", "")` on servers A, B, C
    pub fn three_regions(batch_size: u32) -> Self {
        let env = Self::new(batch_size);
        env.cluster.add_region(&region("", "g", 1), "a:16020");
        env.cluster.add_region(&region("g", "p", 1), "b:16020");
        env.cluster.add_region(&region("p", "", 1), "c:16020");
        env
    }
}

/// Drain a scanner, returning row keys in delivery order
pub async fn collect_keys(scanner: &ScannerHandle) -> Result<Vec<String>, ScanError> {
    let mut keys = Vec::new();
    while let Some(batch) = scanner.next_batch().await? {
        assert!(!batch.is_empty(), "batches are never empty");
        keys.extend(batch.iter().map(|row| key_string(&row.key)));
    }
    Ok(keys)
}

pub fn key_string(key: &Bytes) -> String {
    String::from_utf8_lossy(key).into_owned()
}
