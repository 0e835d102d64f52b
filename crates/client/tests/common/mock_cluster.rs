// In-memory cluster implementing the region transport, with fault injection
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use region_client::{RegionTransport, RpcError, RpcResult, ScanBatch, ScanRequest};
use region_client::{Direction, RegionInfo, Row, ServerHandle};
use region_core::meta::{MetaEntry, INFO_FAMILY};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

pub const META_SERVER: &str = "meta:16020";

#[derive(Default)]
struct ClusterState {
    /// META row key -> META row
    meta: BTreeMap<Vec<u8>, Row>,
    /// Regions each server actually serves
    served: HashMap<ServerHandle, HashSet<RegionInfo>>,
    /// table -> row key -> row
    data: HashMap<Bytes, BTreeMap<Bytes, Row>>,
    scan_faults: VecDeque<RpcError>,
    meta_faults: VecDeque<RpcError>,
    meta_always_fails: Option<RpcError>,
    scan_log: Vec<(ServerHandle, ScanRequest)>,
    meta_log: Vec<Vec<u8>>,
}

pub struct MockCluster {
    meta_region: RegionInfo,
    state: Mutex<ClusterState>,
    hold_scans: AtomicBool,
    /// Signalled when a held scan has started
    pub scan_started: Notify,
    scan_gate: Notify,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCluster {
    pub fn new() -> Self {
        Self {
            meta_region: RegionInfo::new(".META.", "", "", 1).unwrap(),
            state: Mutex::new(ClusterState::default()),
            hold_scans: AtomicBool::new(false),
            scan_started: Notify::new(),
            scan_gate: Notify::new(),
        }
    }

    /// Register a region in META and assign it to `server`
    pub fn add_region(&self, region: &RegionInfo, server: &str) {
        let mut state = self.state.lock();
        let server = ServerHandle::new(server);
        Self::write_meta(&mut state, region, Some(server.clone()));
        state.served.entry(server).or_default().insert(region.clone());
    }

    /// Register a region in META without a server (in transition)
    pub fn add_offline_region(&self, region: &RegionInfo) {
        let mut state = self.state.lock();
        Self::write_meta(&mut state, region, None);
    }

    /// Register a region in META pointing at a server that does not serve it
    pub fn add_stale_region(&self, region: &RegionInfo, server: &str) {
        let mut state = self.state.lock();
        Self::write_meta(&mut state, region, Some(ServerHandle::new(server)));
    }

    /// Move a region to another server
    pub fn move_region(&self, region: &RegionInfo, to: &str) {
        let mut state = self.state.lock();
        for regions in state.served.values_mut() {
            regions.remove(region);
        }
        let to = ServerHandle::new(to);
        Self::write_meta(&mut state, region, Some(to.clone()));
        state.served.entry(to).or_default().insert(region.clone());
    }

    /// Split `parent` at `split_key`; the daughters get `epoch` and the given
    /// servers
    pub fn split_region(
        &self,
        parent: &RegionInfo,
        split_key: &str,
        epoch: u64,
        left_server: &str,
        right_server: &str,
    ) -> (RegionInfo, RegionInfo) {
        let left = RegionInfo::new(
            parent.table().clone(),
            parent.start_key().clone(),
            Bytes::copy_from_slice(split_key.as_bytes()),
            epoch,
        )
        .unwrap();
        let right = RegionInfo::new(
            parent.table().clone(),
            Bytes::copy_from_slice(split_key.as_bytes()),
            parent.stop_key().clone(),
            epoch,
        )
        .unwrap();
        {
            let mut state = self.state.lock();
            state.meta.remove(&parent.meta_row_key());
            for regions in state.served.values_mut() {
                regions.remove(parent);
            }
        }
        self.add_region(&left, left_server);
        self.add_region(&right, right_server);
        (left, right)
    }

    /// Merge two adjacent regions into one region with `epoch` on `server`
    pub fn merge_regions(
        &self,
        left: &RegionInfo,
        right: &RegionInfo,
        epoch: u64,
        server: &str,
    ) -> RegionInfo {
        assert_eq!(left.stop_key(), right.start_key(), "regions must be adjacent");
        let merged = RegionInfo::new(
            left.table().clone(),
            left.start_key().clone(),
            right.stop_key().clone(),
            epoch,
        )
        .unwrap();
        {
            let mut state = self.state.lock();
            state.meta.remove(&left.meta_row_key());
            state.meta.remove(&right.meta_row_key());
            for regions in state.served.values_mut() {
                regions.remove(left);
                regions.remove(right);
            }
        }
        self.add_region(&merged, server);
        merged
    }

    pub fn put(&self, table: &str, key: &str, value: &str) {
        let key = Bytes::copy_from_slice(key.as_bytes());
        let row = Row::new(key.clone())
            .with_cell("cf", "q1", Bytes::copy_from_slice(value.as_bytes()))
            .with_cell("cf", "q2", "other")
            .with_cell("meta", "ts", "1");
        self.state
            .lock()
            .data
            .entry(Bytes::copy_from_slice(table.as_bytes()))
            .or_default()
            .insert(key, row);
    }

    pub fn put_keys(&self, table: &str, keys: &[&str]) {
        for key in keys {
            self.put(table, key, &format!("value-{}", key));
        }
    }

    /// Fail the next `count` scan requests with `error`
    pub fn fail_next_scans(&self, error: RpcError, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.scan_faults.push_back(error.clone());
        }
    }

    /// Fail the next `count` META lookups with `error`
    pub fn fail_next_meta_lookups(&self, error: RpcError, count: usize) {
        let mut state = self.state.lock();
        for _ in 0..count {
            state.meta_faults.push_back(error.clone());
        }
    }

    /// Fail every META lookup with `error`
    pub fn break_meta(&self, error: RpcError) {
        self.state.lock().meta_always_fails = Some(error);
    }

    /// Park every scan request until `release_scans`
    pub fn hold_scans(&self) {
        self.hold_scans.store(true, Ordering::SeqCst);
    }

    pub fn release_scans(&self) {
        self.hold_scans.store(false, Ordering::SeqCst);
        self.scan_gate.notify_waiters();
    }

    pub fn scan_log(&self) -> Vec<(ServerHandle, ScanRequest)> {
        self.state.lock().scan_log.clone()
    }

    pub fn meta_log(&self) -> Vec<Vec<u8>> {
        self.state.lock().meta_log.clone()
    }

    pub fn scans_against(&self, server: &str) -> usize {
        self.state
            .lock()
            .scan_log
            .iter()
            .filter(|(s, _)| s.as_str() == server)
            .count()
    }

    fn write_meta(state: &mut ClusterState, region: &RegionInfo, server: Option<ServerHandle>) {
        let row = MetaEntry::new(region.clone(), server)
            .to_row(INFO_FAMILY)
            .unwrap();
        state.meta.insert(row.key.to_vec(), row);
    }

    fn project(row: &Row, request: &ScanRequest) -> Row {
        let mut projected = Row::new(row.key.clone());
        projected.cells = row
            .cells
            .iter()
            .filter(|c| request.family.as_ref().map_or(true, |f| c.family == *f))
            .filter(|c| request.qualifier.as_ref().map_or(true, |q| c.qualifier == *q))
            .cloned()
            .collect();
        projected
    }
}

#[async_trait]
impl RegionTransport for MockCluster {
    async fn scan(&self, server: &ServerHandle, request: ScanRequest) -> RpcResult<ScanBatch> {
        if self.hold_scans.load(Ordering::SeqCst) {
            let released = self.scan_gate.notified();
            self.scan_started.notify_one();
            released.await;
        }

        let mut state = self.state.lock();
        state.scan_log.push((server.clone(), request.clone()));
        if let Some(err) = state.scan_faults.pop_front() {
            return Err(err);
        }
        let serves = state
            .served
            .get(server)
            .is_some_and(|regions| regions.contains(request.region.as_ref()));
        if !serves {
            return Err(RpcError::NotServingRegion(request.region.name()));
        }

        let Some(rows) = state.data.get(request.region.table()) else {
            return Ok(ScanBatch::default());
        };
        let admitted: Box<dyn Iterator<Item = &Row> + '_> = match request.direction {
            Direction::Forward => Box::new(rows.values().filter(|r| request.admits(&r.key))),
            Direction::Reverse => Box::new(rows.values().rev().filter(|r| request.admits(&r.key))),
        };
        let mut admitted = admitted.peekable();
        let mut batch = Vec::new();
        while batch.len() < request.batch_size as usize {
            match admitted.next() {
                Some(row) => batch.push(Self::project(row, &request)),
                None => break,
            }
        }
        let more = admitted.peek().is_some();
        Ok(ScanBatch { rows: batch, more })
    }

    async fn get_closest_row_before(
        &self,
        server: &ServerHandle,
        meta_region: &RegionInfo,
        key: &[u8],
        family: &[u8],
    ) -> RpcResult<Option<Row>> {
        tokio::task::yield_now().await;
        let mut state = self.state.lock();
        state.meta_log.push(key.to_vec());
        if let Some(err) = state.meta_faults.pop_front() {
            return Err(err);
        }
        if let Some(err) = &state.meta_always_fails {
            return Err(err.clone());
        }
        if server.as_str() != META_SERVER || *meta_region != self.meta_region {
            return Err(RpcError::NotServingRegion(meta_region.name()));
        }
        assert_eq!(family, INFO_FAMILY);
        Ok(state
            .meta
            .range(..=key.to_vec())
            .next_back()
            .map(|(_, row)| row.clone()))
    }

    async fn locate_meta(&self) -> RpcResult<(RegionInfo, ServerHandle)> {
        Ok((self.meta_region.clone(), ServerHandle::new(META_SERVER)))
    }
}
