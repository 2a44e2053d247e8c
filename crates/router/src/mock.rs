//! In-memory backend for unit tests.

use crate::backend::Backend;
use pstore_common::{
    CountRequest, CountResponse, DeleteRequest, DeleteResponse, GetKeysRequest, GetKeysResponse,
    ReadRequest, ReadResponse, StoreError, Value, WriteRequest, WriteResponse,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

pub(crate) struct MemBackend {
    name: String,
    data: Mutex<BTreeMap<String, (Value, i64)>>,
    counters: Mutex<HashMap<String, i64>>,
    clock: AtomicI64,
    calls: AtomicUsize,
    failure: Mutex<Option<StoreError>>,
    delay: Mutex<Duration>,
    reverse_keys: AtomicBool,
    writes: Mutex<Vec<String>>,
}

impl MemBackend {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            data: Mutex::new(BTreeMap::new()),
            counters: Mutex::new(HashMap::new()),
            clock: AtomicI64::new(0),
            calls: AtomicUsize::new(0),
            failure: Mutex::new(None),
            delay: Mutex::new(Duration::ZERO),
            reverse_keys: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub fn shared(name: &str) -> Arc<dyn Backend> {
        Self::new(name)
    }

    pub fn insert(&self, key: &str, payload: &[u8]) {
        let ts = self.tick();
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), (Value::raw(payload), ts));
    }

    pub fn payload(&self, key: &str) -> Option<Vec<u8>> {
        self.data
            .lock()
            .unwrap()
            .get(key)
            .map(|(v, _)| v.payload.clone())
    }

    pub fn set_counter(&self, counter: &str, value: i64) {
        self.counters
            .lock()
            .unwrap()
            .insert(counter.to_string(), value);
    }

    /// Every subsequent call fails with `err` until [`MemBackend::heal`].
    pub fn fail_with(&self, err: StoreError) {
        *self.failure.lock().unwrap() = Some(err);
    }

    pub fn heal(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    /// List keys in descending order instead of ascending.
    pub fn reverse_keys(&self) {
        self.reverse_keys.store(true, Ordering::SeqCst);
    }

    /// Calls received, successful or not.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Keys of successful writes, in arrival order.
    pub fn write_log(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn enter(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match self.failure.lock().unwrap().clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl Backend for MemBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self, req: &ReadRequest) -> Result<ReadResponse, StoreError> {
        self.enter().await?;
        self.data
            .lock()
            .unwrap()
            .get(&req.key)
            .map(|(value, ts)| ReadResponse {
                timestamp: *ts,
                value: value.clone(),
            })
            .ok_or_else(|| StoreError::NotFound(req.key.clone()))
    }

    async fn write(&self, req: &WriteRequest) -> Result<WriteResponse, StoreError> {
        self.enter().await?;
        let ts = self.tick();
        self.data
            .lock()
            .unwrap()
            .insert(req.key.clone(), (req.value.clone(), ts));
        self.writes.lock().unwrap().push(req.key.clone());
        Ok(WriteResponse { timestamp: ts })
    }

    async fn get_keys(&self, req: &GetKeysRequest) -> Result<GetKeysResponse, StoreError> {
        self.enter().await?;
        let mut keys: Vec<String> = self
            .data
            .lock()
            .unwrap()
            .keys()
            .filter(|k| req.matches(k))
            .cloned()
            .collect();
        if self.reverse_keys.load(Ordering::SeqCst) {
            keys.reverse();
        }
        Ok(GetKeysResponse { keys })
    }

    async fn delete(&self, req: &DeleteRequest) -> Result<DeleteResponse, StoreError> {
        self.enter().await?;
        match self.data.lock().unwrap().remove(&req.key) {
            Some(_) => Ok(DeleteResponse {}),
            None => Err(StoreError::NotFound(req.key.clone())),
        }
    }

    async fn count(&self, req: &CountRequest) -> Result<CountResponse, StoreError> {
        self.enter().await?;
        self.counters
            .lock()
            .unwrap()
            .get(&req.counter)
            .map(|count| CountResponse { count: *count })
            .ok_or_else(|| StoreError::NotFound(req.counter.clone()))
    }
}
