//! Shared test fixtures.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use redb::StorageBackend;
use redb::backends::InMemoryBackend;

use convoy_state::StateStore;

/// In-memory redb backend whose syncs fail once `fail_sync` is set.
///
/// redb refuses all further I/O after a failed sync, so every later read
/// and write on the store fails as well.
#[derive(Debug, Default)]
pub(crate) struct FlakyBackend {
    inner: InMemoryBackend,
    fail_sync: Arc<AtomicBool>,
}

impl StorageBackend for FlakyBackend {
    fn len(&self) -> io::Result<u64> {
        self.inner.len()
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> io::Result<()> {
        self.inner.read(offset, out)
    }

    fn set_len(&self, len: u64) -> io::Result<()> {
        self.inner.set_len(len)
    }

    fn sync_data(&self) -> io::Result<()> {
        if self.fail_sync.load(Ordering::SeqCst) {
            return Err(io::Error::other("disk unavailable"));
        }
        self.inner.sync_data()
    }

    fn write(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.inner.write(offset, data)
    }
}

/// A store plus the switch that breaks its writes.
pub(crate) fn flaky_store() -> (StateStore, Arc<AtomicBool>) {
    let fail_sync = Arc::new(AtomicBool::new(false));
    let backend = FlakyBackend {
        inner: InMemoryBackend::new(),
        fail_sync: Arc::clone(&fail_sync),
    };
    let store = StateStore::open_with_backend(backend).unwrap();
    (store, fail_sync)
}
