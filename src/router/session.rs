//! Sender → remote conversation mapping.

use std::collections::HashMap;

use tokio::sync::{Mutex, MutexGuard, RwLock};

/// One entry per sender, never evicted for the life of the process.
///
/// Lookups take the read lock. Creating a new entry goes through
/// [`SessionTable::begin_allocation`], which serialises every allocation so
/// the remote read-then-create sequence is linearised.
#[derive(Default)]
pub(crate) struct SessionTable {
    map: RwLock<HashMap<i64, i64>>,
    /// Highest conversation id handed out by this process.
    high_water: Mutex<i64>,
}

/// Held while a new session is being allocated.
pub(crate) struct Allocation<'a> {
    table: &'a SessionTable,
    high_water: MutexGuard<'a, i64>,
}

impl SessionTable {
    pub(crate) async fn get(&self, sender_id: i64) -> Option<i64> {
        self.map.read().await.get(&sender_id).copied()
    }

    pub(crate) async fn len(&self) -> usize {
        self.map.read().await.len()
    }

    pub(crate) async fn begin_allocation(&self) -> Allocation<'_> {
        Allocation {
            table: self,
            high_water: self.high_water.lock().await,
        }
    }
}

impl Allocation<'_> {
    /// Another allocation may have finished while we waited for the lock.
    pub(crate) async fn existing(&self, sender_id: i64) -> Option<i64> {
        self.table.get(sender_id).await
    }

    /// Next id given the highest id the backend reports.
    pub(crate) fn next_id(&self, remote_highest: i64) -> i64 {
        remote_highest.max(*self.high_water) + 1
    }

    pub(crate) async fn commit(mut self, sender_id: i64, conversation_id: i64) {
        *self.high_water = (*self.high_water).max(conversation_id);
        self.table.map.write().await.insert(sender_id, conversation_id);
    }
}
