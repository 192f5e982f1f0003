use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use serde::Serialize;

use super::state::{ConnectionInfo, ConnectionSnapshot};

/// Реестр активных соединений.
///
/// Используется для статистики (`STATS`) и для ожидания закрытия
/// соединений при остановке.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<u32, Arc<ConnectionInfo>>>,
    id_counter: AtomicU32,
}

/// Агрегированная статистика по всем соединениям.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GlobalConnectionStats {
    pub active_connections: usize,
    pub total_requests: u64,
    pub total_pushes: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    pub total_errors: u64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Регистрирует соединение и выдаёт ему новый ID.
    pub fn register(
        &self,
        client_addr: SocketAddr,
    ) -> Arc<ConnectionInfo> {
        let connection_id = self.id_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let info = Arc::new(ConnectionInfo::new(connection_id, client_addr));
        self.connections.write().insert(connection_id, info.clone());
        info
    }

    /// Отсутствующий ID игнорируется.
    pub fn unregister(
        &self,
        connection_id: u32,
    ) {
        self.connections.write().remove(&connection_id);
    }

    pub fn get(
        &self,
        connection_id: u32,
    ) -> Option<Arc<ConnectionInfo>> {
        self.connections.read().get(&connection_id).cloned()
    }

    pub fn active_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Снимки всех соединений, упорядоченные по ID.
    pub fn snapshots(&self) -> Vec<ConnectionSnapshot> {
        let mut snapshots: Vec<_> = self
            .connections
            .read()
            .values()
            .map(|info| info.snapshot())
            .collect();
        snapshots.sort_by_key(|s| s.connection_id);
        snapshots
    }

    pub fn global_stats(&self) -> GlobalConnectionStats {
        let connections = self.connections.read();
        let mut stats = GlobalConnectionStats {
            active_connections: connections.len(),
            ..Default::default()
        };

        for info in connections.values() {
            stats.total_requests += info.stats.requests();
            stats.total_pushes += info.stats.pushes();
            stats.total_bytes_sent += info.stats.bytes_sent();
            stats.total_bytes_received += info.stats.bytes_received();
            stats.total_errors += info.stats.errors();
        }
        stats
    }
}
