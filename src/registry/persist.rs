use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use serde::Serialize;
use tokio::{io::AsyncWriteExt, sync::mpsc};

use super::{Peer, PeerMap};

/// The only task that ever touches the persistence file.
///
/// Each wake-up writes a complete snapshot of the registry to a temporary file and
/// renames it over the real one. The task ends once every [`super::PeerRegistry`]
/// handle has been dropped.
#[derive(Debug)]
pub struct PersistenceWriter {
    path: PathBuf,
    peers: Arc<RwLock<PeerMap>>,
    signal: mpsc::Receiver<()>,
    flushes: Arc<AtomicU64>,
}

impl PersistenceWriter {
    pub(super) fn new(
        path: PathBuf,
        peers: Arc<RwLock<PeerMap>>,
        signal: mpsc::Receiver<()>,
        flushes: Arc<AtomicU64>,
    ) -> Self {
        Self {
            path,
            peers,
            signal,
            flushes,
        }
    }

    /// Flush whenever signalled, until the registry goes away
    pub async fn run(mut self) {
        log::debug!("Persisting peer registry to {}", self.path.display());
        while self.signal.recv().await.is_some() {
            match self.flush().await {
                Ok(()) => {
                    self.flushes.fetch_add(1, Ordering::SeqCst);
                }
                Err(error) => log::warn!(
                    "Failed to persist peer registry to {}: {}",
                    self.path.display(),
                    error
                ),
            }
        }
        log::debug!("Peer registry writer stopped");
    }

    /// Write the current registry contents to disk
    async fn flush(&self) -> Result<(), std::io::Error> {
        let contents = self.snapshot()?;

        let mut temporary = self.path.clone().into_os_string();
        temporary.push(".tmp");
        let temporary = PathBuf::from(temporary);

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(&temporary)
            .await?;
        file.write_all(&contents).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temporary, &self.path).await?;
        log::trace!("Wrote {} bytes to {}", contents.len(), self.path.display());
        Ok(())
    }

    /// Serialize the whole map while holding the read lock, so the snapshot is consistent
    #[profiling::function]
    fn snapshot(&self) -> Result<Vec<u8>, std::io::Error> {
        let peers = self.peers.read().unwrap_or_else(PoisonError::into_inner);
        let ordered: BTreeMap<&String, &Peer> = peers.iter().collect();

        let mut buffer = Vec::new();
        let mut serializer = serde_json::Serializer::with_formatter(
            &mut buffer,
            serde_json::ser::PrettyFormatter::with_indent(b"\t"),
        );
        ordered.serialize(&mut serializer)?;
        buffer.push(b'\n');
        Ok(buffer)
    }
}
