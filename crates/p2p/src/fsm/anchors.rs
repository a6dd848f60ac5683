//! Anchor peers: a small set of known-good outbound peers snapshotted to
//! disk on shutdown and reconnected to first on the next startup, so a
//! restarting node isn't solely at the mercy of whatever `AddrMan`/DNS
//! seeding hands it (eclipse-attack resistance).
use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// At most this many anchors are kept; Bitcoin Core also caps at 2.
pub const MAX_ANCHORS: usize = 2;

const ANCHOR_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Anchor {
    addr: SocketAddr,
    services: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct AnchorFile {
    version: u32,
    anchors: Vec<Anchor>,
}

/// Reads and writes `anchors.json`. Holds no peer state itself: the caller
/// supplies the current outbound peers to snapshot, and gets back the
/// addresses to reconnect to on load.
pub struct AnchorManager {
    path: Option<PathBuf>,
}

impl AnchorManager {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// Read `anchors.json`, deleting it immediately so a crash never leaves
    /// the node replaying stale anchors across more than one restart.
    /// A missing, corrupt, or version-mismatched file yields an empty list.
    pub fn take(&self) -> Vec<(SocketAddr, u64)> {
        let Some(path) = self.path.as_ref() else {
            return Vec::new();
        };
        let anchors = match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<AnchorFile>(&bytes) {
                Ok(file) if file.version == ANCHOR_FILE_VERSION => {
                    file.anchors.into_iter().map(|a| (a.addr, a.services)).collect()
                }
                Ok(file) => {
                    warn!(version = file.version, "unsupported anchors file version, discarding");
                    Vec::new()
                }
                Err(err) => {
                    warn!(%err, "anchors file is corrupt, discarding");
                    Vec::new()
                }
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                warn!(%err, "failed to read anchors file");
                Vec::new()
            }
        };
        if let Err(err) = fs::remove_file(path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(%err, "failed to delete anchors file after reading");
            }
        }
        debug!(count = anchors.len(), "loaded anchor peers");
        anchors
    }

    /// Snapshot up to [`MAX_ANCHORS`] addresses to disk atomically.
    pub fn save(&self, peers: impl IntoIterator<Item = (SocketAddr, u64)>) -> io::Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let anchors: Vec<Anchor> = peers
            .into_iter()
            .take(MAX_ANCHORS)
            .map(|(addr, services)| Anchor { addr, services })
            .collect();
        if anchors.is_empty() {
            debug!("no anchors to save");
            return Ok(());
        }
        let file = AnchorFile {
            version: ANCHOR_FILE_VERSION,
            anchors,
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        write_atomic(path, &bytes)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("anchors")
    ));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_take_roundtrips() {
        let dir = std::env::temp_dir().join(format!("anchors-test-{:?}", std::thread::current().id()));
        let path = dir.join("anchors.json");
        let mgr = AnchorManager::new(Some(path.clone()));
        let a: SocketAddr = "1.2.3.4:9590".parse().unwrap();
        let b: SocketAddr = "5.6.7.8:9590".parse().unwrap();
        mgr.save(vec![(a, 1), (b, 1)]).unwrap();

        let loaded = mgr.take();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().any(|(addr, _)| *addr == a));
        // The file is deleted after being read once.
        assert!(!path.exists());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn more_than_cap_is_truncated() {
        let dir = std::env::temp_dir().join(format!("anchors-test2-{:?}", std::thread::current().id()));
        let path = dir.join("anchors.json");
        let mgr = AnchorManager::new(Some(path));
        let peers: Vec<(SocketAddr, u64)> =
            (0..5).map(|i| (format!("10.0.0.{i}:9590").parse().unwrap(), 1)).collect();
        mgr.save(peers).unwrap();
        assert_eq!(mgr.take().len(), MAX_ANCHORS);
        let _ = fs::remove_dir_all(dir);
    }
}
