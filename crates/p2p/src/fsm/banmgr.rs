//! Ban list and discouragement set, with disk persistence.
use std::collections::HashMap;
use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::net::LocalTime;

/// Upper bound on the in-memory discourage set; oldest entries are evicted
/// once this is exceeded.
const MAX_DISCOURAGED: usize = 10_000;

/// Why a peer was banned. Kept as free text so callers (misbehavior engine,
/// admin RPC) don't need a shared enum.
pub type BanReason = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanEntry {
    pub created_at: u64,
    /// Unix timestamp the ban lifts at. Zero means permanent.
    pub ban_until: u64,
    pub reason: BanReason,
}

impl BanEntry {
    fn is_expired(&self, now: u64) -> bool {
        self.ban_until != 0 && now >= self.ban_until
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BanFile {
    bans: HashMap<IpAddr, BanEntry>,
}

/// Normalizes an address to its bare IP: bans apply per-host, not per-port.
fn normalize(addr: IpAddr) -> IpAddr {
    match addr {
        IpAddr::V4(v4) => IpAddr::V4(v4),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
    }
}

/// Tracks manual/automatic bans and the softer discourage set, and persists
/// bans to disk as JSON.
#[derive(Debug)]
pub struct BanManager {
    path: Option<PathBuf>,
    bans: HashMap<IpAddr, BanEntry>,
    discouraged: Vec<IpAddr>,
}

impl BanManager {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            bans: HashMap::new(),
            discouraged: Vec::new(),
        }
    }

    /// Load the ban list from disk, if a path was configured and the file
    /// exists. Missing or unreadable files are treated as an empty list.
    pub fn load(&mut self) -> io::Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        match fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<BanFile>(&bytes) {
                Ok(file) => {
                    self.bans = file.bans;
                    debug!(count = self.bans.len(), "loaded ban list");
                }
                Err(err) => warn!(%err, "ban list is corrupt, starting empty"),
            },
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => warn!(%err, "failed to read ban list"),
        }
        Ok(())
    }

    /// Write the ban list to disk atomically: serialize to a temp file in
    /// the same directory, then rename over the target.
    pub fn save(&self) -> io::Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let file = BanFile {
            bans: self.bans.clone(),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;
        write_atomic(path, &bytes)
    }

    pub fn ban(&mut self, addr: IpAddr, reason: BanReason, now: LocalTime, duration_secs: u64) {
        let addr = normalize(addr);
        let ban_until = if duration_secs == 0 {
            0
        } else {
            now.as_secs().saturating_add(duration_secs)
        };
        self.bans.insert(
            addr,
            BanEntry {
                created_at: now.as_secs(),
                ban_until,
                reason,
            },
        );
    }

    pub fn unban(&mut self, addr: IpAddr) -> bool {
        self.bans.remove(&normalize(addr)).is_some()
    }

    pub fn is_banned(&mut self, addr: IpAddr, now: LocalTime) -> bool {
        let addr = normalize(addr);
        let expired = self.bans.get(&addr).is_some_and(|e| e.is_expired(now.as_secs()));
        if expired {
            self.bans.remove(&addr);
            return false;
        }
        self.bans.contains_key(&addr)
    }

    pub fn list_bans(&self) -> impl Iterator<Item = (&IpAddr, &BanEntry)> {
        self.bans.iter()
    }

    /// Latch a peer as discouraged. Discouraged peers aren't refused a new
    /// connection outright, but are disconnected on the next sweep and not
    /// re-admitted while still in the set.
    pub fn discourage(&mut self, addr: IpAddr) {
        let addr = normalize(addr);
        if self.discouraged.contains(&addr) {
            return;
        }
        if self.discouraged.len() >= MAX_DISCOURAGED {
            self.discouraged.remove(0);
        }
        self.discouraged.push(addr);
    }

    pub fn is_discouraged(&self, addr: IpAddr) -> bool {
        self.discouraged.contains(&normalize(addr))
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("banlist")
    ));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn ban_and_is_banned_roundtrip() {
        let mut mgr = BanManager::new(None);
        let addr = IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4));
        let now = LocalTime::from_secs(1000);
        mgr.ban(addr, "manual".into(), now, 0);
        assert!(mgr.is_banned(addr, now));
    }

    #[test]
    fn temporary_ban_expires() {
        let mut mgr = BanManager::new(None);
        let addr = IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4));
        let now = LocalTime::from_secs(1000);
        mgr.ban(addr, "temp".into(), now, 10);
        assert!(mgr.is_banned(addr, now));
        assert!(!mgr.is_banned(addr, LocalTime::from_secs(1011)));
    }

    #[test]
    fn discourage_latches_until_cap() {
        let mut mgr = BanManager::new(None);
        let addr = IpAddr::V4(Ipv4Addr::new(5, 6, 7, 8));
        mgr.discourage(addr);
        assert!(mgr.is_discouraged(addr));
    }

    #[test]
    fn persists_across_save_load() {
        let dir = std::env::temp_dir().join(format!("banmgr-test-{:?}", std::thread::current().id()));
        let path = dir.join("banlist.json");
        let mut mgr = BanManager::new(Some(path.clone()));
        let addr = IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9));
        mgr.ban(addr, "test".into(), LocalTime::from_secs(500), 0);
        mgr.save().unwrap();

        let mut reloaded = BanManager::new(Some(path));
        reloaded.load().unwrap();
        assert!(reloaded.is_banned(addr, LocalTime::from_secs(500)));
        let _ = fs::remove_dir_all(dir);
    }
}
