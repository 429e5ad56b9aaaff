//! Port reconciliation: free a local port held by a stale listener.
//!
//! # Responsibilities
//! - Detect whether a listener occupies a port (bind check)
//! - Identify the owning processes and ask them to terminate
//! - Re-check, at most `MAX_CYCLES` times, and report failure as fatal
//!
//! # Design Decisions
//! - Owner lookup and termination are trait seams (`PortOwners`, `ProcessKiller`)
//! - The supervisor's own PID is never a target
//! - Only local ports are touched; there is no remote variant
//! - Success is only reported after a later bind check succeeds

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, TcpListener};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;

/// Lookup → terminate → settle → re-check cycles before giving up.
pub const MAX_CYCLES: u32 = 2;

/// Finds the processes listening on a port.
#[async_trait]
pub trait PortOwners: Send + Sync {
    async fn listeners(&self, port: u16) -> io::Result<Vec<u32>>;
}

/// Asks a process to go away.
#[async_trait]
pub trait ProcessKiller: Send + Sync {
    async fn terminate(&self, pid: u32) -> io::Result<()>;
}

/// What `reclaim` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reclaim {
    AlreadyFree,
    Freed { pids: Vec<u32> },
}

#[derive(Debug, thiserror::Error)]
pub enum ReclaimError {
    #[error("port {port} still in use after {cycles} reclaim cycles (signalled pids: {pids:?})")]
    StillOccupied { port: u16, cycles: u32, pids: Vec<u32> },

    #[error("port {port} in use and its owner could not be identified: {source}")]
    Lookup {
        port: u16,
        #[source]
        source: io::Error,
    },
}

impl ReclaimError {
    pub fn port(&self) -> u16 {
        match self {
            ReclaimError::StillOccupied { port, .. } | ReclaimError::Lookup { port, .. } => *port,
        }
    }
}

/// True when nothing listens on `port` on loopback or the wildcard address,
/// over IPv4 or IPv6.
pub fn is_port_free(port: u16) -> bool {
    let v4_free = [Ipv4Addr::LOCALHOST, Ipv4Addr::UNSPECIFIED]
        .into_iter()
        .all(|ip| TcpListener::bind((ip, port)).is_ok());

    // A host without IPv6 cannot hold a v6 listener; only AddrInUse counts.
    v4_free
        && [Ipv6Addr::LOCALHOST, Ipv6Addr::UNSPECIFIED]
            .into_iter()
            .all(|ip| match TcpListener::bind((ip, port)) {
                Ok(_) => true,
                Err(e) => e.kind() != io::ErrorKind::AddrInUse,
            })
}

#[derive(Clone)]
pub struct PortReconciler {
    owners: Arc<dyn PortOwners>,
    killer: Arc<dyn ProcessKiller>,
    settle: Duration,
}

impl PortReconciler {
    pub fn new(owners: Arc<dyn PortOwners>, killer: Arc<dyn ProcessKiller>, settle: Duration) -> Self {
        Self {
            owners,
            killer,
            settle,
        }
    }

    /// Reconciler backed by the operating system.
    pub fn system(settle: Duration, grace: Duration) -> Self {
        Self::new(
            Arc::new(SystemPortOwners),
            Arc::new(SignalKiller { grace }),
            settle,
        )
    }

    /// Make sure `port` is free. Never returns `Ok` while the port is occupied.
    pub async fn reclaim(&self, port: u16) -> Result<Reclaim, ReclaimError> {
        if is_port_free(port) {
            return Ok(Reclaim::AlreadyFree);
        }

        let own_pid = std::process::id();
        let mut signalled = Vec::new();
        let mut lookup_error = None;

        for cycle in 1..=MAX_CYCLES {
            tracing::warn!(port, cycle, "Port in use, reclaiming");

            match self.owners.listeners(port).await {
                Ok(pids) => {
                    let pids: Vec<u32> = pids.into_iter().filter(|&pid| pid != own_pid).collect();
                    if pids.is_empty() {
                        tracing::warn!(port, "No foreign owner found for port");
                    }
                    for pid in pids {
                        match self.killer.terminate(pid).await {
                            Ok(()) => {
                                tracing::info!(port, pid, "Terminated port owner");
                                if !signalled.contains(&pid) {
                                    signalled.push(pid);
                                }
                            }
                            Err(e) => tracing::warn!(port, pid, error = %e, "Failed to terminate port owner"),
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(port, error = %e, "Port owner lookup failed");
                    lookup_error = Some(e);
                }
            }

            sleep(self.settle).await;
            if is_port_free(port) {
                return Ok(Reclaim::Freed { pids: signalled });
            }
        }

        match lookup_error {
            Some(source) if signalled.is_empty() => Err(ReclaimError::Lookup { port, source }),
            _ => Err(ReclaimError::StillOccupied {
                port,
                cycles: MAX_CYCLES,
                pids: signalled,
            }),
        }
    }
}

/// `/proc` on Linux, `lsof` elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPortOwners;

#[async_trait]
impl PortOwners for SystemPortOwners {
    async fn listeners(&self, port: u16) -> io::Result<Vec<u32>> {
        if std::path::Path::new("/proc/net/tcp").exists() {
            tokio::task::spawn_blocking(move || procfs_listeners(port))
                .await
                .map_err(io::Error::other)?
        } else {
            lsof_listeners(port).await
        }
    }
}

/// Socket inodes in LISTEN state on `port`, from a `/proc/net/tcp{,6}` table.
pub fn parse_listening_inodes(table: &str, port: u16) -> Vec<u64> {
    const TCP_LISTEN: &str = "0A";

    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 10 || cols[3] != TCP_LISTEN {
                return None;
            }
            let (_, port_hex) = cols[1].rsplit_once(':')?;
            if u16::from_str_radix(port_hex, 16).ok()? != port {
                return None;
            }
            cols[9].parse::<u64>().ok().filter(|&inode| inode != 0)
        })
        .collect()
}

fn procfs_listeners(port: u16) -> io::Result<Vec<u32>> {
    let mut inodes = Vec::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        match std::fs::read_to_string(table) {
            Ok(text) => inodes.extend(parse_listening_inodes(&text, port)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    if inodes.is_empty() {
        return Ok(Vec::new());
    }

    let targets: Vec<String> = inodes.iter().map(|i| format!("socket:[{}]", i)).collect();
    let mut pids = Vec::new();

    for entry in std::fs::read_dir("/proc")? {
        let Ok(entry) = entry else { continue };
        let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
            continue;
        };
        // Processes we may not inspect (or that vanished) are skipped.
        let Ok(fds) = std::fs::read_dir(entry.path().join("fd")) else {
            continue;
        };
        let owns = fds.flatten().any(|fd| {
            std::fs::read_link(fd.path())
                .map(|link| targets.iter().any(|t| link.as_os_str() == t.as_str()))
                .unwrap_or(false)
        });
        if owns {
            pids.push(pid);
        }
    }

    Ok(pids)
}

async fn lsof_listeners(port: u16) -> io::Result<Vec<u32>> {
    let output = tokio::process::Command::new("lsof")
        .args(["-nP", "-t", &format!("-iTCP:{}", port), "-sTCP:LISTEN"])
        .output()
        .await?;

    // lsof exits 1 when nothing matches.
    Ok(String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect())
}

/// SIGTERM, poll for `grace`, then SIGKILL.
#[derive(Debug, Clone, Copy)]
pub struct SignalKiller {
    pub grace: Duration,
}

#[async_trait]
impl ProcessKiller for SignalKiller {
    #[cfg(unix)]
    async fn terminate(&self, pid: u32) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        const POLL: Duration = Duration::from_millis(100);

        let target = Pid::from_raw(pid as i32);
        let exited = || matches!(kill(target, None), Err(Errno::ESRCH));

        match kill(target, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return Ok(()),
            Err(e) => return Err(io::Error::other(e)),
        }

        let polls = (self.grace.as_millis() / POLL.as_millis()).max(1);
        for _ in 0..polls {
            sleep(POLL).await;
            if exited() {
                return Ok(());
            }
        }

        tracing::warn!(pid, "Process ignored SIGTERM, sending SIGKILL");
        match kill(target, Signal::SIGKILL) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return Ok(()),
            Err(e) => return Err(io::Error::other(e)),
        }

        for _ in 0..20 {
            sleep(POLL).await;
            if exited() {
                return Ok(());
            }
        }

        Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("process {} did not exit after SIGKILL", pid),
        ))
    }

    #[cfg(not(unix))]
    async fn terminate(&self, _pid: u32) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "terminating foreign processes is only supported on unix",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 31337 1 0000000000000000 100 0 0 10 0
   1: 00000000:1389 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 4242 1 0000000000000000 100 0 0 10 0
   2: 0100007F:1F90 0100007F:D431 01 00000000:00000000 00:00000000 00000000  1000        0 5555 1 0000000000000000 20 4 30 10 -1
";

    #[test]
    fn finds_listening_inodes_only() {
        assert_eq!(parse_listening_inodes(TABLE, 8080), vec![31337]);
        assert_eq!(parse_listening_inodes(TABLE, 5001), vec![4242]);
        assert!(parse_listening_inodes(TABLE, 5002).is_empty());
    }

    #[test]
    fn bound_port_is_not_free() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_free(port));
        drop(listener);
        assert!(is_port_free(port));
    }

    #[test]
    fn ipv6_only_listener_is_not_free() {
        // Skipped on hosts without an IPv6 loopback.
        let Ok(listener) = TcpListener::bind((Ipv6Addr::LOCALHOST, 0)) else {
            return;
        };
        let port = listener.local_addr().unwrap().port();
        assert!(!is_port_free(port));
        drop(listener);
        assert!(is_port_free(port));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn procfs_finds_own_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let pids = SystemPortOwners.listeners(port).await.unwrap();
        assert!(pids.contains(&std::process::id()));
    }
}
