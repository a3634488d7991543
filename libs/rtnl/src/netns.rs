//! Running netlink work inside another network namespace

use std::{
    fs::File,
    future::Future,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
};

use nix::sched::{setns, CloneFlags};
use rtnetlink::Handle;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to open network namespace {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to enter network namespace {path}: {source}")]
    Enter { path: PathBuf, source: nix::Error },
    #[error("Failed to start namespace worker: {0}")]
    Worker(std::io::Error),
    #[error("Failed to open rtnetlink connection inside namespace: {0}")]
    Netlink(std::io::Error),
    #[error("Namespace worker panicked")]
    WorkerPanicked,
}

/// Check if a network namespace handle exists at `path`
#[must_use]
pub fn exists<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().exists()
}

/// Run `task` with an rtnetlink handle that operates inside the namespace at `path`.
///
/// The namespace switch happens on a dedicated OS thread that runs its own single-threaded
/// runtime and exits when `task` completes. No other task ever runs in the switched namespace.
pub fn run_in<P, F, Fut, T>(path: P, task: F) -> Result<T, Error>
where
    P: AsRef<Path>,
    F: FnOnce(Handle) -> Fut + Send + 'static,
    Fut: Future<Output = T>,
    T: Send + 'static,
{
    let path = path.as_ref().to_path_buf();
    log::trace!("Opening network namespace {}", path.display());
    let namespace = File::open(&path).map_err(|source| Error::Open {
        path: path.clone(),
        source,
    })?;

    std::thread::Builder::new()
        .name("netns-worker".to_owned())
        .spawn(move || {
            setns(namespace.as_raw_fd(), CloneFlags::CLONE_NEWNET).map_err(|source| {
                log::error!("Failed to enter network namespace {}", path.display());
                Error::Enter { path, source }
            })?;

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(Error::Worker)?;

            runtime.block_on(async move {
                let handle = crate::new_handle().map_err(Error::Netlink)?;
                Ok(task(handle).await)
            })
        })
        .map_err(Error::Worker)?
        .join()
        .map_err(|_| Error::WorkerPanicked)?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_namespace() {
        let result = run_in("/nonexistent/netns/handle", |_handle| async {});
        assert!(matches!(result, Err(Error::Open { .. })));
        assert!(!exists("/nonexistent/netns/handle"));
    }
}
