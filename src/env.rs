//! The environment/role seam (C9): isolates the core from host-specific concerns — replicating
//! dictionary blobs to followers and allocating dictionary ids across a cluster.
//!
//! `Env` holds exactly the two optional hooks a host may install, each exactly once. Node role and
//! the reaction to a role change live on [`crate::engine::Engine`] itself (not here), since only
//! the engine owns the trainer and GC threads a role change starts or stops.

use crate::error::{Error, Result};
use once_cell::sync::OnceCell;

/// The role a node plays in its cluster. Only a leader runs the trainer and GC.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Undefined,
    Leader,
    Follower,
}

/// Replacement for the default in-process dictionary-id allocator. Implementations must be
/// thread-safe: the trainer may call `alloc`/`release` from a background thread while the hot path
/// is reading the current table concurrently.
pub trait IdProvider: Send + Sync {
    fn alloc(&self) -> Result<u16>;
    fn release(&self, id: u16);
}

type Publisher = dyn Fn(u16, &str, &[u8], &[u8]) -> Result<()> + Send + Sync;

/// Host hook registration. Each hook may be installed at most once; a second install attempt is a
/// caller bug and returns an error rather than silently replacing the first.
#[derive(Default)]
pub struct Env {
    publisher: OnceCell<Box<Publisher>>,
    id_provider: OnceCell<Box<dyn IdProvider>>,
}

impl Env {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the callback invoked when the trainer has a new dictionary ready to replicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a publisher was already installed.
    pub fn set_dict_publisher(
        &self,
        publisher: impl Fn(u16, &str, &[u8], &[u8]) -> Result<()> + Send + Sync + 'static,
    ) -> Result<()> {
        self.publisher
            .set(Box::new(publisher))
            .map_err(|_| Error::invalid("a dictionary publisher is already installed"))
    }

    /// Installs a replacement dictionary-id allocator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if a provider was already installed.
    pub fn set_dict_id_provider(&self, provider: impl IdProvider + 'static) -> Result<()> {
        self.id_provider
            .set(Box::new(provider))
            .map_err(|_| Error::invalid("a dictionary id provider is already installed"))
    }

    /// Calls the installed publisher, or succeeds as a no-op if none is installed (the
    /// single-node-cache default per spec.md §4.9).
    pub fn publish_dict(&self, id: u16, name: &str, dict: &[u8], manifest: &[u8]) -> Result<()> {
        match self.publisher.get() {
            Some(publisher) => publisher(id, name, dict, manifest),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn id_provider(&self) -> Option<&dyn IdProvider> {
        self.id_provider.get().map(std::convert::AsRef::as_ref)
    }
}

// -------------------------------------------------------------------------------------------------
//
// Tests
