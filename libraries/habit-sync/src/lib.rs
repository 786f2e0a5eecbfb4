//! Local-first syncing for a single habit.
//!
//! Syncing strategy:
//! 1. Every edit is applied to the in-memory habit and written to the [`LocalStore`] right away, so
//!    the device always has a usable copy.
//! 2. While someone is signed in, edits (re)arm a short debounce timer. When it fires, the whole
//!    snapshot is sent to the server along with the time of the last successful sync.
//! 3. The server compares that time with its own last-modified time. If its copy is newer it sends
//!    it back and the client overwrites local state; otherwise it keeps the client's copy.
//! 4. A periodic resync catches changes made on other devices.
//!
//! There is no merging: whoever wrote last wins, wholesale.
//!
//! Everything here is meant to run on one thread (a tokio `LocalSet`), so shared state lives in
//! `Rc`/`RefCell`. Never hold a borrow across an `.await`.

pub mod coordinator;
pub mod identity;
pub mod local_store;
pub mod remote;
pub mod timer;

pub use coordinator::{LocalHabit, Reconciled, SyncConfig, SyncCoordinator, SyncError};
pub use identity::{
    Identity, IdentityError, IdentityProvider, IdentitySession, SessionState, SignedOutProvider,
    StaticTokenProvider,
};
pub use local_store::{FileStore, KeyValueStore, LocalStore, MemoryStore, StoreError};
pub use remote::{HttpRemote, RemoteError, RemoteProfileStore};
