//! Last-write-wins reconciliation between the local habit and the remote profile.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use chrono::{NaiveDate, SecondsFormat, Utc};
use habit_utils::{HabitData, Profile, SyncOutcome, SyncRequest};

use crate::identity::IdentityError;
use crate::local_store::LocalStore;
use crate::remote::{RemoteError, RemoteProfileStore};
use crate::timer::{Debouncer, Repeating};

const DEFAULT_API_URL: &str = if cfg!(feature = "local-backend") {
    "http://localhost:8080"
} else {
    "https://habits.fly.dev"
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub base_url: String,
    /// Quiet period after the last local edit before pushing.
    pub debounce: Duration,
    pub resync_interval: Duration,
    pub request_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            debounce: Duration::from_secs(1),
            resync_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl SyncConfig {
    /// Defaults, with the base URL overridable through `HABIT_API_URL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("HABIT_API_URL") {
            config.base_url = url;
        }
        config
    }
}

/// The local copy of the habit plus a revision that increases with every local edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHabit {
    pub data: HabitData,
    pub revision: u64,
}

impl LocalHabit {
    pub fn new(data: HabitData) -> Self {
        Self { data, revision: 0 }
    }

    /// Replaces the data as the result of a local edit.
    pub fn edit(&mut self, data: HabitData) {
        self.data = data;
        self.revision += 1;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("A sync is already in progress")]
    InFlight,
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

/// What a successful reconcile did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    NoChange,
    /// The server took the local copy.
    Pushed,
    /// The server copy replaced the local one.
    Pulled,
    /// The server copy was newer, but the user edited locally while the request was in flight,
    /// so the local edits were kept.
    PullDropped,
}

pub struct SyncCoordinator {
    remote: Rc<dyn RemoteProfileStore>,
    config: SyncConfig,
    debouncer: Debouncer,
    resync: RefCell<Option<Repeating>>,
    in_flight: Cell<bool>,
}

impl std::fmt::Debug for SyncCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncCoordinator")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight.get())
            .finish_non_exhaustive()
    }
}

// Clears the in-flight flag even if the reconcile future is dropped halfway.
struct InFlightGuard<'a>(&'a Cell<bool>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl SyncCoordinator {
    pub fn new(remote: Rc<dyn RemoteProfileStore>, config: SyncConfig) -> Self {
        let debouncer = Debouncer::new(config.debounce);
        Self {
            remote,
            config,
            debouncer,
            resync: RefCell::new(None),
            in_flight: Cell::new(false),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.get()
    }

    pub async fn fetch_profile(&self, token: &str) -> Result<Profile, SyncError> {
        Ok(self
            .remote
            .fetch_profile(token)
            .await
            .inspect_err(|e| log::error!("Error getting user profile: {e}"))?)
    }

    /// Sends the local snapshot and the last sync time; the server decides which side wins.
    ///
    /// On `server_to_local` the local habit and the store are overwritten, unless the habit was
    /// edited while the request was in flight. On any success the last sync time becomes now.
    /// Errors leave local state alone. Only one reconcile runs at a time; overlapping calls fail
    /// with [`SyncError::InFlight`]. A pulled copy is repaired as of `today` before it is taken.
    ///
    /// No borrow of `habit` is held across the request.
    pub async fn reconcile(
        &self,
        habit: &RefCell<LocalHabit>,
        store: &LocalStore,
        token: &str,
        today: NaiveDate,
    ) -> Result<Reconciled, SyncError> {
        if self.in_flight.replace(true) {
            return Err(SyncError::InFlight);
        }
        let _guard = InFlightGuard(&self.in_flight);

        let (request, sent_revision) = {
            let habit = habit.borrow();
            let request = SyncRequest {
                habit_data: habit.data.clone(),
                last_sync: store
                    .load_last_sync()
                    .map(|time| time.to_rfc3339_opts(SecondsFormat::Millis, true)),
            };
            (request, habit.revision)
        };

        let response = self
            .remote
            .sync(token, &request)
            .await
            .inspect_err(|e| log::error!("Sync error: {e}"))?;
        let outcome = response
            .into_outcome()
            .map_err(RemoteError::from)
            .inspect_err(|e| log::error!("Sync failed: {e}"))?;

        let reconciled = match outcome {
            SyncOutcome::NoChange => Reconciled::NoChange,
            SyncOutcome::LocalToServer => Reconciled::Pushed,
            SyncOutcome::ServerToLocal(mut data) => {
                data.repair(today);
                let mut habit = habit.borrow_mut();
                if habit.revision == sent_revision {
                    store.save(&data);
                    habit.data = data;
                    Reconciled::Pulled
                } else {
                    log::warn!(
                        "Dropping server copy: local revision moved from {sent_revision} to {} during sync",
                        habit.revision
                    );
                    Reconciled::PullDropped
                }
            }
        };

        store.save_last_sync(Utc::now());
        log::info!("Sync complete: {reconciled:?}");
        Ok(reconciled)
    }

    /// (Re)arms the push timer. Bursts of edits collapse into one `task` run after the quiet
    /// period.
    pub fn schedule_push<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.debouncer.schedule(task);
    }

    pub fn has_pending_push(&self) -> bool {
        self.debouncer.is_pending()
    }

    pub fn cancel_push(&self) {
        self.debouncer.cancel();
    }

    /// Starts the periodic resync, replacing any previous one.
    pub fn start_resync<F, Fut>(&self, task: F)
    where
        F: FnMut() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let repeating = Repeating::start(self.config.resync_interval, task);
        self.resync.replace(Some(repeating));
    }

    pub fn is_resyncing(&self) -> bool {
        self.resync.borrow().is_some()
    }

    /// Stops both timers. Work that is already running finishes on its own.
    pub fn stop(&self) {
        self.debouncer.cancel();
        self.resync.replace(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_store::MemoryStore;
    use futures::FutureExt as _;
    use futures::future::LocalBoxFuture;
    use habit_utils::{PeriodKey, SyncAction, SyncResponse};

    /// Answers every sync with a fixed response and records what it was sent.
    struct ScriptedRemote {
        response: RefCell<Result<SyncResponse, u16>>,
        requests: RefCell<Vec<SyncRequest>>,
        // runs between receiving the request and answering it
        during_request: RefCell<Option<Box<dyn FnOnce()>>>,
    }

    impl ScriptedRemote {
        fn answering(response: SyncResponse) -> Rc<Self> {
            Rc::new(Self {
                response: RefCell::new(Ok(response)),
                requests: RefCell::new(Vec::new()),
                during_request: RefCell::new(None),
            })
        }

        fn failing(status: u16) -> Rc<Self> {
            Rc::new(Self {
                response: RefCell::new(Err(status)),
                requests: RefCell::new(Vec::new()),
                during_request: RefCell::new(None),
            })
        }
    }

    impl RemoteProfileStore for ScriptedRemote {
        fn fetch_profile<'a>(
            &'a self,
            _token: &'a str,
        ) -> LocalBoxFuture<'a, Result<Profile, RemoteError>> {
            futures::future::ready(Ok(Profile::new_free(Utc::now()))).boxed_local()
        }

        fn sync<'a>(
            &'a self,
            _token: &'a str,
            request: &'a SyncRequest,
        ) -> LocalBoxFuture<'a, Result<SyncResponse, RemoteError>> {
            async move {
                self.requests.borrow_mut().push(request.clone());
                tokio::task::yield_now().await;
                if let Some(hook) = self.during_request.borrow_mut().take() {
                    hook();
                }
                self.response.borrow().clone().map_err(RemoteError::Status)
            }
            .boxed_local()
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 14).unwrap()
    }

    fn remote_copy() -> HabitData {
        let mut data = HabitData::new(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        data.counter = 5;
        data.completed_dates.insert(PeriodKey::from("2024-03-01"));
        data
    }

    fn coordinator(remote: Rc<ScriptedRemote>) -> SyncCoordinator {
        SyncCoordinator::new(remote, SyncConfig::default())
    }

    #[tokio::test]
    async fn test_server_to_local_overwrites_state_and_store() {
        let remote = ScriptedRemote::answering(SyncResponse::success(
            SyncAction::ServerToLocal,
            Some(remote_copy()),
        ));
        let sync = coordinator(Rc::clone(&remote));
        let store = LocalStore::new(MemoryStore::new());
        let habit = RefCell::new(LocalHabit::new(HabitData::new(today())));
        let before = Utc::now();

        let result = sync.reconcile(&habit, &store, "token", today()).await.unwrap();

        assert_eq!(result, Reconciled::Pulled);
        assert_eq!(habit.borrow().data.counter, 5);
        assert_eq!(store.load().unwrap().counter, 5);
        let last_sync = store.load_last_sync().unwrap();
        assert!(last_sync >= before - chrono::Duration::milliseconds(1));
        assert!(!sync.is_in_flight());
    }

    #[tokio::test]
    async fn test_pulled_copy_is_repaired() {
        let mut broken = remote_copy();
        broken.counter = 500;
        broken.not_done_dates.insert(PeriodKey::from("2024-03-01"));
        let remote = ScriptedRemote::answering(SyncResponse::success(
            SyncAction::ServerToLocal,
            Some(broken),
        ));
        let sync = coordinator(remote);
        let store = LocalStore::new(MemoryStore::new());
        let habit = RefCell::new(LocalHabit::new(HabitData::new(today())));

        let result = sync.reconcile(&habit, &store, "token", today()).await.unwrap();

        assert_eq!(result, Reconciled::Pulled);
        let data = habit.borrow().data.clone();
        // started 2024-02-01, so 43 days including today
        assert_eq!(data.counter, 43);
        assert!(data.completed_dates.is_disjoint(&data.not_done_dates));
        assert_eq!(store.load(), Some(data));
    }

    #[tokio::test]
    async fn test_push_sends_snapshot_and_last_sync() {
        let remote = ScriptedRemote::answering(SyncResponse::success(
            SyncAction::LocalToServer,
            None,
        ));
        let sync = coordinator(Rc::clone(&remote));
        let store = LocalStore::new(MemoryStore::new());
        let habit = RefCell::new(LocalHabit::new(HabitData::new(today())));

        assert_eq!(
            sync.reconcile(&habit, &store, "token", today()).await.unwrap(),
            Reconciled::Pushed
        );
        assert_eq!(
            sync.reconcile(&habit, &store, "token", today()).await.unwrap(),
            Reconciled::Pushed
        );

        let requests = remote.requests.borrow();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].last_sync, None);
        assert_eq!(requests[0].habit_data, habit.borrow().data);
        let second = requests[1].last_sync.as_deref().unwrap();
        assert!(second.ends_with('Z'), "{second}");
        // a push never touches the local copy
        assert_eq!(habit.borrow().data, HabitData::new(today()));
    }

    #[tokio::test]
    async fn test_failure_leaves_local_state_alone() {
        let remote = ScriptedRemote::failing(500);
        let sync = coordinator(Rc::clone(&remote));
        let store = LocalStore::new(MemoryStore::new());
        let habit = RefCell::new(LocalHabit::new(HabitData::new(today())));

        let result = sync.reconcile(&habit, &store, "token", today()).await;
        assert!(matches!(
            result,
            Err(SyncError::Remote(RemoteError::Status(500)))
        ));
        assert_eq!(habit.borrow().data, HabitData::new(today()));
        assert_eq!(store.load_last_sync(), None);
        assert!(!sync.is_in_flight());
    }

    #[tokio::test]
    async fn test_error_status_is_a_failure() {
        let remote = ScriptedRemote::answering(SyncResponse::error("firestore unavailable"));
        let sync = coordinator(remote);
        let store = LocalStore::new(MemoryStore::new());
        let habit = RefCell::new(LocalHabit::new(HabitData::new(today())));

        let result = sync.reconcile(&habit, &store, "token", today()).await;
        assert!(matches!(
            result,
            Err(SyncError::Remote(RemoteError::Rejected(_)))
        ));
        assert_eq!(store.load_last_sync(), None);
    }

    #[tokio::test]
    async fn test_edit_during_request_drops_server_copy() {
        let remote = ScriptedRemote::answering(SyncResponse::success(
            SyncAction::ServerToLocal,
            Some(remote_copy()),
        ));
        let sync = coordinator(Rc::clone(&remote));
        let store = LocalStore::new(MemoryStore::new());
        let habit = Rc::new(RefCell::new(LocalHabit::new(HabitData::new(today()))));

        let edited = {
            let habit = Rc::clone(&habit);
            move || {
                let mut habit = habit.borrow_mut();
                let data = habit
                    .data
                    .clone()
                    .apply(habit_utils::HabitEvent::SetCounter(1), today());
                habit.edit(data);
            }
        };
        remote.during_request.replace(Some(Box::new(edited)));

        let result = sync.reconcile(&habit, &store, "token", today()).await.unwrap();

        assert_eq!(result, Reconciled::PullDropped);
        assert_eq!(habit.borrow().data.counter, 1);
        assert_eq!(store.load(), None);
        // the sync itself succeeded, so the next push will win
        assert!(store.load_last_sync().is_some());
    }

    #[tokio::test]
    async fn test_overlapping_reconcile_is_refused() {
        let remote = ScriptedRemote::answering(SyncResponse::success(SyncAction::NoChange, None));
        let sync = coordinator(remote);
        let store = LocalStore::new(MemoryStore::new());
        let habit = RefCell::new(LocalHabit::new(HabitData::new(today())));

        let (first, second) = futures::join!(
            sync.reconcile(&habit, &store, "token", today()),
            sync.reconcile(&habit, &store, "token", today()),
        );
        assert_eq!(first.unwrap(), Reconciled::NoChange);
        assert!(matches!(second, Err(SyncError::InFlight)));
        assert!(!sync.is_in_flight());
    }
}
