#![deny(clippy::string_slice)]

mod status;
pub mod utils;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use chrono::NaiveDate;
use habit_sync::{
    Identity, IdentityError, IdentityProvider, IdentitySession, LocalHabit, LocalStore,
    Reconciled, RemoteProfileStore, SyncConfig, SyncCoordinator, SyncError,
};
use habit_utils::{Frequency, HabitData, HabitEvent, PeriodKey, Profile, SubscriptionTier};

pub use status::{STATUS_TTL, StatusKind, StatusMessage};

pub const VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

/// Owns the one and only copy of the habit and everything that reads or writes it.
///
/// The view calls the event methods (`toggle_done`, `set_counter`, ...) and re-renders from
/// [`Tracker::view`]. Every event is saved locally before anything else happens; while signed in
/// it also arms the debounced push.
///
/// Cloning is cheap and gives another handle to the same tracker. It has to live on a tokio
/// `LocalSet`, since the sync timers are spawned as local tasks.
#[derive(Clone)]
pub struct Tracker {
    inner: Rc<Inner>,
}

struct Inner {
    // btw, we should never hold a borrow across an .await. by avoiding this, we guarantee the absence of "borrow while locked" panics
    habit: RefCell<LocalHabit>,
    store: LocalStore,
    session: IdentitySession,
    sync: SyncCoordinator,
    profile: RefCell<Option<Profile>>,
    status: RefCell<Option<StatusMessage>>,
    today: Box<dyn Fn() -> NaiveDate>,
}

/// Everything the view needs to render the widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerView {
    pub started_date: NaiveDate,
    pub frequency: Frequency,
    pub counter: u32,
    /// Upper bound for the counter input.
    pub max_counter: u32,
    pub percentage: u8,
    pub period: PeriodKey,
    pub done: bool,
    pub not_done: bool,
    /// Only present while the current period is marked not-done.
    pub reason: Option<String>,
    pub identity: Option<Identity>,
    pub subscription_tier: Option<SubscriptionTier>,
    pub show_upgrade: bool,
    pub status: Option<StatusMessage>,
    pub version: &'static str,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("habit", &self.inner.habit.borrow())
            .field("session", &self.inner.session)
            .field("sync", &self.inner.sync)
            .finish_non_exhaustive()
    }
}

impl Tracker {
    pub fn new(
        store: LocalStore,
        identity: Rc<dyn IdentityProvider>,
        remote: Rc<dyn RemoteProfileStore>,
        config: SyncConfig,
    ) -> Self {
        Self::with_clock(store, identity, remote, config, || {
            chrono::Local::now().date_naive()
        })
    }

    /// Like [`Tracker::new`], with a custom source for today's date.
    pub fn with_clock(
        store: LocalStore,
        identity: Rc<dyn IdentityProvider>,
        remote: Rc<dyn RemoteProfileStore>,
        config: SyncConfig,
        today: impl Fn() -> NaiveDate + 'static,
    ) -> Self {
        let data = load_or_fresh(&store, today());

        Self {
            inner: Rc::new(Inner {
                habit: RefCell::new(LocalHabit::new(data)),
                store,
                session: IdentitySession::new(identity),
                sync: SyncCoordinator::new(remote, config),
                profile: RefCell::new(None),
                status: RefCell::new(None),
                today: Box::new(today),
            }),
        }
    }

    fn from_weak(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    fn today(&self) -> NaiveDate {
        (self.inner.today)()
    }

    /// Picks up an existing login, if the identity provider remembers one.
    pub async fn start(&self) {
        if self.inner.session.is_signed_in() {
            self.on_signed_in().await;
        }
    }

    // =======
    // view events

    pub fn toggle_done(&self) {
        let period = self.current_period();
        self.dispatch(HabitEvent::ToggleComplete(period));
    }

    pub fn toggle_not_done(&self, reason: impl Into<String>) {
        let period = self.current_period();
        self.dispatch(HabitEvent::ToggleNotDone {
            period,
            reason: reason.into(),
        });
    }

    pub fn set_reason(&self, reason: impl Into<String>) {
        let period = self.current_period();
        self.dispatch(HabitEvent::SetReason {
            period,
            reason: reason.into(),
        });
    }

    pub fn set_frequency(&self, frequency: Frequency) {
        self.dispatch(HabitEvent::SetFrequency(frequency));
    }

    pub fn set_start_date(&self, date: NaiveDate) {
        self.dispatch(HabitEvent::SetStartDate(date));
    }

    pub fn set_counter(&self, value: i64) {
        self.dispatch(HabitEvent::SetCounter(value));
    }

    /// Applies `event`, saves the result, then (if signed in) arms the debounced push.
    pub fn dispatch(&self, event: HabitEvent) {
        let today = self.today();
        {
            let mut habit = self.inner.habit.borrow_mut();
            let next = habit.data.clone().apply(event, today);
            habit.edit(next);
            self.inner.store.save(&habit.data);
        }
        self.schedule_push();
    }

    // =======
    // sync

    fn schedule_push(&self) {
        if !self.inner.session.is_signed_in() {
            return;
        }
        let weak = Rc::downgrade(&self.inner);
        self.inner.sync.schedule_push(move || async move {
            if let Some(tracker) = Tracker::from_weak(&weak) {
                let _ = tracker.sync_now().await;
            }
        });
    }

    fn start_resync(&self) {
        let weak = Rc::downgrade(&self.inner);
        self.inner.sync.start_resync(move || {
            let weak = weak.clone();
            async move {
                if let Some(tracker) = Tracker::from_weak(&weak) {
                    let _ = tracker.sync_now().await;
                }
            }
        });
    }

    /// Reconciles with the server right away. Does nothing useful while signed out.
    ///
    /// The outcome is also reported through [`Tracker::status`].
    pub async fn sync_now(&self) -> Result<Reconciled, SyncError> {
        let inner = &self.inner;
        if !inner.session.is_signed_in() {
            return Err(IdentityError::SignedOut.into());
        }
        if inner.sync.is_in_flight() {
            // try again once the current round trip is done
            self.schedule_push();
            return Err(SyncError::InFlight);
        }

        self.set_status(StatusMessage::syncing());
        let token = match inner.session.credential().await {
            Ok(token) => token,
            Err(e) => {
                log::error!("Could not get a credential for sync: {e}");
                self.set_status(StatusMessage::error(format!("Sync failed: {e}")));
                return Err(e.into());
            }
        };

        let result = inner
            .sync
            .reconcile(&inner.habit, &inner.store, &token, self.today())
            .await;
        match &result {
            Ok(_) => self.set_status(StatusMessage::success("Synced successfully")),
            Err(SyncError::InFlight) => self.schedule_push(),
            Err(e) => self.set_status(StatusMessage::error(format!("Sync failed: {e}"))),
        }
        result
    }

    /// Cancels the pending push and syncs immediately, if signed in.
    pub async fn flush(&self) -> Option<Result<Reconciled, SyncError>> {
        if !self.inner.sync.has_pending_push() {
            return None;
        }
        self.inner.sync.cancel_push();
        Some(self.sync_now().await)
    }

    pub fn has_pending_push(&self) -> bool {
        self.inner.sync.has_pending_push()
    }

    // =======
    // identity

    pub async fn sign_in(&self) -> Result<Option<Identity>, IdentityError> {
        match self.inner.session.sign_in().await {
            Ok(Some(identity)) => {
                self.on_signed_in().await;
                Ok(Some(identity))
            }
            Ok(None) => {
                self.set_status(StatusMessage::info("Sign-in cancelled"));
                Ok(None)
            }
            Err(e) => {
                self.set_status(StatusMessage::error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn on_signed_in(&self) {
        self.refresh_profile().await;
        let _ = self.sync_now().await;
        self.start_resync();
    }

    /// Ends the session and goes back to local-only mode, re-reading the habit from the store.
    pub async fn sign_out(&self) -> Result<(), IdentityError> {
        let result = self
            .inner
            .session
            .sign_out()
            .await
            .inspect_err(|e| log::error!("Sign-out error: {e}"));
        self.inner.sync.stop();
        self.inner.profile.replace(None);
        self.reload_from_store();
        self.set_status(StatusMessage::info("Signed out"));
        result
    }

    /// Fetches the profile to learn the subscription tier. Failures are logged and otherwise
    /// ignored.
    pub async fn refresh_profile(&self) -> Option<Profile> {
        let token = self
            .inner
            .session
            .credential()
            .await
            .inspect_err(|e| log::warn!("Can't fetch profile: {e}"))
            .ok()?;
        let profile = self.inner.sync.fetch_profile(&token).await.ok()?;
        self.inner.profile.replace(Some(profile.clone()));
        Some(profile)
    }

    /// The cached profile, fetched first if signed in and nothing is cached yet.
    pub async fn ensure_profile(&self) -> Option<Profile> {
        if let Some(profile) = self.profile() {
            return Some(profile);
        }
        if !self.is_signed_in() {
            return None;
        }
        self.refresh_profile().await
    }

    /// Replaces the in-memory habit with whatever the store has (or a fresh one).
    pub fn reload_from_store(&self) {
        let data = load_or_fresh(&self.inner.store, self.today());
        self.inner.habit.borrow_mut().edit(data);
    }

    // =======
    // reading

    pub fn is_signed_in(&self) -> bool {
        self.inner.session.is_signed_in()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.inner.profile.borrow().clone()
    }

    pub fn habit(&self) -> HabitData {
        self.inner.habit.borrow().data.clone()
    }

    pub fn current_period(&self) -> PeriodKey {
        self.inner.habit.borrow().data.current_period(self.today())
    }

    /// The status message, if it should still be on screen.
    pub fn status(&self) -> Option<StatusMessage> {
        let now = tokio::time::Instant::now();
        self.inner
            .status
            .borrow()
            .as_ref()
            .filter(|status| status.is_visible(now))
            .cloned()
    }

    fn set_status(&self, status: StatusMessage) {
        log::debug!("Status: {}", status.text);
        self.inner.status.replace(Some(status));
    }

    pub fn view(&self) -> TrackerView {
        let today = self.today();
        let habit = self.inner.habit.borrow();
        let data = &habit.data;
        let period = data.current_period(today);
        let tier = self
            .inner
            .profile
            .borrow()
            .as_ref()
            .map(|profile| profile.subscription_tier);
        TrackerView {
            started_date: data.started_date,
            frequency: data.frequency,
            counter: data.counter,
            max_counter: data.total_periods(today),
            percentage: data.percentage(today),
            done: data.is_done(&period),
            not_done: data.is_not_done(&period),
            reason: data.reason(&period).map(str::to_string),
            period,
            identity: self.inner.session.identity(),
            subscription_tier: tier,
            show_upgrade: self.is_signed_in() && tier == Some(SubscriptionTier::Free),
            status: self.status(),
            version: VERSION,
        }
    }
}

fn load_or_fresh(store: &LocalStore, today: NaiveDate) -> HabitData {
    match store.load() {
        Some(mut data) => {
            data.repair(today);
            data
        }
        None => {
            log::info!("No saved habit found, starting fresh");
            HabitData::new(today)
        }
    }
}
