pub mod habit;
pub mod period;
pub mod profile;

pub use habit::{HabitData, HabitEvent};
pub use period::{Frequency, PeriodKey, current_period_key, percentage, total_periods};
pub use profile::{
    Profile, ProfileResponse, SubscriptionTier, SyncAction, SyncOutcome, SyncRequest,
    SyncResponse, SyncResponseError, SyncStatus,
};
