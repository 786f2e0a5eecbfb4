use std::rc::Rc;
use std::sync::LazyLock;

use habit_sync::{Identity, IdentityProvider, SignedOutProvider, StaticTokenProvider};

// putting this inside LOGGER prevents us from accidentally initializing the logger more than once
static LOGGER: LazyLock<()> = LazyLock::new(|| {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    log::debug!("Logger initialized");
});

pub fn init_logger() {
    LazyLock::force(&LOGGER);
}

/// Reads a remembered login from `HABIT_USER_ID` / `HABIT_TOKEN` (and optionally `HABIT_EMAIL`).
///
/// Without both variables the tracker runs local-only.
pub fn identity_from_env() -> Rc<dyn IdentityProvider> {
    identity_from_vars(|name| std::env::var(name).ok())
}

fn identity_from_vars(var: impl Fn(&str) -> Option<String>) -> Rc<dyn IdentityProvider> {
    let user_id = var("HABIT_USER_ID").filter(|value| !value.is_empty());
    let token = var("HABIT_TOKEN").filter(|value| !value.is_empty());
    match (user_id, token) {
        (Some(user_id), Some(token)) => {
            let identity = Identity {
                user_id,
                email: var("HABIT_EMAIL"),
            };
            Rc::new(StaticTokenProvider::signed_in(identity, token))
        }
        _ => {
            log::info!("HABIT_USER_ID or HABIT_TOKEN not set, running local-only");
            Rc::new(SignedOutProvider)
        }
    }
}
