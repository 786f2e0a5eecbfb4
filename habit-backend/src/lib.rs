//! HTTP backend for the habit tracker: profiles plus last-write-wins storage of one habit per
//! user.
//!
//! Everything is kept in memory. Bearer tokens are HS256 JWTs whose `sub` is the user id.

use std::sync::Arc;

use axum::{
    Router,
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use chrono::{DateTime, FixedOffset, Utc};
use dashmap::{DashMap, mapref::entry::Entry};
use habit_utils::{
    HabitData, Profile, ProfileResponse, SubscriptionTier, SyncAction, SyncRequest, SyncResponse,
    SyncStatus,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};

pub const SERVICE_NAME: &str = "habit-backend";

pub fn version() -> String {
    format!("v{}", env!("CARGO_PKG_VERSION"))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // subject (user id)
    pub exp: usize,  // expiry
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredHabit {
    pub data: HabitData,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str),
    UpgradeRequired {
        required: SubscriptionTier,
        current: SubscriptionTier,
    },
    NotFound(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Unauthorized(message) => {
                (StatusCode::UNAUTHORIZED, json!({ "error": message }))
            }
            ApiError::UpgradeRequired { required, current } => (
                StatusCode::FORBIDDEN,
                json!({
                    "error": "Subscription upgrade required",
                    "required_tier": required,
                    "current_tier": current,
                }),
            ),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "error": message })),
        };
        (status, Json(body)).into_response()
    }
}

/// Fails with 403 unless `profile` is at least `required`.
pub fn require_tier(profile: &Profile, required: SubscriptionTier) -> Result<(), ApiError> {
    if profile.subscription_tier.includes(required) {
        Ok(())
    } else {
        Err(ApiError::UpgradeRequired {
            required,
            current: profile.subscription_tier,
        })
    }
}

pub struct AppState {
    decoding_key: DecodingKey,
    validation: Validation,
    profiles: DashMap<String, Profile>,
    habits: DashMap<String, StoredHabit>,
}

impl AppState {
    pub fn new(jwt_secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["authenticated"]);
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            validation,
            profiles: DashMap::new(),
            habits: DashMap::new(),
        }
    }

    pub fn verify_jwt(&self, token: &str) -> Result<Claims, ApiError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|token_data| token_data.claims)
            .map_err(|e| {
                log::debug!("Rejected token: {e}");
                ApiError::Unauthorized("Invalid or expired token")
            })
    }

    /// The user's profile, created as a free one on first access.
    pub fn profile(&self, user_id: &str) -> Profile {
        self.profiles
            .entry(user_id.to_string())
            .or_insert_with(|| {
                log::info!("Creating default profile for {user_id}");
                Profile::new_free(Utc::now())
            })
            .clone()
    }

    pub fn set_subscription_tier(&self, user_id: &str, tier: SubscriptionTier) {
        let mut profile = self
            .profiles
            .entry(user_id.to_string())
            .or_insert_with(|| Profile::new_free(Utc::now()));
        profile.subscription_tier = tier;
    }

    pub fn stored_habit(&self, user_id: &str) -> Option<StoredHabit> {
        self.habits.get(user_id).map(|stored| stored.clone())
    }

    /// Last write wins. The server copy is only sent back when it changed after the client's
    /// last sync; otherwise the client's copy replaces it.
    pub fn sync_habit(
        &self,
        user_id: &str,
        request: SyncRequest,
        now: DateTime<Utc>,
    ) -> SyncResponse {
        let last_sync = match request
            .last_sync
            .as_deref()
            .map(DateTime::<FixedOffset>::parse_from_rfc3339)
        {
            None => None,
            Some(Ok(time)) => Some(time.with_timezone(&Utc)),
            Some(Err(e)) => {
                log::warn!("Bad lastSync from {user_id}: {e}");
                return SyncResponse::error(format!("Invalid lastSync timestamp: {e}"));
            }
        };

        match self.habits.entry(user_id.to_string()) {
            Entry::Vacant(entry) => {
                entry.insert(StoredHabit {
                    data: request.habit_data.clone(),
                    last_updated: now,
                });
                SyncResponse::success(SyncAction::LocalToServer, Some(request.habit_data))
            }
            Entry::Occupied(mut entry) => {
                let stored = entry.get();
                if stored.data == request.habit_data {
                    return SyncResponse::success(SyncAction::NoChange, None);
                }
                if last_sync.is_some_and(|last_sync| stored.last_updated > last_sync) {
                    log::info!("Server copy for {user_id} is newer, sending it back");
                    return SyncResponse::success(
                        SyncAction::ServerToLocal,
                        Some(stored.data.clone()),
                    );
                }
                entry.insert(StoredHabit {
                    data: request.habit_data.clone(),
                    last_updated: now,
                });
                SyncResponse::success(SyncAction::LocalToServer, Some(request.habit_data))
            }
        }
    }
}

type BearerHeader = Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>;

fn authenticate(state: &AppState, auth: BearerHeader) -> Result<String, ApiError> {
    let TypedHeader(auth) =
        auth.map_err(|_| ApiError::Unauthorized("Missing or invalid authorization header"))?;
    Ok(state.verify_jwt(auth.token())?.sub)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": version(),
    }))
}

async fn api_version() -> Json<serde_json::Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": version(),
    }))
}

async fn get_profile(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
) -> Result<Json<ProfileResponse>, ApiError> {
    let user_id = authenticate(&state, auth)?;
    Ok(Json(ProfileResponse {
        profile: state.profile(&user_id),
    }))
}

async fn sync(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
    Json(request): Json<SyncRequest>,
) -> Result<(StatusCode, Json<SyncResponse>), ApiError> {
    let user_id = authenticate(&state, auth)?;
    let response = state.sync_habit(&user_id, request, Utc::now());
    let status = match response.status {
        SyncStatus::Success => StatusCode::OK,
        SyncStatus::Error => StatusCode::BAD_REQUEST,
    };
    Ok((status, Json(response)))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HabitExport {
    pub habit_data: HabitData,
    pub last_updated: DateTime<Utc>,
}

/// Premium only: the stored copy along with when it was last written.
async fn export_habit(
    State(state): State<Arc<AppState>>,
    auth: BearerHeader,
) -> Result<Json<HabitExport>, ApiError> {
    let user_id = authenticate(&state, auth)?;
    require_tier(&state.profile(&user_id), SubscriptionTier::Premium)?;
    let stored = state
        .stored_habit(&user_id)
        .ok_or(ApiError::NotFound("No habit stored yet"))?;
    Ok(Json(HabitExport {
        habit_data: stored.data,
        last_updated: stored.last_updated,
    }))
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/version", get(api_version))
        .route("/api/profile", get(get_profile))
        .route("/api/sync", post(sync))
        .route("/api/habit", get(export_habit))
        .layer(CompressionLayer::new())
        .layer(cors)
        .with_state(state)
}
