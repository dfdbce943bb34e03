//! HTTP routes for sign-in and the account paywall.

use crate::config::SessionConfig;
use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::{Path, RawQuery, State};
use axum::http::StatusCode;
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::{Json, Router};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use buffett_identity_oauth2::UserProfile;
use buffett_identity_session::{AuthState, CallbackParams, SignInError};
use buffett_paywall::{Feature, SubscriptionStatus, SubscriptionTier, UsageSummary};
use buffett_valuation::{AnalysisInput, MaintenanceMethod, analyze};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub const SESSION_COOKIE: &str = "buffett_session";

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/auth/login", get(login))
        .route("/auth/callback", get(callback))
        .route("/auth/logout", post(logout))
        .route("/auth/me", get(me))
        .route(
            "/account/subscription",
            get(subscription).put(change_subscription),
        )
        .route("/account/usage", get(usage))
        .route("/account/analyses", post(record_analysis))
        .route("/account/valuations", post(run_valuation))
        .route("/account/ai-queries", post(record_ai_query))
        .route("/account/features/{feature}", get(feature_access))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn session_id(jar: &CookieJar) -> Option<String> {
    jar.get(SESSION_COOKIE).map(|c| c.value().to_string())
}

fn session_cookie(id: &str, config: &SessionConfig) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id.to_string()))
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .path("/")
        .build()
}

/// Paywall accounts are keyed by email, falling back to the subject id.
fn account_key(profile: &UserProfile) -> &str {
    profile.email.as_deref().unwrap_or(&profile.sub)
}

async fn signed_in(state: &AppState, jar: &CookieJar) -> Result<UserProfile, ApiError> {
    let id = session_id(jar).ok_or(ApiError::Unauthorized)?;
    let session = state.sessions.get(&id).await.ok_or(ApiError::Unauthorized)?;
    session.current_user().cloned().ok_or(ApiError::Unauthorized)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(CookieJar, Redirect), ApiError> {
    let mut session = state
        .sessions
        .get_or_create(session_id(&jar).as_deref())
        .await;
    let link = session
        .begin_sign_in(&state.authenticator)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let jar = jar.add(session_cookie(session.id(), &state.session_config));
    state.sessions.save(session).await;

    Ok((jar, Redirect::to(&link.url)))
}

async fn callback(
    State(state): State<AppState>,
    jar: CookieJar,
    RawQuery(query): RawQuery,
) -> Result<(CookieJar, Redirect), ApiError> {
    let mut params = CallbackParams::from_query(query.as_deref().unwrap_or_default());
    if !params.has_callback() {
        return Err(SignInError::NoCallback.into());
    }

    let mut session = state
        .sessions
        .get_or_create(session_id(&jar).as_deref())
        .await;
    let before = session.clone();
    let result = match session
        .complete_sign_in(&state.authenticator, &mut params)
        .await
    {
        Ok(profile) => match state
            .quotas
            .ensure_account(account_key(&profile), profile.name.as_deref(), Utc::now())
            .await
        {
            Ok(_) => Ok(profile),
            Err(e) => {
                // No paywall account, no sign-in.
                session = before;
                session.abandon_pending();
                Err(ApiError::from(e))
            }
        },
        Err(e) => Err(ApiError::from(e)),
    };
    let jar = jar.add(session_cookie(session.id(), &state.session_config));
    state.sessions.save(session).await;

    result.inspect_err(|e| warn!("Sign-in failed: {}", e))?;

    let remaining = params.to_query_string();
    let target = if remaining.is_empty() {
        "/".to_string()
    } else {
        format!("/?{remaining}")
    };
    Ok((jar, Redirect::to(&target)))
}

async fn logout(State(state): State<AppState>, jar: CookieJar) -> (CookieJar, StatusCode) {
    if let Some(id) = session_id(&jar) {
        if let Some(mut session) = state.sessions.get(&id).await {
            session.logout(&mut CallbackParams::new());
        }
        state.sessions.invalidate(&id).await;
    }
    let jar = jar.remove(Cookie::build(SESSION_COOKIE).path("/"));
    (jar, StatusCode::NO_CONTENT)
}

async fn me(State(state): State<AppState>, jar: CookieJar) -> Result<Json<Value>, ApiError> {
    let id = session_id(&jar).ok_or(ApiError::Unauthorized)?;
    let session = state.sessions.get(&id).await.ok_or(ApiError::Unauthorized)?;

    match session.state() {
        AuthState::Authenticated {
            profile,
            signed_in_at,
            ..
        } => Ok(Json(json!({
            "user": profile,
            "signed_in_at": signed_in_at,
        }))),
        _ => Err(ApiError::Unauthorized),
    }
}

async fn subscription(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<SubscriptionStatus>, ApiError> {
    let user = signed_in(&state, &jar).await?;
    let status = state
        .quotas
        .subscription_status(account_key(&user), Utc::now())
        .await?;
    Ok(Json(status))
}

#[derive(Debug, Deserialize)]
struct SubscriptionChange {
    tier: SubscriptionTier,
}

async fn change_subscription(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(change): Json<SubscriptionChange>,
) -> Result<Json<SubscriptionStatus>, ApiError> {
    let user = signed_in(&state, &jar).await?;
    if !state.paywall_config.demo_upgrades {
        return Err(ApiError::Forbidden(
            "Plan changes are not available without checkout".to_string(),
        ));
    }

    let now = Utc::now();
    let key = account_key(&user);
    let subscription_id =
        (change.tier != SubscriptionTier::Free).then(|| format!("demo_{}", change.tier));
    state
        .quotas
        .set_subscription(
            key,
            change.tier,
            subscription_id,
            state.paywall_config.subscription_days,
            now,
        )
        .await?;
    info!("Demo plan change for {}: {}", key, change.tier);

    let status = state.quotas.subscription_status(key, now).await?;
    Ok(Json(status))
}

async fn usage(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Json<UsageSummary>, ApiError> {
    let user = signed_in(&state, &jar).await?;
    let summary = state
        .quotas
        .usage_summary(account_key(&user), Utc::now())
        .await?;
    Ok(Json(summary))
}

#[derive(Debug, Deserialize)]
struct AnalysisRequest {
    ticker: String,
    #[serde(default)]
    buffett_score: f64,
    #[serde(default)]
    owner_earnings: f64,
}

async fn record_analysis(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let user = signed_in(&state, &jar).await?;
    let ticker = request.ticker.trim().to_ascii_uppercase();
    if ticker.is_empty() {
        return Err(ApiError::BadRequest("ticker is required".to_string()));
    }

    let now = Utc::now();
    let key = account_key(&user);
    let tier = state.quotas.subscription_status(key, now).await?.tier;

    let access = state.gates.check_ticker_access(&ticker, tier);
    if !access.allowed {
        return Err(ApiError::UpgradeRequired {
            message: format!("{ticker} requires a Premium subscription"),
            required_tier: access.required_tier,
        });
    }

    let quota = state
        .quotas
        .try_consume_analysis(key, &ticker, request.buffett_score, request.owner_earnings, now)
        .await?;
    if !quota.allowed {
        return Err(ApiError::QuotaExceeded {
            message: "Weekly analysis limit reached".to_string(),
            quota,
        });
    }

    Ok((
        StatusCode::CREATED,
        Json(json!({ "ticker": ticker, "quota": quota })),
    ))
}

#[derive(Debug, Deserialize)]
struct ValuationRequest {
    ticker: String,
    #[serde(flatten)]
    input: AnalysisInput,
}

/// Paid features an analysis request asks for.
fn requested_features(input: &AnalysisInput) -> Vec<Feature> {
    let mut features = Vec::new();
    if input.maintenance_method == MaintenanceMethod::Greenwald {
        features.push(Feature::GreenwaldMethod);
    }
    if !input.investees.is_empty() {
        features.push(Feature::LookThroughEarnings);
    }
    if !input.prices.is_empty() {
        features.push(Feature::AdvancedRiskMetrics);
    }
    if input.sentiment.is_some() {
        features.push(Feature::ContrarianOverlay);
    }
    features
}

async fn run_valuation(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(request): Json<ValuationRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let user = signed_in(&state, &jar).await?;
    let ticker = request.ticker.trim().to_ascii_uppercase();
    if ticker.is_empty() {
        return Err(ApiError::BadRequest("ticker is required".to_string()));
    }

    let now = Utc::now();
    let key = account_key(&user);
    let tier = state.quotas.subscription_status(key, now).await?.tier;

    let access = state.gates.check_ticker_access(&ticker, tier);
    if !access.allowed {
        return Err(ApiError::UpgradeRequired {
            message: format!("{ticker} requires a Premium subscription"),
            required_tier: access.required_tier,
        });
    }
    if !state
        .gates
        .check_circle_of_competence(&request.input.competence.whitelist, tier)
    {
        return Err(ApiError::UpgradeRequired {
            message: "A wider circle of competence requires a Premium subscription".to_string(),
            required_tier: SubscriptionTier::Premium,
        });
    }
    if let Some((feature, decision)) = state
        .gates
        .first_denied(requested_features(&request.input), tier)
    {
        return Err(ApiError::UpgradeRequired {
            message: format!("{feature} requires a {} subscription", decision.required_tier),
            required_tier: decision.required_tier,
        });
    }

    let report = analyze(&request.input)?;

    let quota = state
        .quotas
        .try_consume_analysis(key, &ticker, report.buffett_score, report.owner_earnings, now)
        .await?;
    if !quota.allowed {
        return Err(ApiError::QuotaExceeded {
            message: "Weekly analysis limit reached".to_string(),
            quota,
        });
    }
    info!(
        "Valuation of {} for {}: score {:.1}",
        ticker, key, report.buffett_score
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({ "ticker": ticker, "report": report, "quota": quota })),
    ))
}

async fn record_ai_query(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let user = signed_in(&state, &jar).await?;
    let now = Utc::now();
    let key = account_key(&user);
    let tier = state.quotas.subscription_status(key, now).await?.tier;

    let quota = state.quotas.try_consume_ai_query(key, now).await?;
    if !quota.allowed {
        return Err(if tier.is_premium() {
            ApiError::QuotaExceeded {
                message: "Daily AI query limit reached".to_string(),
                quota,
            }
        } else {
            ApiError::UpgradeRequired {
                message: "AI analysis requires a Premium subscription".to_string(),
                required_tier: SubscriptionTier::Premium,
            }
        });
    }

    Ok((StatusCode::CREATED, Json(json!({ "quota": quota }))))
}

async fn feature_access(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(feature): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = signed_in(&state, &jar).await?;
    let feature: Feature = feature.parse()?;
    let tier = state
        .quotas
        .subscription_status(account_key(&user), Utc::now())
        .await?
        .tier;

    let decision = state.gates.check_feature(feature, tier);
    Ok(Json(json!({
        "feature": feature,
        "allowed": decision.allowed,
        "required_tier": decision.required_tier,
        "tier": tier,
    })))
}
