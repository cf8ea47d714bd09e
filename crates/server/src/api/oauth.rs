//! Browser-facing login flow (/api/oauth/*).

use crate::AppResources;
use crate::api::auth::AuthError;
use axum::{
    Extension, Json,
    extract::{Path, Query},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::{Deserialize, Serialize};
use url::{Url, form_urlencoded};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const OAUTH_TAG: &str = "OAuth Login";

pub fn router() -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(debug_token))
        .routes(routes!(login))
        .routes(routes!(callback))
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LoginQuery {
    /// URL the browser is sent to once login completes
    c: Option<String>,
    /// Frontend path forwarded to the target as its `r` parameter
    r: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginMessage {
    pub message: String,
}

/// Append `pairs` to `target`, keeping any query and fragment it already has.
///
/// Targets that are not absolute URLs get the query spliced in before any `#`.
fn with_query<'a>(target: &str, pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> String {
    if let Ok(mut url) = Url::parse(target) {
        url.query_pairs_mut().extend_pairs(pairs);
        return url.into();
    }

    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish();
    let (base, fragment) = match target.split_once('#') {
        Some((base, fragment)) => (base, Some(fragment)),
        None => (target, None),
    };
    let separator = match base.find('?') {
        Some(at) if at + 1 == base.len() => "",
        Some(_) => "&",
        None => "?",
    };
    match fragment {
        Some(fragment) => format!("{base}{separator}{query}#{fragment}"),
        None => format!("{base}{separator}{query}"),
    }
}

#[tracing::instrument(skip(resources, query))]
#[utoipa::path(
    get,
    path = "/{provider}",
    tag = OAUTH_TAG,
    operation_id = "Start Login",
    summary = "Redirect to the identity provider",
    description = "Sends the browser to the provider's authorization page. The post-login target \
                   (`c`, defaulting to the debug landing page) and the optional frontend redirect \
                   (`r`) travel through the provider as the OAuth state.",
    params(
        ("provider" = String, Path, description = "Identity provider name", example = "google"),
        LoginQuery
    ),
    responses(
        (status = 307, description = "Redirect to the provider's authorization URL"),
        (status = 400, description = "Unknown provider", body = AuthError)
    )
)]
async fn login(
    Extension(resources): Extension<AppResources>,
    Path(provider): Path<String>,
    Query(query): Query<LoginQuery>,
) -> Result<Redirect, AuthError> {
    let url = resources
        .sessions
        .login_redirect(&provider, query.c.as_deref(), query.r.as_deref())
        .map_err(|e| {
            tracing::warn!(provider = %provider, error = %e, "Login requested for unknown provider");
            AuthError::unsupported_provider(&provider)
        })?;
    Ok(Redirect::temporary(url.as_str()))
}

#[tracing::instrument(skip(resources, query), fields(has_code = query.code.is_some()))]
#[utoipa::path(
    get,
    path = "/{provider}/callback",
    tag = OAUTH_TAG,
    operation_id = "Login Callback",
    summary = "Complete login and hand out credentials",
    description = "Exchanges the authorization code, resolves the user by email and redirects to the \
                   target carried in `state` with `access_token` and `refresh_token` appended.\n\n\
                   On failure the redirect carries an `error` parameter instead: the provider's own \
                   error, `missing_code`, `exchange_failed`, `identity_fetch_failed` or `server_error`.",
    params(
        ("provider" = String, Path, description = "Identity provider name", example = "google"),
        CallbackQuery
    ),
    responses(
        (status = 307, description = "Redirect to the login target"),
        (status = 400, description = "Unknown provider", body = AuthError)
    )
)]
async fn callback(
    Extension(resources): Extension<AppResources>,
    Path(provider): Path<String>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let sessions = &resources.sessions;
    if !sessions.has_provider(&provider) {
        tracing::warn!(provider = %provider, "Callback for unknown provider");
        return AuthError::unsupported_provider(&provider).into_response();
    }

    let target = sessions.callback_target(query.state.as_deref());
    match sessions
        .complete_login(&provider, query.code.as_deref(), query.error.as_deref())
        .await
    {
        Ok(tokens) => {
            let refresh_token = tokens.refresh_token.to_string();
            let location = with_query(
                &target,
                [
                    ("access_token", tokens.access_token.as_str()),
                    ("refresh_token", refresh_token.as_str()),
                ],
            );
            Redirect::temporary(&location).into_response()
        }
        Err(failure) => {
            let code = failure.reason.redirect_error();
            Redirect::temporary(&with_query(&target, [("error", code.as_str())])).into_response()
        }
    }
}

#[tracing::instrument]
#[utoipa::path(
    get,
    path = "/debug/token",
    tag = OAUTH_TAG,
    operation_id = "Login Landing",
    summary = "Default post-login landing page",
    description = "Where the browser ends up after a login that named no target. The credentials are \
                   in this request's query string.",
    responses(
        (status = 201, description = "Login completed", body = LoginMessage,
         example = json!({"message": "Login successful"}))
    )
)]
async fn debug_token() -> (StatusCode, Json<LoginMessage>) {
    (
        StatusCode::CREATED,
        Json(LoginMessage {
            message: "Login successful".to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_is_appended_with_the_right_separator() {
        assert_eq!(
            with_query("https://app.example.com/cb", [("error", "missing_code")]),
            "https://app.example.com/cb?error=missing_code"
        );
        assert_eq!(
            with_query("https://app.example.com/cb?r=/home", [("a", "1"), ("b", "x y")]),
            "https://app.example.com/cb?r=/home&a=1&b=x+y"
        );
    }

    #[test]
    fn query_goes_before_the_fragment() {
        assert_eq!(
            with_query("https://app.example.com/cb#section", [("error", "x")]),
            "https://app.example.com/cb?error=x#section"
        );
        assert_eq!(
            with_query("https://app.example.com/#/done?tab=1", [("a", "1")]),
            "https://app.example.com/?a=1#/done?tab=1"
        );
    }

    #[test]
    fn relative_targets_fall_back_to_splicing() {
        assert_eq!(with_query("/done", [("a", "1")]), "/done?a=1");
        assert_eq!(with_query("/done?r=/x", [("a", "1")]), "/done?r=/x&a=1");
        assert_eq!(with_query("/done#top", [("a", "b c")]), "/done?a=b+c#top");
    }
}
