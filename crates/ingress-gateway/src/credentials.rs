//! Credential transport between the client and the gateway.
//!
//! Clients present credentials either as the `accessToken`/`refreshToken`
//! request headers or as cookies of the same names; headers win. Rotated
//! credentials go back both ways: as response headers (exposed through CORS)
//! and as `HttpOnly` cookies.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::error::HttpError;
use actix_web::http::header::{HeaderName, HeaderValue};
use actix_web::{HttpRequest, HttpResponse};
use ingress_auth::{CredentialKind, PresentedCredentials, RotatedCredentials};

pub const ACCESS_TOKEN: &str = "accessToken";
pub const REFRESH_TOKEN: &str = "refreshToken";

/// Header names are case-insensitive on the wire; these are the normalized forms.
pub const ACCESS_TOKEN_HEADER: &str = "accesstoken";
pub const REFRESH_TOKEN_HEADER: &str = "refreshtoken";

/// Read both credentials from `req`, header first, cookie second.
pub fn presented(req: &HttpRequest) -> PresentedCredentials {
    PresentedCredentials::new(
        read(req, ACCESS_TOKEN_HEADER, ACCESS_TOKEN),
        read(req, REFRESH_TOKEN_HEADER, REFRESH_TOKEN),
    )
}

fn read(req: &HttpRequest, header: &str, cookie: &str) -> Option<String> {
    req.headers()
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .or_else(|| {
            req.cookie(cookie)
                .map(|c| c.value().to_string())
                .filter(|v| !v.is_empty())
        })
}

/// Cookie attributes shared by every credential cookie the gateway writes.
#[derive(Debug, Clone, Default)]
pub struct CookiePolicy {
    pub secure: bool,
    pub domain: Option<String>,
}

impl CookiePolicy {
    pub fn new(secure: bool, domain: Option<String>) -> Self {
        Self { secure, domain }
    }

    fn base<'c>(&self, name: &'c str, value: String) -> Cookie<'c> {
        let mut cookie = Cookie::new(name, value);
        cookie.set_path("/");
        cookie.set_http_only(true);
        cookie.set_secure(self.secure);
        cookie.set_same_site(SameSite::Lax);
        if let Some(domain) = &self.domain {
            cookie.set_domain(domain.clone());
        }
        cookie
    }

    /// Cookie carrying `value`, living as long as the credential itself.
    pub fn credential_cookie<'c>(
        &self,
        name: &'c str,
        value: String,
        kind: CredentialKind,
    ) -> Cookie<'c> {
        let mut cookie = self.base(name, value);
        let max_age = i64::try_from(kind.lifetime().as_secs()).unwrap_or(i64::MAX);
        cookie.set_max_age(CookieDuration::seconds(max_age));
        cookie
    }

    /// Cookie whose attributes match the credential cookie so the browser
    /// replaces it; `HttpResponse::add_removal_cookie` expires it.
    pub fn removal_cookie<'c>(&self, name: &'c str) -> Cookie<'c> {
        self.base(name, String::new())
    }
}

/// Write a freshly rotated pair onto `response` as headers and cookies.
pub fn attach_rotated(
    response: &mut HttpResponse,
    rotated: &RotatedCredentials,
    policy: &CookiePolicy,
) -> Result<(), HttpError> {
    let headers = response.headers_mut();
    headers.insert(
        HeaderName::from_static(ACCESS_TOKEN_HEADER),
        HeaderValue::from_str(&rotated.access).map_err(HttpError::from)?,
    );
    headers.insert(
        HeaderName::from_static(REFRESH_TOKEN_HEADER),
        HeaderValue::from_str(&rotated.refresh).map_err(HttpError::from)?,
    );

    response.add_cookie(&policy.credential_cookie(
        ACCESS_TOKEN,
        rotated.access.clone(),
        CredentialKind::Access,
    ))?;
    response.add_cookie(&policy.credential_cookie(
        REFRESH_TOKEN,
        rotated.refresh.clone(),
        CredentialKind::Refresh,
    ))?;
    Ok(())
}

/// Instruct the client to drop both stored credentials.
pub fn clear(response: &mut HttpResponse, policy: &CookiePolicy) -> Result<(), HttpError> {
    response.add_removal_cookie(&policy.removal_cookie(ACCESS_TOKEN))?;
    response.add_removal_cookie(&policy.removal_cookie(REFRESH_TOKEN))?;
    Ok(())
}
