use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Freshness of a stored credential relative to now and the safety window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Usable without a network call.
    Fresh,
    /// Inside the safety window or already past expiry; refresh before use.
    ExpiringSoon,
}

/// The one mutable entity: a bearer credential plus what is needed to renew it.
///
/// Expiry is always derived from `obtained_at_ms + expires_in * 1000`; nothing
/// else is treated as authoritative.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_type: String,
    pub expires_in: i64,
    pub obtained_at_ms: i64,
}

impl std::fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("obtained_at_ms", &self.obtained_at_ms)
            .finish()
    }
}

impl TokenRecord {
    pub fn expiry_ms(&self) -> i64 {
        self.obtained_at_ms
            .saturating_add(self.expires_in.saturating_mul(1000))
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.expiry_ms()).single()
    }

    pub fn obtained_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.obtained_at_ms).single()
    }

    /// Fresh only while `now < expiry - window`; the boundary itself is ExpiringSoon.
    pub fn freshness(&self, now_ms: i64, safety_window_ms: i64) -> Freshness {
        if now_ms < self.expiry_ms().saturating_sub(safety_window_ms) {
            Freshness::Fresh
        } else {
            Freshness::ExpiringSoon
        }
    }

    /// Build the initial record from an authorization code grant response.
    pub fn from_response(resp: TokenResponse, now_ms: i64) -> Self {
        Self {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token.filter(|t| !t.is_empty()),
            token_type: resp.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in: resp.expires_in.unwrap_or(DEFAULT_EXPIRES_IN),
            obtained_at_ms: now_ms,
        }
    }

    /// Replace this record with the result of a refresh grant.
    ///
    /// A refresh token the server did not rotate is retained, as are the
    /// lifetime and type when the response omits them.
    pub fn refreshed(&self, resp: TokenResponse, now_ms: i64) -> Self {
        Self {
            access_token: resp.access_token,
            refresh_token: resp
                .refresh_token
                .filter(|t| !t.is_empty())
                .or_else(|| self.refresh_token.clone()),
            token_type: resp.token_type.unwrap_or_else(|| self.token_type.clone()),
            expires_in: resp.expires_in.unwrap_or(self.expires_in),
            obtained_at_ms: now_ms,
        }
    }

    pub(crate) fn to_persisted(&self) -> PersistedRecord<'_> {
        PersistedRecord {
            access_token: &self.access_token,
            refresh_token: self.refresh_token.as_deref(),
            token_type: &self.token_type,
            expires_in: self.expires_in,
            obtained_at: self.obtained_at_ms,
            expires_at: self.expires_at(),
        }
    }
}

/// Lifetime assumed when the authorization server omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Raw token endpoint response.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Hold a response to the same rules the store applies on load, so every
    /// record built from it survives a save/load cycle unchanged.
    ///
    /// Empty optional strings count as absent.
    pub fn validated(self) -> Result<Self, String> {
        if self.access_token.is_empty() {
            return Err("empty access_token".into());
        }
        if let Some(expires_in) = self.expires_in.filter(|secs| *secs < 0) {
            return Err(format!("negative expires_in {expires_in}"));
        }
        Ok(Self {
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            token_type: self.token_type.filter(|t| !t.is_empty()),
            ..self
        })
    }
}

/// On-disk shape. `expires_at` is written for operators and never read back.
#[derive(Serialize)]
pub(crate) struct PersistedRecord<'a> {
    access_token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<&'a str>,
    token_type: &'a str,
    expires_in: i64,
    obtained_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

/// `obtained_at` as written by current (epoch ms) or older (ISO-8601) writers.
#[derive(Deserialize)]
#[serde(untagged)]
enum Timestamp {
    Millis(i64),
    Iso(DateTime<Utc>),
}

#[derive(Deserialize)]
pub(crate) struct StoredRecord {
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    expires_in: Option<i64>,
    #[serde(alias = "saved_at")]
    obtained_at: Option<Timestamp>,
}

impl TryFrom<StoredRecord> for TokenRecord {
    type Error = String;

    fn try_from(raw: StoredRecord) -> Result<Self, Self::Error> {
        let access_token = raw
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or("missing access_token")?;
        let expires_in = raw.expires_in.ok_or("missing expires_in")?;
        if expires_in < 0 {
            return Err(format!("negative expires_in {expires_in}"));
        }
        let obtained_at_ms = match raw.obtained_at.ok_or("missing obtained_at")? {
            Timestamp::Millis(ms) => ms,
            Timestamp::Iso(at) => at.timestamp_millis(),
        };
        Ok(Self {
            access_token,
            refresh_token: raw.refresh_token.filter(|t| !t.is_empty()),
            token_type: raw.token_type.unwrap_or_else(|| "Bearer".to_string()),
            expires_in,
            obtained_at_ms,
        })
    }
}

/// Parse persisted JSON into a well-formed record.
pub(crate) fn parse_stored(data: &str) -> Result<TokenRecord, String> {
    let raw: StoredRecord = serde_json::from_str(data).map_err(|e| e.to_string())?;
    TokenRecord::try_from(raw)
}
