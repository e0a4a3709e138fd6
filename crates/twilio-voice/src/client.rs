//! Twilio Programmable Voice client
//!
//! Places calls with asynchronous answering-machine detection enabled and
//! registers the two webhook callbacks (AMD verdict, status transitions).
//! Hang-up replaces the live call's TwiML with `<Hangup/>`.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::{error, info, instrument};

use crate::control::{normalize_destination, CallId, CallSession, TelephonyControl};
use crate::error::ProviderError;

/// Webhook path for asynchronous AMD verdicts
pub const AMD_CALLBACK_PATH: &str = "/webhook/twilio/voice/amd";
/// Webhook path for call status transitions
pub const STATUS_CALLBACK_PATH: &str = "/webhook/twilio/voice/status";
/// Query parameter carrying the session token on both callbacks
pub const SESSION_QUERY_KEY: &str = "socketId";

const DEFAULT_API_BASE: &str = "https://api.twilio.com";
const DEFAULT_TWIML: &str = r#"<Response><Pause length="10"/><Hangup/></Response>"#;
const HANGUP_TWIML: &str = "<Response><Hangup/></Response>";

/// Twilio configuration
#[derive(Debug, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Caller id used as `From`
    pub from_number: String,
    /// Public base URL the provider posts webhooks to (no trailing slash)
    pub base_url: String,
    /// REST API origin, overridable for tests
    pub api_base: String,
    /// TwiML executed once the call connects
    pub twiml: String,
}

impl TwilioConfig {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            twiml: DEFAULT_TWIML.to_string(),
        }
    }

    /// Point the client at a different REST origin
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_twiml(mut self, twiml: impl Into<String>) -> Self {
        self.twiml = twiml.into();
        self
    }

    /// Create from environment variables
    ///
    /// Reads:
    /// - TWILIO_ACCOUNT_SID (required)
    /// - TWILIO_AUTH_TOKEN (required)
    /// - TWILIO_PHONE_NUMBER (required)
    /// - BASE_URL (required)
    /// - TWILIO_API_BASE (optional, default: "https://api.twilio.com")
    pub fn from_env() -> Result<Self, ProviderError> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ProviderError::NotConfigured(format!("{name} not set")))
        };
        let mut config = Self::new(
            var("TWILIO_ACCOUNT_SID")?,
            var("TWILIO_AUTH_TOKEN")?,
            var("TWILIO_PHONE_NUMBER")?,
            var("BASE_URL")?,
        );
        if let Ok(api_base) = std::env::var("TWILIO_API_BASE") {
            config = config.with_api_base(api_base);
        }
        Ok(config)
    }

    /// Webhook URL for `path`, tagged with the session token when present.
    ///
    /// Fails with `NotConfigured` when `base_url` does not form a valid URL,
    /// so a call is never placed with callbacks that cannot be routed back.
    pub fn callback_url(
        &self,
        path: &str,
        session: Option<&str>,
    ) -> Result<String, ProviderError> {
        let base = format!("{}{}", self.base_url, path);
        let mut url = reqwest::Url::parse(&base).map_err(|e| {
            ProviderError::NotConfigured(format!("callback URL {base:?} is invalid: {e}"))
        })?;
        if let Some(token) = session {
            url.query_pairs_mut().append_pair(SESSION_QUERY_KEY, token);
        }
        Ok(url.to_string())
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.api_base, self.account_sid
        )
    }

    fn call_url(&self, call_id: &CallId) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.api_base, self.account_sid, call_id
        )
    }
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<i64>,
    message: Option<String>,
}

/// REST client for outbound voice calls
pub struct TwilioClient {
    config: TwilioConfig,
    http_client: reqwest::Client,
}

impl TwilioClient {
    /// Create a new Twilio client
    pub fn new(config: TwilioConfig) -> Result<Self, ProviderError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("dialgate-twilio-voice/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(TwilioClient {
            config,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self, ProviderError> {
        Self::new(TwilioConfig::from_env()?)
    }

    pub fn config(&self) -> &TwilioConfig {
        &self.config
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
    ) -> Result<reqwest::Response, ProviderError> {
        let response = self
            .http_client
            .post(url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<ApiError>(&body).ok();
        Err(ProviderError::Rejected {
            status: status.as_u16(),
            code: parsed.as_ref().and_then(|e| e.code),
            message: parsed
                .and_then(|e| e.message)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown").to_string()),
        })
    }
}

#[async_trait]
impl TelephonyControl for TwilioClient {
    #[instrument(skip(self, session), fields(to = %destination))]
    async fn place(
        &self,
        destination: &str,
        session: Option<&str>,
    ) -> Result<CallSession, ProviderError> {
        let to = normalize_destination(destination)?;
        let amd_callback = self.config.callback_url(AMD_CALLBACK_PATH, session)?;
        let status_callback = self.config.callback_url(STATUS_CALLBACK_PATH, session)?;

        let form = [
            ("To", to.as_str()),
            ("From", self.config.from_number.as_str()),
            ("Twiml", self.config.twiml.as_str()),
            ("MachineDetection", "Enable"),
            ("AsyncAmd", "true"),
            ("AsyncAmdStatusCallback", amd_callback.as_str()),
            ("StatusCallback", status_callback.as_str()),
        ];

        let result = async {
            let response = self.post_form(&self.config.calls_url(), &form).await?;
            response
                .json::<CallResource>()
                .await
                .map_err(|e| ProviderError::MalformedResponse(e.to_string()))
        }
        .await;

        match result {
            Ok(call) => {
                info!(to = %to, call_sid = %call.sid, "Twilio call initiated");
                Ok(CallSession {
                    call_id: CallId(call.sid),
                    destination: to,
                    origin: self.config.from_number.clone(),
                    created_at: Utc::now(),
                })
            }
            Err(e) => {
                error!(to = %to, error = %e, "Twilio call failed");
                Err(e)
            }
        }
    }

    #[instrument(skip(self), fields(call_sid = %call_id))]
    async fn terminate(&self, call_id: &CallId) -> Result<(), ProviderError> {
        match self
            .post_form(&self.config.call_url(call_id), &[("Twiml", HANGUP_TWIML)])
            .await
        {
            Ok(_) => {
                info!(call_sid = %call_id, "Twilio call hung up");
                Ok(())
            }
            Err(e) => {
                error!(call_sid = %call_id, error = %e, "Twilio call hang up failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> TwilioConfig {
        TwilioConfig::new("AC123", "secret", "+15550000000", "https://dial.example.com/")
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        assert_eq!(config().base_url, "https://dial.example.com");
    }

    #[test]
    fn test_callback_url_carries_session_token() {
        let url = config()
            .callback_url(AMD_CALLBACK_PATH, Some("sock 1"))
            .unwrap();
        assert_eq!(
            url,
            "https://dial.example.com/webhook/twilio/voice/amd?socketId=sock+1"
        );
        let url = config().callback_url(STATUS_CALLBACK_PATH, None).unwrap();
        assert_eq!(url, "https://dial.example.com/webhook/twilio/voice/status");
    }

    #[test]
    fn test_invalid_base_url_is_a_configuration_error() {
        let config = TwilioConfig::new("AC123", "secret", "+15550000000", "dial.example.com");
        assert!(matches!(
            config.callback_url(AMD_CALLBACK_PATH, Some("sock-1")),
            Err(ProviderError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_rest_urls() {
        let config = config().with_api_base("http://localhost:9000/");
        assert_eq!(
            config.calls_url(),
            "http://localhost:9000/2010-04-01/Accounts/AC123/Calls.json"
        );
        assert_eq!(
            config.call_url(&CallId::new("CA9")),
            "http://localhost:9000/2010-04-01/Accounts/AC123/Calls/CA9.json"
        );
    }
}
