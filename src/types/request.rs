use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request attributes the core needs from the excluded HTTP layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestHeaders {
    pub ip_address: String,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub device_type: Option<String>,
    pub device_model: Option<String>,
    pub device_os: Option<String>,
    pub device_os_version: Option<String>,
    pub session_id: Option<String>,
    pub referrer: Option<String>,
    pub request_time: Option<DateTime<Utc>>,
}

impl RequestHeaders {
    pub fn new(ip_address: &str, user_agent: Option<&str>) -> Self {
        Self {
            ip_address: ip_address.to_string(),
            user_agent: user_agent.map(str::to_string),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    /// Builds headers from raw `(name, value)` pairs; names are matched
    /// case-insensitively and unknown headers are ignored
    pub fn from_pairs<'a, I>(ip_address: &str, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = Self::new(ip_address, None);
        for (name, value) in pairs {
            let value = Some(value.trim().to_string());
            match name.trim().to_ascii_lowercase().as_str() {
                "user-agent" => headers.user_agent = value,
                "device-id" => headers.device_id = value,
                "device-type" => headers.device_type = value,
                "device-model" => headers.device_model = value,
                "device-os" => headers.device_os = value,
                "device-os-version" => headers.device_os_version = value,
                "referer" | "referrer" => headers.referrer = value,
                "x-session-id" | "session-id" => headers.session_id = value,
                _ => {}
            }
        }
        headers
    }

    pub fn user_agent_or_unknown(&self) -> &str {
        self.user_agent.as_deref().unwrap_or("unknown")
    }
}
