//! Node-local configuration discovery.
//!
//! The agent reads the node's properties file to learn the API base URL,
//! the shared secret, and where the node's redis publishes events.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

/// Well known property keys.
pub const CFG_WEB_SERVER_URL: &str = "bigbluebutton.web.serverURL";
pub const CFG_SECRET: &str = "securitySalt";

#[derive(Debug, Error, PartialEq)]
pub enum PropertiesError {
    #[error("bigbluebutton.web.serverURL property not found in config")]
    ServerUrlNotInConfig,

    #[error("securitySalt property not found in config")]
    SecretNotInConfig,
}

/// A parsed `key=value` properties file.
#[derive(Debug, Clone, Default)]
pub struct Properties(HashMap<String, String>);

impl Properties {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Parse properties content: `key=value` lines, `#` comments, blank
    /// lines ignored, later keys override earlier ones.
    pub fn parse(content: &str) -> Self {
        let mut props = HashMap::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                props.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Self(props)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn server_url(&self) -> Result<&str, PropertiesError> {
        self.get(CFG_WEB_SERVER_URL)
            .ok_or(PropertiesError::ServerUrlNotInConfig)
    }

    pub fn secret(&self) -> Result<&str, PropertiesError> {
        self.get(CFG_SECRET).ok_or(PropertiesError::SecretNotInConfig)
    }

    /// The API base: the server URL with `/bigbluebutton/api/` appended.
    pub fn api_url(&self) -> Result<String, PropertiesError> {
        let mut url = self.server_url()?.to_string();
        if !url.ends_with('/') {
            url.push('/');
        }
        url.push_str("bigbluebutton/api/");
        Ok(url)
    }

    /// Connection URL of the node's redis, where events are published.
    pub fn redis_url(&self) -> String {
        let host = self.get("redisHost").unwrap_or("localhost");
        let port = self.get("redisPort").unwrap_or("6379");
        let pass = self.get("redisPassword").unwrap_or("");
        format!("redis://:{pass}@{host}:{port}/1")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# BigBlueButton web properties
bigbluebutton.web.serverURL=https://node-1.example.com
securitySalt=639259d4-9dd8-4b25-bf01-95f9567eaf4b

redisHost=127.0.0.1
redisPort=6380
";

    #[test]
    fn parses_keys_and_skips_comments() {
        let props = Properties::parse(SAMPLE);
        assert_eq!(
            props.server_url().unwrap(),
            "https://node-1.example.com"
        );
        assert_eq!(
            props.secret().unwrap(),
            "639259d4-9dd8-4b25-bf01-95f9567eaf4b"
        );
        assert_eq!(props.get("# BigBlueButton web properties"), None);
    }

    #[test]
    fn missing_keys_are_typed_errors() {
        let props = Properties::parse("foo=bar");
        assert_eq!(
            props.server_url().unwrap_err(),
            PropertiesError::ServerUrlNotInConfig
        );
        assert_eq!(props.secret().unwrap_err(), PropertiesError::SecretNotInConfig);
    }

    #[test]
    fn api_url_appends_suffix_once() {
        let props = Properties::parse("bigbluebutton.web.serverURL=https://node/");
        assert_eq!(
            props.api_url().unwrap(),
            "https://node/bigbluebutton/api/"
        );

        let props = Properties::parse("bigbluebutton.web.serverURL=https://node");
        assert_eq!(
            props.api_url().unwrap(),
            "https://node/bigbluebutton/api/"
        );
    }

    #[test]
    fn redis_url_uses_defaults() {
        let props = Properties::parse("");
        assert_eq!(props.redis_url(), "redis://:@localhost:6379/1");

        let props = Properties::parse("redisHost=10.0.0.5\nredisPort=7000\nredisPassword=pw");
        assert_eq!(props.redis_url(), "redis://:pw@10.0.0.5:7000/1");
    }

    #[test]
    fn later_keys_override() {
        let props = Properties::parse("a=1\na=2");
        assert_eq!(props.get("a"), Some("2"));
    }
}
