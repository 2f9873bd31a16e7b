//! Server entries as declared in managed JSON configuration documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Top-level keys under which configuration documents list their servers.
pub const SERVER_SECTION_KEYS: [&str; 2] = ["mcpServers", "servers"];

/// How a server is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Stdio,
    Sse,
    Http,
    Websocket,
    #[serde(untagged)]
    Other(String),
}

impl Default for Transport {
    fn default() -> Self {
        Transport::Stdio
    }
}

impl Transport {
    pub fn is_remote(&self) -> bool {
        !matches!(self, Transport::Stdio)
    }
}

/// One server entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, alias = "type")]
    pub transport: Transport,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "timeout")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub disabled: bool,
}

impl ServerConfig {
    /// Parse a single entry, taking the name from its key in the document.
    pub fn from_entry(name: &str, entry: &Value) -> Result<Self, serde_json::Error> {
        let mut config: ServerConfig = serde_json::from_value(entry.clone())?;
        config.name = name.to_string();
        Ok(config)
    }
}

fn server_section(document: &Value) -> Option<&serde_json::Map<String, Value>> {
    SERVER_SECTION_KEYS
        .iter()
        .find_map(|key| document.get(key).and_then(Value::as_object))
}

/// All server entries declared in a document. Entries that fail to parse are
/// returned as errors alongside their names.
pub fn parse_servers(document: &Value) -> Vec<(String, Result<ServerConfig, serde_json::Error>)> {
    server_section(document)
        .map(|servers| {
            servers
                .iter()
                .map(|(name, entry)| (name.clone(), ServerConfig::from_entry(name, entry)))
                .collect()
        })
        .unwrap_or_default()
}

/// Whether a document declares a server with this name.
pub fn contains_server(document: &Value, name: &str) -> bool {
    server_section(document)
        .map(|servers| servers.contains_key(name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_servers() {
        let doc = json!({
            "mcpServers": {
                "github": {
                    "command": "npx",
                    "args": ["-y", "server-github"],
                    "env": {"GITHUB_TOKEN": "${GITHUB_TOKEN}"}
                },
                "remote": {"type": "sse", "url": "https://example.com/sse", "timeout": 30000}
            }
        });
        let servers = parse_servers(&doc);
        assert_eq!(servers.len(), 2);

        let github = servers[0].1.as_ref().unwrap();
        assert_eq!(github.name, "github");
        assert_eq!(github.transport, Transport::Stdio);
        assert_eq!(github.command.as_deref(), Some("npx"));

        let remote = servers[1].1.as_ref().unwrap();
        assert_eq!(remote.transport, Transport::Sse);
        assert_eq!(remote.timeout_ms, Some(30000));
        assert!(remote.transport.is_remote());
    }

    #[test]
    fn test_unknown_transport_is_preserved() {
        let config = ServerConfig::from_entry("x", &json!({"transport": "carrier-pigeon"})).unwrap();
        assert_eq!(config.transport, Transport::Other("carrier-pigeon".into()));
    }

    #[test]
    fn test_contains_server() {
        let doc = json!({"servers": {"postgres": {"command": "pg"}}});
        assert!(contains_server(&doc, "postgres"));
        assert!(!contains_server(&doc, "github"));
        assert!(!contains_server(&json!({}), "postgres"));
    }

    #[test]
    fn test_malformed_entry_reports_error() {
        let doc = json!({"mcpServers": {"bad": {"args": "not-a-list"}}});
        let servers = parse_servers(&doc);
        assert!(servers[0].1.is_err());
    }
}
