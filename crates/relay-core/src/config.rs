use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_API_VERSION: &str = "v18.0";
pub const DEFAULT_API_BASE: &str = "https://graph.facebook.com";
/// WhatsApp rejects bodies over 4096 characters; leave room for the marker.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4000;
pub const DEFAULT_FALLBACK_REPLY: &str =
    "Sorry, I encountered an error processing your question. Please try again.";

/// Flat environment names used by existing deployments, mapped onto the
/// nested config tree.
const LEGACY_ENV_KEYS: &[(&str, &str)] = &[
    ("WHATSAPP_ACCESS_TOKEN", "whatsapp.access_token"),
    ("WHATSAPP_PHONE_NUMBER_ID", "whatsapp.phone_number_id"),
    ("WHATSAPP_API_VERSION", "whatsapp.api_version"),
    ("WEBHOOK_VERIFY_TOKEN", "whatsapp.verify_token"),
    ("WHATSAPP_APP_SECRET", "whatsapp.app_secret"),
    ("OPENAI_API_KEY", "agent.api_key"),
    ("PDF_PATH", "knowledge.document_path"),
    ("TABLE_NAME", "knowledge.table_name"),
    ("DATABASE_PATH", "knowledge.database_path"),
    ("PORT", "server.port"),
];

/// Top-level config (relay.toml + legacy env names + RELAY_* overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// WhatsApp Cloud API credentials and webhook secrets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default, deserialize_with = "lenient_string")]
    pub access_token: String,
    /// Sender phone-number identifier (not the phone number itself).
    #[serde(default, deserialize_with = "lenient_string")]
    pub phone_number_id: String,
    #[serde(default = "default_api_version", deserialize_with = "lenient_string")]
    pub api_version: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Token echoed back during the hub.challenge handshake. Empty rejects
    /// every handshake.
    #[serde(default, deserialize_with = "lenient_string")]
    pub verify_token: String,
    /// Signing key for X-Hub-Signature-256. Empty disables signature checks,
    /// which is only acceptable in development.
    #[serde(default, deserialize_with = "lenient_string")]
    pub app_secret: String,
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,
    /// Emoji reaction sent on receipt of every actionable message.
    #[serde(default)]
    pub ack_reaction: Option<String>,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            phone_number_id: String::new(),
            api_version: default_api_version(),
            api_base: default_api_base(),
            verify_token: String::new(),
            app_secret: String::new(),
            max_message_length: default_max_message_length(),
            ack_reaction: None,
        }
    }
}

impl WhatsAppConfig {
    /// `{api_base}/{api_version}/{phone_number_id}`, the root of every send.
    pub fn base_url(&self) -> String {
        format!(
            "{}/{}/{}",
            self.api_base.trim_end_matches('/'),
            self.api_version,
            self.phone_number_id
        )
    }

    pub fn signature_required(&self) -> bool {
        !self.app_secret.is_empty()
    }
}

/// Answer generation: OpenAI-compatible provider plus retrieval knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Deadline for one generator call; expiry is handled like a failure.
    #[serde(default = "default_generation_timeout_secs")]
    pub generation_timeout_secs: u64,
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
    /// Knowledge chunks injected into each prompt.
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Prior messages of the same session replayed to the model.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Replaces the built-in advisor instructions when non-empty.
    #[serde(default)]
    pub instructions: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            model: default_model(),
            api_key: None,
            base_url: default_openai_base_url(),
            max_tokens: default_max_tokens(),
            generation_timeout_secs: default_generation_timeout_secs(),
            fallback_reply: default_fallback_reply(),
            top_k: default_top_k(),
            history_turns: default_history_turns(),
            instructions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_document_path")]
    pub document_path: String,
    /// Collection name the document's chunks are stored under.
    #[serde(default = "default_table_name")]
    pub table_name: String,
    #[serde(default = "default_db_path")]
    pub database_path: String,
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    /// Load the document at startup when the collection is empty.
    #[serde(default)]
    pub load_on_start: bool,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            document_path: default_document_path(),
            table_name: default_table_name(),
            database_path: default_db_path(),
            chunk_chars: default_chunk_chars(),
            load_on_start: false,
        }
    }
}

/// Delivery guarantees of the webhook pipeline. Defaults keep the
/// single-attempt, no-dedup, fully concurrent behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_dispatch_max_attempts")]
    pub dispatch_max_attempts: u32,
    #[serde(default = "default_dispatch_backoff_ms")]
    pub dispatch_backoff_ms: u64,
    /// 0 disables message-id de-duplication.
    #[serde(default)]
    pub dedup_window_secs: u64,
    #[serde(default)]
    pub serialize_per_sender: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dispatch_max_attempts: default_dispatch_max_attempts(),
            dispatch_backoff_ms: default_dispatch_backoff_ms(),
            dedup_window_secs: 0,
            serialize_per_sender: false,
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}
fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_max_message_length() -> usize {
    DEFAULT_MAX_MESSAGE_LENGTH
}
fn default_agent_name() -> String {
    "Export Copilot".to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_generation_timeout_secs() -> u64 {
    60
}
fn default_fallback_reply() -> String {
    DEFAULT_FALLBACK_REPLY.to_string()
}
fn default_top_k() -> usize {
    5
}
fn default_history_turns() -> usize {
    10
}
fn default_document_path() -> String {
    "data/knowledge_base.md".to_string()
}
fn default_table_name() -> String {
    "MSME_INFO".to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.relay/relay.db", home)
}
fn default_chunk_chars() -> usize {
    1200
}
fn default_dispatch_max_attempts() -> u32 {
    1
}
fn default_dispatch_backoff_ms() -> u64 {
    500
}

/// Env providers parse digit-only values as numbers; ids and tokens must stay
/// strings.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Flag(bool),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s,
        Raw::Unsigned(n) => n.to_string(),
        Raw::Signed(n) => n.to_string(),
        Raw::Float(n) => n.to_string(),
        Raw::Flag(b) => b.to_string(),
    })
}

impl RelayConfig {
    /// Load config: defaults, then a TOML file, then the legacy flat env
    /// names, then `RELAY_SECTION__FIELD` overrides.
    ///
    /// A missing TOML file is not an error.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        tracing::debug!(path = %path, "loading config");

        Figment::from(Serialized::defaults(RelayConfig::default()))
            .merge(Toml::file(&path))
            .merge(legacy_env())
            .merge(Env::prefixed("RELAY_").split("__"))
            .extract()
            .map_err(|e| crate::error::RelayError::Config(e.to_string()))
    }

    /// Human-readable problems worth logging at startup. None of them stop
    /// the server.
    pub fn warnings(&self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.whatsapp.signature_required() {
            out.push(
                "whatsapp.app_secret is empty: webhook signatures are NOT verified (unsafe outside development)"
                    .to_string(),
            );
        }
        if self.whatsapp.verify_token.is_empty() {
            out.push("whatsapp.verify_token is empty: webhook handshake will always fail".to_string());
        }
        if self.whatsapp.access_token.is_empty() || self.whatsapp.phone_number_id.is_empty() {
            out.push("whatsapp.access_token / phone_number_id missing: replies cannot be sent".to_string());
        }
        if self.agent.api_key.as_deref().unwrap_or("").is_empty() {
            out.push("agent.api_key missing: every question will get the fallback reply".to_string());
        }
        if self.pipeline.dispatch_max_attempts == 0 {
            out.push("pipeline.dispatch_max_attempts is 0: treated as 1".to_string());
        }
        out
    }
}

fn legacy_env() -> Env {
    Env::raw().filter_map(|key| {
        LEGACY_ENV_KEYS
            .iter()
            .find(|(name, _)| key.as_str().eq_ignore_ascii_case(name))
            .map(|(_, path)| (*path).into())
    })
}

fn default_config_path() -> String {
    if let Ok(path) = std::env::var("RELAY_CONFIG") {
        return path;
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.relay/relay.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_reference_deployment() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.whatsapp.api_version, "v18.0");
        assert_eq!(cfg.whatsapp.max_message_length, 4000);
        assert_eq!(cfg.knowledge.table_name, "MSME_INFO");
        assert_eq!(cfg.pipeline.dispatch_max_attempts, 1);
        assert_eq!(cfg.pipeline.dedup_window_secs, 0);
        assert!(!cfg.pipeline.serialize_per_sender);
        assert!(!cfg.whatsapp.signature_required());
    }

    #[test]
    fn base_url_joins_version_and_phone_id() {
        let cfg = WhatsAppConfig {
            api_base: "https://graph.facebook.com/".to_string(),
            phone_number_id: "1234".to_string(),
            ..WhatsAppConfig::default()
        };
        assert_eq!(cfg.base_url(), "https://graph.facebook.com/v18.0/1234");
    }

    #[test]
    fn legacy_env_names_are_mapped() {
        Jail::expect_with(|jail| {
            jail.set_env("WHATSAPP_APP_SECRET", "s3cret");
            jail.set_env("WHATSAPP_PHONE_NUMBER_ID", "109876543210987");
            jail.set_env("WEBHOOK_VERIFY_TOKEN", "hunter2");
            jail.set_env("TABLE_NAME", "EXPORT_DOCS");
            let cfg = RelayConfig::load(Some("does-not-exist.toml")).expect("config loads");
            assert_eq!(cfg.whatsapp.app_secret, "s3cret");
            assert_eq!(cfg.whatsapp.phone_number_id, "109876543210987");
            assert_eq!(cfg.whatsapp.verify_token, "hunter2");
            assert_eq!(cfg.knowledge.table_name, "EXPORT_DOCS");
            assert!(cfg.whatsapp.signature_required());
            Ok(())
        });
    }

    #[test]
    fn prefixed_env_overrides_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "relay.toml",
                r#"
                [pipeline]
                dedup_window_secs = 10
                dispatch_max_attempts = 2

                [whatsapp]
                verify_token = "from-file"
                "#,
            )?;
            jail.set_env("RELAY_PIPELINE__DEDUP_WINDOW_SECS", "60");
            let cfg = RelayConfig::load(Some("relay.toml")).expect("config loads");
            assert_eq!(cfg.pipeline.dedup_window_secs, 60);
            assert_eq!(cfg.pipeline.dispatch_max_attempts, 2);
            assert_eq!(cfg.whatsapp.verify_token, "from-file");
            Ok(())
        });
    }

    #[test]
    fn invalid_value_fails_the_whole_load() {
        Jail::expect_with(|jail| {
            jail.set_env("WHATSAPP_APP_SECRET", "s3cret");
            jail.set_env("PORT", "eighty");
            let err = RelayConfig::load(Some("does-not-exist.toml")).unwrap_err();
            assert!(matches!(err, crate::error::RelayError::Config(_)));
            Ok(())
        });
    }

    #[test]
    fn toml_typo_fails_the_whole_load() {
        Jail::expect_with(|jail| {
            jail.create_file("relay.toml", "[whatsapp\napp_secret = \"s3cret\"\n")?;
            assert!(RelayConfig::load(Some("relay.toml")).is_err());
            Ok(())
        });
    }

    #[test]
    fn warnings_flag_missing_secret() {
        let warnings = RelayConfig::default().warnings();
        assert!(warnings.iter().any(|w| w.contains("app_secret")));
        assert!(warnings.iter().any(|w| w.contains("verify_token")));
    }
}
