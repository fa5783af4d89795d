use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const DEFAULT_SESSION_NAME: &str = "New Chat";
pub const DEFAULT_SESSION_MODEL: &str = "gpt-3.5-turbo";
pub const SESSION_TYPE_CHAT: &str = "chat";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Fields written by newer clients (word counts, errors, model names).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default = "default_session_type")]
    pub kind: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_session_type() -> String {
    SESSION_TYPE_CHAT.to_owned()
}

impl Session {
    /// The session synthesized whenever the stored session list would
    /// otherwise be empty.
    #[must_use]
    pub fn new_default() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: DEFAULT_SESSION_NAME.to_owned(),
            kind: default_session_type(),
            messages: Vec::new(),
            ai_provider: None,
            model: Some(DEFAULT_SESSION_MODEL.to_owned()),
            temperature: None,
            top_p: None,
            max_tokens: None,
            created_at: chrono::Utc::now().timestamp_millis(),
            extra: Map::new(),
        }
    }

    #[must_use]
    pub fn has_default_shape(&self) -> bool {
        !self.id.is_empty()
            && self.name == DEFAULT_SESSION_NAME
            && self.kind == SESSION_TYPE_CHAT
            && self.messages.is_empty()
            && self.model.as_deref() == Some(DEFAULT_SESSION_MODEL)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CopilotDetail {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pic_url: Option<String>,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub demo_answer: Option<String>,
    #[serde(default)]
    pub starred: bool,
    #[serde(default)]
    pub used_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// User settings as persisted under the `settings` key.
///
/// Every non-optional field is part of the baseline defaults object, so a
/// stored settings object is always completed field-by-field from
/// [`Settings::default`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub ai_provider: String,
    pub openai_key: String,
    pub api_host: String,
    pub model: String,
    pub temperature: f64,
    pub top_p: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub ollama_host: String,
    pub ollama_model: String,
    pub language: String,
    pub theme: String,
    pub font_size: u32,
    pub show_word_count: bool,
    pub show_token_count: bool,
    pub show_model_name: bool,
    pub allow_reporting_and_tracking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ai_provider: "openai".to_owned(),
            openai_key: String::new(),
            api_host: "https://api.openai.com".to_owned(),
            model: DEFAULT_SESSION_MODEL.to_owned(),
            temperature: 0.7,
            top_p: 1.0,
            max_tokens: None,
            ollama_host: "http://127.0.0.1:11434".to_owned(),
            ollama_model: String::new(),
            language: "en".to_owned(),
            theme: "system".to_owned(),
            font_size: 12,
            show_word_count: true,
            show_token_count: false,
            show_model_name: true,
            allow_reporting_and_tracking: false,
            license_key: None,
            proxy: None,
            extra: Map::new(),
        }
    }
}

impl Settings {
    /// The defaults as a JSON object, the base every read and write of the
    /// `settings` key is merged onto.
    #[must_use]
    pub fn default_object() -> Map<String, Value> {
        match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Window-level preferences stored under the `config` key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub theme: String,
    pub locale: String,
    pub font_size: u32,
    pub disable_quick_toggle_shortcut: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            theme: "system".to_owned(),
            locale: "en".to_owned(),
            font_size: 14,
            disable_quick_toggle_shortcut: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn default_session_has_canonical_shape() {
        let a = Session::new_default();
        let b = Session::new_default();
        assert!(a.has_default_shape());
        assert_ne!(a.id, b.id);
        assert!(a.created_at > 0);
    }

    #[test]
    fn session_serializes_with_wire_field_names() {
        let session = Session::new_default();
        let value = serde_json::to_value(&session).unwrap();
        assert_eq!(value["type"], "chat");
        assert_eq!(value["name"], "New Chat");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("aiProvider").is_none());
    }

    #[test]
    fn unknown_session_fields_survive_a_round_trip() {
        let raw = json!({
            "id": "s1",
            "name": "Work",
            "type": "chat",
            "messages": [{"id": "m1", "role": "user", "content": "hi", "wordCount": 1}],
            "starred": true,
            "createdAt": 1
        });
        let session: Session = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(session.extra.get("starred"), Some(&json!(true)));
        assert_eq!(session.messages[0].extra.get("wordCount"), Some(&json!(1)));
        assert_eq!(serde_json::to_value(&session).unwrap(), raw);
    }

    #[test]
    fn settings_default_object_omits_unset_optionals() {
        let defaults = Settings::default_object();
        assert_eq!(defaults.get("aiProvider"), Some(&json!("openai")));
        assert_eq!(defaults.get("temperature"), Some(&json!(0.7)));
        assert!(!defaults.contains_key("licenseKey"));
        assert!(!defaults.contains_key("proxy"));
    }
}
