use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    Session, Settings, StoreError,
    storage::StoragePort,
    store::{DefaultReason, KeyValueStore, Outcome, StoreKey, decode_settings},
};

pub const PROVIDER_OPENAI: &str = "openai";
pub const PROVIDER_CHATBOX_AI: &str = "chatbox-ai";
pub const PROVIDER_OLLAMA: &str = "ollama";

/// A partial settings change; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openai_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ollama_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ollama_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
}

impl SettingsUpdate {
    fn changes_model(&self) -> bool {
        self.ai_provider.is_some() || self.model.is_some()
    }
}

impl Settings {
    pub fn apply(&mut self, update: &SettingsUpdate) {
        fn set<T: Clone>(slot: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *slot = value.clone();
            }
        }

        set(&mut self.ai_provider, &update.ai_provider);
        set(&mut self.model, &update.model);
        set(&mut self.temperature, &update.temperature);
        set(&mut self.top_p, &update.top_p);
        set(&mut self.openai_key, &update.openai_key);
        set(&mut self.api_host, &update.api_host);
        set(&mut self.ollama_host, &update.ollama_host);
        set(&mut self.ollama_model, &update.ollama_model);
        set(&mut self.language, &update.language);
        set(&mut self.theme, &update.theme);
        set(&mut self.font_size, &update.font_size);
        if update.max_tokens.is_some() {
            self.max_tokens = update.max_tokens;
        }
        if update.license_key.is_some() {
            self.license_key.clone_from(&update.license_key);
        }
        if update.proxy.is_some() {
            self.proxy.clone_from(&update.proxy);
        }
    }
}

/// Applies `update` to the stored settings.
///
/// The update is laid over the stored JSON object, so stored fields the
/// update does not name survive as they are, unknown ones included. When the
/// stored settings cannot be read nothing is written.
///
/// When the update switches provider or model, the current session follows
/// along if nothing has been said in it yet (at most a system message): its
/// overrides are replaced by the update's provider, model and sampling
/// values.
pub fn modify_settings<S: StoragePort>(
    store: &KeyValueStore<S>,
    update: &SettingsUpdate,
    current_session_id: Option<&str>,
) -> Outcome<Settings> {
    let current = match store.get(&StoreKey::Settings) {
        Outcome::Defaulted {
            reason: DefaultReason::Backend(err),
            ..
        } => return Outcome::Fault(StoreError::Backend(err)),
        other => other.into_result(),
    };
    let mut fields = match current {
        Ok(Value::Object(fields)) => fields,
        Ok(_) => Settings::default_object(),
        Err(err) => return Outcome::Fault(err),
    };
    match serde_json::to_value(update) {
        Ok(Value::Object(changes)) => fields.extend(changes),
        Ok(_) => {}
        Err(err) => return Outcome::Fault(StoreError::Serialization(err.to_string())),
    }
    let saved = decode_settings(store.set(&StoreKey::Settings, Value::Object(fields)));

    if update.changes_model()
        && let Some(session_id) = current_session_id
    {
        sync_current_session(store, update, session_id);
    }

    saved
}

fn sync_current_session<S: StoragePort>(
    store: &KeyValueStore<S>,
    update: &SettingsUpdate,
    session_id: &str,
) {
    let mut sessions = match store.sessions().into_result() {
        Ok(sessions) => sessions,
        Err(err) => {
            warn!("cannot load sessions to apply model change: {}", err);
            return;
        }
    };
    let Some(session) = sessions.iter_mut().find(|s| s.id == session_id) else {
        return;
    };
    if session.messages.len() > 1 {
        return;
    }

    apply_overrides(session, update);
    info!(session_id, "current session follows new model settings");
    if let Outcome::Fault(err) = store.save_sessions(&sessions) {
        warn!("cannot save session after model change: {}", err);
    }
}

fn apply_overrides(session: &mut Session, update: &SettingsUpdate) {
    session.ai_provider.clone_from(&update.ai_provider);
    session.model.clone_from(&update.model);
    session.temperature = update.temperature;
    session.top_p = update.top_p;
    session.max_tokens = update.max_tokens;
}

/// Whether the settings dialog must be shown before the first request.
#[must_use]
pub fn needs_edit_setting(settings: &Settings) -> bool {
    match settings.ai_provider.as_str() {
        PROVIDER_CHATBOX_AI => settings.license_key.as_deref().is_none_or(str::is_empty),
        PROVIDER_OPENAI => {
            settings.openai_key.is_empty() && settings.api_host == Settings::default().api_host
        }
        PROVIDER_OLLAMA => settings.ollama_model.is_empty(),
        _ => false,
    }
}
