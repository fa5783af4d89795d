use std::{borrow::Cow, fmt};

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::{
    APP_STORE_PREFIX, CopilotDetail, Session, Settings, StoreError, storage::StoragePort,
};

/// Logical key in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Settings,
    ChatSessions,
    MyCopilots,
    ConfigVersion,
    Config,
    /// `store_<name>` app state.
    App(String),
    /// Any other backing key, stored verbatim.
    Raw(String),
}

impl StoreKey {
    #[must_use]
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            StoreKey::Settings => Cow::Borrowed("settings"),
            StoreKey::ChatSessions => Cow::Borrowed("chat_sessions"),
            StoreKey::MyCopilots => Cow::Borrowed("my_copilots"),
            StoreKey::ConfigVersion => Cow::Borrowed("config_version"),
            StoreKey::Config => Cow::Borrowed("config"),
            StoreKey::App(name) => Cow::Owned(format!("{APP_STORE_PREFIX}{name}")),
            StoreKey::Raw(name) => Cow::Borrowed(name.as_str()),
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name {
            "settings" => StoreKey::Settings,
            "chat_sessions" => StoreKey::ChatSessions,
            "my_copilots" => StoreKey::MyCopilots,
            "config_version" => StoreKey::ConfigVersion,
            "config" => StoreKey::Config,
            other => match other.strip_prefix(APP_STORE_PREFIX) {
                Some(app) => StoreKey::App(app.to_owned()),
                None => StoreKey::Raw(other.to_owned()),
            },
        }
    }

    /// `Raw` names that belong to a dedicated variant resolve to it, so a
    /// protected key cannot be reached around its checks.
    #[must_use]
    pub fn normalized(&self) -> Cow<'_, StoreKey> {
        match self {
            StoreKey::Raw(name) => Cow::Owned(StoreKey::from_name(name)),
            other => Cow::Borrowed(other),
        }
    }

    /// Protected keys are never observed absent or invalid.
    #[must_use]
    pub fn is_protected(&self) -> bool {
        matches!(
            self,
            StoreKey::Settings | StoreKey::ChatSessions | StoreKey::MyCopilots
        )
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultReason {
    Missing,
    Corrupt(String),
    WrongShape(&'static str),
    Empty,
    Backend(String),
    Reset,
}

impl fmt::Display for DefaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefaultReason::Missing => write!(f, "no stored value"),
            DefaultReason::Corrupt(err) => write!(f, "stored value is not valid JSON: {err}"),
            DefaultReason::WrongShape(expected) => write!(f, "expected {expected}"),
            DefaultReason::Empty => write!(f, "empty session list"),
            DefaultReason::Backend(err) => write!(f, "backend read failed: {err}"),
            DefaultReason::Reset => write!(f, "reset to default"),
        }
    }
}

/// Result of a store operation.
///
/// `Defaulted` carries the value the store substituted (on read) or
/// persisted instead of the caller's value (on write).
#[derive(Debug)]
#[must_use]
pub enum Outcome<T> {
    Ok(T),
    Defaulted { value: T, reason: DefaultReason },
    Fault(StoreError),
}

impl<T> Outcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Ok(value) | Outcome::Defaulted { value, .. } => Some(value),
            Outcome::Fault(_) => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Ok(value) | Outcome::Defaulted { value, .. } => Some(value),
            Outcome::Fault(_) => None,
        }
    }

    pub fn into_result(self) -> Result<T, StoreError> {
        match self {
            Outcome::Ok(value) | Outcome::Defaulted { value, .. } => Ok(value),
            Outcome::Fault(err) => Err(err),
        }
    }

    pub fn reason(&self) -> Option<&DefaultReason> {
        match self {
            Outcome::Defaulted { reason, .. } => Some(reason),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn is_defaulted(&self) -> bool {
        matches!(self, Outcome::Defaulted { .. })
    }

    pub fn is_fault(&self) -> bool {
        matches!(self, Outcome::Fault(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Ok(value) => Outcome::Ok(f(value)),
            Outcome::Defaulted { value, reason } => Outcome::Defaulted {
                value: f(value),
                reason,
            },
            Outcome::Fault(err) => Outcome::Fault(err),
        }
    }
}

/// Key-value store over a [`StoragePort`] that repairs the protected keys on
/// every read, write and delete.
#[derive(Debug)]
pub struct KeyValueStore<S> {
    port: S,
}

impl<S: StoragePort> KeyValueStore<S> {
    pub fn new(port: S) -> Self {
        Self { port }
    }

    pub fn port(&self) -> &S {
        &self.port
    }

    pub fn get(&self, key: &StoreKey) -> Outcome<Value> {
        let key = key.normalized();
        let name = key.name();
        let stored = self.read_json(&name);

        match key.as_ref() {
            StoreKey::Settings => match stored {
                Ok(Some(Value::Object(fields))) => {
                    Outcome::Ok(Value::Object(merge_settings(fields)))
                }
                Ok(Some(_)) => settings_default(DefaultReason::WrongShape("an object")),
                Ok(None) => settings_default(DefaultReason::Missing),
                Err(reason) => settings_default(reason),
            },
            StoreKey::ChatSessions => match stored {
                Ok(Some(Value::Array(items))) if !items.is_empty() => {
                    Outcome::Ok(Value::Array(items))
                }
                Ok(Some(Value::Array(_))) => {
                    self.heal(&name, default_sessions(), DefaultReason::Empty)
                }
                Ok(Some(_)) => self.heal(
                    &name,
                    default_sessions(),
                    DefaultReason::WrongShape("an array"),
                ),
                Ok(None) => self.heal(&name, default_sessions(), DefaultReason::Missing),
                Err(reason @ DefaultReason::Corrupt(_)) => {
                    self.heal(&name, default_sessions(), reason)
                }
                Err(reason) => Outcome::Defaulted {
                    value: default_sessions(),
                    reason,
                },
            },
            StoreKey::MyCopilots => match stored {
                Ok(Some(Value::Array(items))) => Outcome::Ok(Value::Array(items)),
                Ok(Some(_)) => self.heal(
                    &name,
                    Value::Array(Vec::new()),
                    DefaultReason::WrongShape("an array"),
                ),
                Ok(None) => self.heal(&name, Value::Array(Vec::new()), DefaultReason::Missing),
                Err(reason @ DefaultReason::Corrupt(_)) => {
                    self.heal(&name, Value::Array(Vec::new()), reason)
                }
                Err(reason) => Outcome::Defaulted {
                    value: Value::Array(Vec::new()),
                    reason,
                },
            },
            _ => match stored {
                Ok(Some(value)) => Outcome::Ok(value),
                Ok(None) => Outcome::Defaulted {
                    value: Value::Null,
                    reason: DefaultReason::Missing,
                },
                Err(reason) => Outcome::Defaulted {
                    value: Value::Null,
                    reason,
                },
            },
        }
    }

    /// Writes `value`, substituting the canonical default where the value
    /// would break a protected key's contract. The persisted value is
    /// returned.
    pub fn set(&self, key: &StoreKey, value: Value) -> Outcome<Value> {
        let key = key.normalized();
        let outcome = match key.as_ref() {
            StoreKey::Settings => match value {
                Value::Object(fields) => Outcome::Ok(Value::Object(merge_settings(fields))),
                Value::Null => settings_default(DefaultReason::Missing),
                _ => settings_default(DefaultReason::WrongShape("an object")),
            },
            StoreKey::ChatSessions => match value {
                Value::Array(items) if !items.is_empty() => Outcome::Ok(Value::Array(items)),
                Value::Array(_) => Outcome::Defaulted {
                    value: default_sessions(),
                    reason: DefaultReason::Empty,
                },
                _ => Outcome::Defaulted {
                    value: default_sessions(),
                    reason: DefaultReason::WrongShape("an array"),
                },
            },
            StoreKey::MyCopilots => match value {
                Value::Array(items) => Outcome::Ok(Value::Array(items)),
                _ => Outcome::Defaulted {
                    value: Value::Array(Vec::new()),
                    reason: DefaultReason::WrongShape("an array"),
                },
            },
            _ => Outcome::Ok(value),
        };

        if let Some(reason) = outcome.reason() {
            debug!(key = %key, %reason, "substituting default on write");
        }
        let Some(persisted) = outcome.value() else {
            return outcome;
        };
        match self.write_json(&key.name(), persisted) {
            Ok(()) => outcome,
            Err(err) => {
                warn!(key = %key, "error writing to storage: {}", err);
                Outcome::Fault(err)
            }
        }
    }

    /// Removes `key`. Protected keys are reset to their canonical default
    /// instead; see [`KeyValueStore::reset_to_default`].
    pub fn delete(&self, key: &StoreKey) -> Outcome<Value> {
        self.reset_to_default(key)
    }

    /// Replaces a protected key with its canonical default. Other keys have
    /// no default and are physically removed.
    pub fn reset_to_default(&self, key: &StoreKey) -> Outcome<Value> {
        let key = key.normalized();
        let name = key.name();
        let Some(default) = canonical_default(&key) else {
            return match self.port.remove_item(&name) {
                Ok(()) => Outcome::Ok(Value::Null),
                Err(err) => {
                    warn!(key = %key, "error removing from storage: {}", err);
                    Outcome::Fault(err)
                }
            };
        };

        match self.write_json(&name, &default) {
            Ok(()) => Outcome::Defaulted {
                value: default,
                reason: DefaultReason::Reset,
            },
            Err(err) => {
                warn!(key = %key, "error resetting storage key: {}", err);
                Outcome::Fault(err)
            }
        }
    }

    /// Typed settings. A stored field of the wrong type falls back to its
    /// default on its own; every other stored field is kept.
    pub fn settings(&self) -> Outcome<Settings> {
        decode_settings(self.get(&StoreKey::Settings))
    }

    pub fn save_settings(&self, settings: &Settings) -> Outcome<Settings> {
        match serde_json::to_value(settings) {
            Ok(json) => decode_settings(self.set(&StoreKey::Settings, json)),
            Err(err) => Outcome::Fault(StoreError::Serialization(err.to_string())),
        }
    }

    pub fn sessions(&self) -> Outcome<Vec<Session>> {
        decode(&StoreKey::ChatSessions, self.get(&StoreKey::ChatSessions))
    }

    pub fn save_sessions(&self, sessions: &[Session]) -> Outcome<Vec<Session>> {
        self.set_typed(&StoreKey::ChatSessions, &sessions)
    }

    pub fn copilots(&self) -> Outcome<Vec<CopilotDetail>> {
        decode(&StoreKey::MyCopilots, self.get(&StoreKey::MyCopilots))
    }

    pub fn save_copilots(&self, copilots: &[CopilotDetail]) -> Outcome<Vec<CopilotDetail>> {
        self.set_typed(&StoreKey::MyCopilots, &copilots)
    }

    pub(crate) fn set_typed<T, U>(&self, key: &StoreKey, value: &T) -> Outcome<U>
    where
        T: Serialize + ?Sized,
        U: DeserializeOwned,
    {
        match serde_json::to_value(value) {
            Ok(json) => decode(key, self.set(key, json)),
            Err(err) => Outcome::Fault(StoreError::Serialization(err.to_string())),
        }
    }

    fn read_json(&self, name: &str) -> Result<Option<Value>, DefaultReason> {
        let text = match self.port.get_item(name) {
            Ok(Some(text)) => text,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!(key = name, "error reading from storage: {}", err);
                return Err(DefaultReason::Backend(err.to_string()));
            }
        };

        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                warn!(key = name, "error parsing stored value: {}", err);
                Err(DefaultReason::Corrupt(err.to_string()))
            }
        }
    }

    fn write_json(&self, name: &str, value: &Value) -> Result<(), StoreError> {
        let text =
            serde_json::to_string(value).map_err(|err| StoreError::Serialization(err.to_string()))?;
        self.port.set_item(name, &text)
    }

    fn heal(&self, name: &str, value: Value, reason: DefaultReason) -> Outcome<Value> {
        debug!(key = name, %reason, "repairing stored value");
        if let Err(err) = self.write_json(name, &value) {
            warn!(key = name, "error persisting repaired value: {}", err);
        }
        Outcome::Defaulted { value, reason }
    }
}

/// Shallow merge: every default field, overridden by each stored field that
/// is not `null`.
fn merge_settings(stored: Map<String, Value>) -> Map<String, Value> {
    let mut merged = Settings::default_object();
    for (field, value) in stored {
        if !value.is_null() {
            merged.insert(field, value);
        }
    }
    merged
}

fn settings_default(reason: DefaultReason) -> Outcome<Value> {
    Outcome::Defaulted {
        value: Value::Object(Settings::default_object()),
        reason,
    }
}

fn default_sessions() -> Value {
    match serde_json::to_value(Session::new_default()) {
        Ok(session) => Value::Array(vec![session]),
        Err(_) => Value::Array(Vec::new()),
    }
}

fn canonical_default(key: &StoreKey) -> Option<Value> {
    match key {
        StoreKey::Settings => Some(Value::Object(Settings::default_object())),
        StoreKey::ChatSessions => Some(default_sessions()),
        StoreKey::MyCopilots => Some(Value::Array(Vec::new())),
        _ => None,
    }
}

pub(crate) fn decode_settings(outcome: Outcome<Value>) -> Outcome<Settings> {
    let (value, reason) = match outcome {
        Outcome::Ok(value) => (value, None),
        Outcome::Defaulted { value, reason } => (value, Some(reason)),
        Outcome::Fault(err) => return Outcome::Fault(err),
    };
    if let Ok(settings) = serde_json::from_value::<Settings>(value.clone()) {
        return match reason {
            None => Outcome::Ok(settings),
            Some(reason) => Outcome::Defaulted {
                value: settings,
                reason,
            },
        };
    }

    let fields = match value {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    let defaults = Settings::default_object();
    let mut repaired = defaults.clone();
    let mut rejected = Vec::new();
    for (field, value) in fields {
        let mut candidate = defaults.clone();
        candidate.insert(field.clone(), value.clone());
        if serde_json::from_value::<Settings>(Value::Object(candidate)).is_ok() {
            repaired.insert(field, value);
        } else {
            rejected.push(field);
        }
    }
    warn!(fields = ?rejected, "stored settings fields have the wrong type, using their defaults");

    match serde_json::from_value(Value::Object(repaired)) {
        Ok(settings) => Outcome::Defaulted {
            value: settings,
            reason: DefaultReason::WrongShape("settings fields of the right type"),
        },
        Err(err) => Outcome::Fault(StoreError::Decode {
            key: StoreKey::Settings.to_string(),
            message: err.to_string(),
        }),
    }
}

fn decode<T: DeserializeOwned>(key: &StoreKey, outcome: Outcome<Value>) -> Outcome<T> {
    let convert = |value: Value| {
        serde_json::from_value::<T>(value).map_err(|err| StoreError::Decode {
            key: key.to_string(),
            message: err.to_string(),
        })
    };
    match outcome {
        Outcome::Ok(value) => match convert(value) {
            Ok(decoded) => Outcome::Ok(decoded),
            Err(err) => Outcome::Fault(err),
        },
        Outcome::Defaulted { value, reason } => match convert(value) {
            Ok(decoded) => Outcome::Defaulted {
                value: decoded,
                reason,
            },
            Err(err) => Outcome::Fault(err),
        },
        Outcome::Fault(err) => Outcome::Fault(err),
    }
}
