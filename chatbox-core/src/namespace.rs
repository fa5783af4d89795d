//! Open-ended app state under `store_<name>` keys, plus the window config and
//! first-visit marker kept next to it.

use serde_json::Value;
use tracing::warn;

use crate::{
    AppConfig, StoreError,
    storage::StoragePort,
    store::{DefaultReason, KeyValueStore, Outcome, StoreKey},
};

pub const APP_STORE_PREFIX: &str = "store_";
pub const HAS_VISITED_KEY: &str = "has_visited";

impl<S: StoragePort> KeyValueStore<S> {
    pub fn get_store_value(&self, name: &str) -> Outcome<Value> {
        self.get(&StoreKey::App(name.to_owned()))
    }

    pub fn set_store_value(&self, name: &str, value: Value) -> Outcome<Value> {
        self.set(&StoreKey::App(name.to_owned()), value)
    }

    pub fn delete_store_value(&self, name: &str) -> Outcome<Value> {
        self.delete(&StoreKey::App(name.to_owned()))
    }

    /// Names of all app state entries, prefix stripped.
    pub fn store_keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .port()
            .keys()?
            .into_iter()
            .filter_map(|key| key.strip_prefix(APP_STORE_PREFIX).map(str::to_owned))
            .collect())
    }

    /// Removes every app state entry and leaves all other keys alone.
    /// Returns the number of entries removed.
    pub fn clear_store(&self) -> Result<usize, StoreError> {
        let keys = self.port().keys()?;
        let mut removed = 0;
        for key in keys.iter().filter(|key| key.starts_with(APP_STORE_PREFIX)) {
            self.port().remove_item(key)?;
            removed += 1;
        }
        Ok(removed)
    }

    pub fn app_config(&self) -> Outcome<AppConfig> {
        match self.get(&StoreKey::Config) {
            Outcome::Ok(value) => match serde_json::from_value(value) {
                Ok(config) => Outcome::Ok(config),
                Err(err) => {
                    warn!("stored config does not decode, using defaults: {}", err);
                    Outcome::Defaulted {
                        value: AppConfig::default(),
                        reason: DefaultReason::WrongShape("a config object"),
                    }
                }
            },
            Outcome::Defaulted { reason, .. } => Outcome::Defaulted {
                value: AppConfig::default(),
                reason,
            },
            Outcome::Fault(err) => Outcome::Fault(err),
        }
    }

    pub fn set_app_config(&self, config: &AppConfig) -> Outcome<AppConfig> {
        self.set_typed(&StoreKey::Config, config)
    }

    /// True the first time it is called against a backing store. A store
    /// that cannot be read counts as visited.
    pub fn first_visit(&self) -> bool {
        let key = StoreKey::Raw(HAS_VISITED_KEY.to_owned());
        match self.get(&key) {
            Outcome::Ok(_) => return false,
            Outcome::Defaulted {
                reason: DefaultReason::Backend(err),
                ..
            } => {
                warn!("could not read first visit marker: {}", err);
                return false;
            }
            _ => {}
        }
        if let Outcome::Fault(err) = self.set(&key, Value::Bool(true)) {
            warn!("could not record first visit: {}", err);
        }
        true
    }
}
