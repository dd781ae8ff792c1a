//! Persisted key/value settings
//!
//! Opaque string keys mapping to JSON values, as the extension's local
//! storage area holds them. The tracker list and the theme preference live
//! here.

use log::warn;
use serde_json::Value;

use crate::store::StoreError;

/// Settings key for the dark theme flag.
pub const THEME_KEY: &str = "siphonDarkTheme";

/// Key/value storage for small JSON-serializable settings.
pub trait SettingsStore {
    fn get_value(&self, key: &str) -> Result<Option<Value>, StoreError>;
    fn set_value(&self, key: &str, value: Value) -> Result<(), StoreError>;
}

/// Whether the pop-up should use the dark theme. Defaults to light.
pub fn dark_theme(settings: &dyn SettingsStore) -> bool {
    match settings.get_value(THEME_KEY) {
        Ok(Some(Value::Bool(dark))) => dark,
        Ok(_) => false,
        Err(e) => {
            warn!("Failed to read theme preference ({})", e);
            false
        }
    }
}

pub fn set_dark_theme(settings: &dyn SettingsStore, dark: bool) -> Result<(), StoreError> {
    settings.set_value(THEME_KEY, Value::Bool(dark))
}
