use crate::models::error::CaptureError;

/// Namespaced key/value storage for user preferences.
pub trait PreferenceStore: Send + Sync {
    /// The stored value, or `None` if missing or unreadable.
    fn load(&self, key: &str) -> Option<String>;

    fn save(&self, key: &str, value: &str) -> Result<(), CaptureError>;

    fn remove(&self, key: &str) -> Result<(), CaptureError>;
}
