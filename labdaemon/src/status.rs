//! Shared record of the last known device state.

use std::sync::{Arc, Mutex};

/// Sentinel for fields whose value is not known, e.g., after the hardware disconnected.
pub const UNKNOWN: &str = "nan";

#[derive(Debug)]
struct Fields {
    connected: bool,
    values: Vec<(String, String)>,
}

/// Last known decoded field values of a device, together with its connection flag.
///
/// The registry is shared between the client side and the hardware side of a daemon. Cloning
/// is cheap as only the reference count of the inner [`Arc`] is increased, and all clones see
/// the same state. Fields keep the order in which they were declared, such that status replies
/// to clients are stable.
#[derive(Debug, Clone)]
pub struct StatusRegistry {
    inner: Arc<Mutex<Fields>>,
}

impl StatusRegistry {
    /// Create a new registry with the given fields, all set to [`UNKNOWN`], and disconnected.
    pub fn new(fields: &[&str]) -> Self {
        let values = fields
            .iter()
            .map(|name| (name.to_string(), UNKNOWN.to_string()))
            .collect();
        StatusRegistry {
            inner: Arc::new(Mutex::new(Fields {
                connected: false,
                values,
            })),
        }
    }

    /// Is the hardware currently connected?
    pub fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .expect("Mutex should not be poisoned")
            .connected
    }

    /// Set the connection flag of the hardware.
    pub fn set_connected(&self, connected: bool) {
        let mut guard = self.inner.lock().expect("Mutex should not be poisoned");
        guard.connected = connected;
    }

    /// Get the value of a field, if the field exists.
    pub fn get(&self, name: &str) -> Option<String> {
        let guard = self.inner.lock().expect("Mutex should not be poisoned");
        guard
            .values
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    }

    /// Set the value of a field. Fields that were not declared are appended.
    pub fn set(&self, name: &str, value: impl Into<String>) {
        let mut guard = self.inner.lock().expect("Mutex should not be poisoned");
        let value = value.into();
        match guard.values.iter().position(|(key, _)| key == name) {
            Some(idx) => guard.values[idx].1 = value,
            None => guard.values.push((name.to_string(), value)),
        }
    }

    /// Set several fields at once.
    pub fn update<'a>(&self, values: impl IntoIterator<Item = (&'a str, String)>) {
        for (name, value) in values {
            self.set(name, value);
        }
    }

    /// Reset all fields to [`UNKNOWN`] and mark the hardware as disconnected.
    pub fn reset(&self) {
        let mut guard = self.inner.lock().expect("Mutex should not be poisoned");
        guard.connected = false;
        for (_, value) in guard.values.iter_mut() {
            *value = UNKNOWN.to_string();
        }
    }

    /// All fields with their current values, in declaration order.
    pub fn fields(&self) -> Vec<(String, String)> {
        let guard = self.inner.lock().expect("Mutex should not be poisoned");
        guard.values.clone()
    }

    /// Render the status line that is sent to clients on `get_status`.
    ///
    /// The line starts with `status hw_connected=0|1`, followed by all fields as `key=value`.
    pub fn status_line(&self) -> String {
        let mut line = format!("status hw_connected={}", u8::from(self.is_connected()));
        for (key, value) in self.fields() {
            line.push_str(&format!(" {key}={value}"));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_unknown() {
        let reg = StatusRegistry::new(&["position", "speed"]);
        assert!(!reg.is_connected());
        assert_eq!(reg.get("position").as_deref(), Some(UNKNOWN));
        assert_eq!(reg.get("missing"), None);
    }

    #[test]
    fn test_clones_share_state() {
        let reg = StatusRegistry::new(&["position"]);
        let other = reg.clone();
        other.set("position", "500");
        other.set_connected(true);
        assert_eq!(reg.get("position").as_deref(), Some("500"));
        assert!(reg.is_connected());
    }

    #[test]
    fn test_status_line_order() {
        let reg = StatusRegistry::new(&["b", "a"]);
        reg.set("a", "1");
        reg.set("c", "2");
        assert_eq!(reg.status_line(), "status hw_connected=0 b=nan a=1 c=2");
    }

    #[test]
    fn test_reset() {
        let reg = StatusRegistry::new(&["position"]);
        reg.set_connected(true);
        reg.update([("position", "3".to_string())]);
        reg.reset();
        assert!(!reg.is_connected());
        assert_eq!(reg.get("position").as_deref(), Some(UNKNOWN));
    }
}
