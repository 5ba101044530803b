//! Secret types for values that must never reach logs.
//!
//! Re-exports [`secrecy`] so every crate in the workspace wraps credentials the
//! same way. The signal relay URL is the main user: Redis URLs routinely embed
//! a password (`redis://:password@host:6379`).
//!
//! `SecretString` redacts itself in `Debug`, so any config struct deriving or
//! hand-writing `Debug` stays safe to log. Reading the value requires an
//! explicit `expose_secret()` call.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! let relay_url = SecretString::from("redis://:hunter2@relay:6379");
//! assert!(!format!("{relay_url:?}").contains("hunter2"));
//! assert!(relay_url.expose_secret().starts_with("redis://"));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("relay-password");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("relay-password"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("redis://:pw@relay");
        assert_eq!(secret.expose_secret(), "redis://:pw@relay");
    }

    #[test]
    fn test_struct_with_secret_is_safe() {
        #[allow(dead_code)]
        #[derive(Debug)]
        struct RelaySettings {
            channel_prefix: String,
            url: SecretString,
        }

        let creds = RelaySettings {
            channel_prefix: "alice".to_string(),
            url: SecretString::from("super-secret"),
        };

        let debug_str = format!("{creds:?}");

        // Non-secret fields stay visible
        assert!(debug_str.contains("alice"));
        // Secret field is redacted
        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("super-secret"));
    }

    #[test]
    fn test_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct RelayCredentials {
            host: String,
            password: SecretString,
        }

        let json = r#"{"host": "relay", "password": "my-secret-value"}"#;
        let creds: RelayCredentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.password.expose_secret(), "my-secret-value");

        // Verify debug doesn't expose the value
        let debug = format!("{creds:?}");
        assert!(!debug.contains("my-secret-value"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_clone_works() {
        let secret = SecretString::from("cloneable");
        let cloned = secret.clone();
        assert_eq!(cloned.expose_secret(), "cloneable");
    }
}
