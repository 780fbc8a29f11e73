//! Configuration loading and representation.
//!
//! Everything is read from the environment once at startup. Absent values fall
//! back to development defaults with a warning, the same way the API binary treats
//! its bind address and persistence switch.

use core::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_EXTERNAL_CALL_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_STUDENT_ROLE_ID: i64 = 5;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// What deleting an enrollment does when the LMS unenroll hook fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionHookPolicy {
    /// Keep the record; the caller gets an external-service error and may retry.
    BlockOnFailure,
    /// Delete anyway and raise a reconciliation notice for the orphaned LMS seat.
    ProceedOnFailure,
}

impl Default for DeletionHookPolicy {
    fn default() -> Self {
        DeletionHookPolicy::ProceedOnFailure
    }
}

impl FromStr for DeletionHookPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "block" | "block_on_failure" => Ok(DeletionHookPolicy::BlockOnFailure),
            "proceed" | "proceed_on_failure" => Ok(DeletionHookPolicy::ProceedOnFailure),
            other => Err(ConfigError::Invalid {
                key: "DELETION_HOOK_POLICY",
                message: format!("expected 'block' or 'proceed', got '{other}'"),
            }),
        }
    }
}

/// Knobs of the enrollment orchestrator itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Upper bound applied to every external call (lookups, LMS, messaging).
    pub external_call_timeout: Duration,
    pub deletion_hook_policy: DeletionHookPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            external_call_timeout: DEFAULT_EXTERNAL_CALL_TIMEOUT,
            deletion_hook_policy: DeletionHookPolicy::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.external_call_timeout = timeout;
        self
    }

    pub fn with_deletion_hook_policy(mut self, policy: DeletionHookPolicy) -> Self {
        self.deletion_hook_policy = policy;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmsSettings {
    pub base_url: String,
    pub token: String,
    pub student_role_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotifierSettings {
    pub webhook_url: Option<String>,
    pub api_key: Option<String>,
    pub from: String,
}

/// Process-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: String,
    /// Postgres connection string; `None` means in-memory stores.
    pub database_url: Option<String>,
    pub orchestrator: OrchestratorConfig,
    /// `None` means no LMS endpoint is configured (dev mode, in-memory LMS).
    pub lms: Option<LmsSettings>,
    pub notifier: NotifierSettings,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from any key/value source (the environment in production).
    pub fn from_lookup<F>(get: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).filter(|v| !v.trim().is_empty());

        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());

        let use_persistent = match get("USE_PERSISTENT_STORES") {
            Some(v) => v.trim().parse::<bool>().map_err(|e| ConfigError::Invalid {
                key: "USE_PERSISTENT_STORES",
                message: e.to_string(),
            })?,
            None => false,
        };
        let database_url = if use_persistent {
            Some(get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?)
        } else {
            None
        };

        let external_call_timeout = match get("EXTERNAL_CALL_TIMEOUT_MS") {
            Some(v) => {
                let ms = v.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                    key: "EXTERNAL_CALL_TIMEOUT_MS",
                    message: e.to_string(),
                })?;
                if ms == 0 {
                    return Err(ConfigError::Invalid {
                        key: "EXTERNAL_CALL_TIMEOUT_MS",
                        message: "must be greater than zero".to_string(),
                    });
                }
                Duration::from_millis(ms)
            }
            None => DEFAULT_EXTERNAL_CALL_TIMEOUT,
        };

        let deletion_hook_policy = match get("DELETION_HOOK_POLICY") {
            Some(v) => v.parse()?,
            None => DeletionHookPolicy::default(),
        };

        let lms = match (get("LMS_BASE_URL"), get("LMS_TOKEN")) {
            (Some(base_url), Some(token)) => {
                let student_role_id = match get("LMS_STUDENT_ROLE_ID") {
                    Some(v) => v.trim().parse::<i64>().map_err(|e| ConfigError::Invalid {
                        key: "LMS_STUDENT_ROLE_ID",
                        message: e.to_string(),
                    })?,
                    None => DEFAULT_STUDENT_ROLE_ID,
                };
                Some(LmsSettings {
                    base_url,
                    token,
                    student_role_id,
                })
            }
            (Some(_), None) => return Err(ConfigError::Missing("LMS_TOKEN")),
            _ => None,
        };

        let notifier = NotifierSettings {
            webhook_url: get("NOTIFY_WEBHOOK_URL"),
            api_key: get("NOTIFY_API_KEY"),
            from: get("NOTIFY_FROM").unwrap_or_else(|| "no-reply@localhost".to_string()),
        };

        Ok(Self {
            bind_addr,
            database_url,
            orchestrator: OrchestratorConfig {
                external_call_timeout,
                deletion_hook_policy,
            },
            lms,
            notifier,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(pairs: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_are_in_memory_and_proceed_on_hook_failure() {
        let s = settings(&[]).unwrap();
        assert_eq!(s.bind_addr, DEFAULT_BIND_ADDR);
        assert_eq!(s.database_url, None);
        assert_eq!(s.orchestrator, OrchestratorConfig::default());
        assert_eq!(
            s.orchestrator.deletion_hook_policy,
            DeletionHookPolicy::ProceedOnFailure
        );
        assert!(s.lms.is_none());
    }

    #[test]
    fn persistent_stores_require_database_url() {
        assert_eq!(
            settings(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        let s = settings(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/campus"),
        ])
        .unwrap();
        assert_eq!(s.database_url.as_deref(), Some("postgres://localhost/campus"));
    }

    #[test]
    fn parses_timeout_policy_and_lms() {
        let s = settings(&[
            ("EXTERNAL_CALL_TIMEOUT_MS", "1500"),
            ("DELETION_HOOK_POLICY", "block"),
            ("LMS_BASE_URL", "https://lms.example.org"),
            ("LMS_TOKEN", "secret"),
        ])
        .unwrap();
        assert_eq!(s.orchestrator.external_call_timeout, Duration::from_millis(1500));
        assert_eq!(
            s.orchestrator.deletion_hook_policy,
            DeletionHookPolicy::BlockOnFailure
        );
        let lms = s.lms.unwrap();
        assert_eq!(lms.student_role_id, DEFAULT_STUDENT_ROLE_ID);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(settings(&[("EXTERNAL_CALL_TIMEOUT_MS", "0")]).is_err());
        assert!(settings(&[("DELETION_HOOK_POLICY", "maybe")]).is_err());
        assert_eq!(
            settings(&[("LMS_BASE_URL", "https://lms.example.org")]).unwrap_err(),
            ConfigError::Missing("LMS_TOKEN")
        );
    }
}
