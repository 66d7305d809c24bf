//! Process-wide configuration options (spec §6).

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Isolation level, widening or narrowing default-deny rules in C3's
/// security check (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    None,
    Basic,
    Standard,
    Strict,
    Paranoid,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::Standard
    }
}

/// All configuration options enumerated in spec §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub isolation_level: IsolationLevel,
    pub memory_pool_size: usize,
    pub max_message_size: u32,
    pub max_subscriptions: usize,
    pub max_subscribers_per_topic: usize,
    pub enable_wildcards: bool,
    pub enable_gc_notification: bool,
    pub strict_types: bool,
    pub case_sensitive: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            isolation_level: IsolationLevel::default(),
            memory_pool_size: 16 * 1024 * 1024,
            max_message_size: 1024 * 1024,
            max_subscriptions: 4096,
            max_subscribers_per_topic: 256,
            enable_wildcards: true,
            enable_gc_notification: true,
            strict_types: false,
            case_sensitive: true,
        }
    }
}

impl CoreConfig {
    /// Reject internally-contradictory configurations before they reach
    /// any component constructor.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.memory_pool_size == 0 {
            return Err(CoreError::invalid_parameter(
                "memory_pool_size must be greater than zero",
            ));
        }
        if self.max_message_size == 0 {
            return Err(CoreError::invalid_parameter(
                "max_message_size must be greater than zero",
            ));
        }
        if self.max_subscriptions == 0 {
            return Err(CoreError::invalid_parameter(
                "max_subscriptions must be greater than zero",
            ));
        }
        if self.max_subscribers_per_topic == 0 {
            return Err(CoreError::invalid_parameter(
                "max_subscribers_per_topic must be greater than zero",
            ));
        }
        Ok(())
    }
}
