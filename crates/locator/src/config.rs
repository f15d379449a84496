//! Locator configuration.
//!
//! Configuration is plain data with serde defaults, so hosts can embed a
//! `[locator]` table in their own TOML files or build it in code:
//!
//! ```toml
//! event_buffer = 256
//! release_on_scope_unload = false
//! initialize_on_build = true
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while loading a [`LocatorConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
	/// The input was not valid TOML for this schema.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// A field parsed but holds an unusable value.
	#[error("invalid value for {field}: {message}")]
	Invalid {
		/// Offending field name.
		field: &'static str,
		/// Why the value was refused.
		message: String,
	},
}

/// Tunables for a [`crate::Locator`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocatorConfig {
	/// Capacity of the change-notification broadcast buffer.
	pub event_buffer: usize,
	/// Invoke release contracts of entries removed by a scope unload.
	pub release_on_scope_unload: bool,
	/// Enter the initialized state (and subscribe host hooks) at build time.
	pub initialize_on_build: bool,
}

impl Default for LocatorConfig {
	fn default() -> Self {
		Self {
			event_buffer: 128,
			release_on_scope_unload: true,
			initialize_on_build: false,
		}
	}
}

impl LocatorConfig {
	/// Parses and validates a TOML document.
	pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	/// Checks invariants serde cannot express.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.event_buffer == 0 {
			return Err(ConfigError::Invalid {
				field: "event_buffer",
				message: "must be > 0".to_string(),
			});
		}
		Ok(())
	}

	/// Sets the change-notification buffer capacity.
	///
	/// # Panics
	///
	/// Panics if `size` is zero.
	#[must_use]
	pub fn event_buffer(mut self, size: usize) -> Self {
		assert!(size > 0, "event buffer size must be > 0");
		self.event_buffer = size;
		self
	}

	#[must_use]
	pub fn release_on_scope_unload(mut self, enabled: bool) -> Self {
		self.release_on_scope_unload = enabled;
		self
	}

	#[must_use]
	pub fn initialize_on_build(mut self, enabled: bool) -> Self {
		self.initialize_on_build = enabled;
		self
	}
}
