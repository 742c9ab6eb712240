//! Configuration types.
//!
//! Settings are read from TOML, then each key is overridden by its environment variable when
//! that variable is set to a non-empty value. The result is resolved once into a
//! [`SubscriptionSchema`] that subscriptions share; nothing here is re-read per call.
//!
//! | key                              | environment variable                  | default         |
//! |----------------------------------|---------------------------------------|-----------------|
//! | `signature_table`                | `GUPAYMENT_SIGNATURE_TABLE`           | `subscriptions` |
//! | `subscription_model_id_column`   | `IUGU_SUBSCRIPTION_MODEL_ID_COLUMN`   | `iugu_id`       |
//! | `subscription_model_plan_column` | `IUGU_SUBSCRIPTION_MODEL_PLAN_COLUMN` | `iugu_plan`     |
//! | `model`                          | `IUGU_MODEL`                          | `User`          |
//! | `model_foreign_key`              | `IUGU_MODEL_FOREIGN_KEY`              | `user_id`       |

use std::path::Path;

use serde::Deserialize;

use crate::{
    error::{PaymentError, Result},
    gateway::iugu::IuguConfig,
};

/// Root configuration document.
///
/// ```toml
/// [subscriptions]
/// signature_table = "signatures"
/// model_foreign_key = "account_id"
///
/// [gateway]
/// base_url = "https://api.iugu.com/v1"
/// api_token = "..."
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GuPaymentConfig {
    /// Subscription table and column names.
    #[serde(default)]
    pub subscriptions: SubscriptionSettings,

    /// Iugu API settings (optional when the application brings its own gateway).
    #[serde(default)]
    pub gateway: Option<IuguConfig>,
}

/// Table and column names for the subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SubscriptionSettings {
    /// Table holding subscription records.
    pub signature_table: String,
    /// Column holding the remote subscription id.
    pub subscription_model_id_column: String,
    /// Column holding the remote plan identifier.
    pub subscription_model_plan_column: String,
    /// Identifier of the owning account model.
    pub model: String,
    /// Foreign-key column pointing at the owning account.
    pub model_foreign_key: String,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            signature_table: "subscriptions".to_owned(),
            subscription_model_id_column: "iugu_id".to_owned(),
            subscription_model_plan_column: "iugu_plan".to_owned(),
            model: "User".to_owned(),
            model_foreign_key: "user_id".to_owned(),
        }
    }
}

impl GuPaymentConfig {
    /// Parses configuration from a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::InvalidInput`] if the document is not valid TOML for this shape.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| PaymentError::InvalidInput(format!("invalid TOML config: {e}")))
    }

    /// Reads configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| PaymentError::InvalidInput(format!("cannot read config file: {e}")))?;
        Self::from_toml(&content)
    }

    /// Applies overrides from the process environment.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary lookup.
    ///
    /// Empty values are treated as unset.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let settings = &mut self.subscriptions;

        let overrides: [(&str, &mut String); 5] = [
            ("GUPAYMENT_SIGNATURE_TABLE", &mut settings.signature_table),
            ("IUGU_SUBSCRIPTION_MODEL_ID_COLUMN", &mut settings.subscription_model_id_column),
            ("IUGU_SUBSCRIPTION_MODEL_PLAN_COLUMN", &mut settings.subscription_model_plan_column),
            ("IUGU_MODEL", &mut settings.model),
            ("IUGU_MODEL_FOREIGN_KEY", &mut settings.model_foreign_key),
        ];
        for (name, slot) in overrides {
            if let Some(value) = non_empty(name) {
                *slot = value;
            }
        }

        if let Some(gateway) = self.gateway.as_mut()
            && let Some(token) = non_empty("IUGU_APIKEY")
        {
            gateway.api_token = token;
        }

        self
    }

    /// Validates every configured name.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Config`] for an empty or unsafe identifier, or invalid gateway
    /// settings.
    pub fn validate(&self) -> Result<()> {
        self.subscriptions.validate()?;
        if let Some(ref gateway) = self.gateway {
            gateway.validate()?;
        }
        Ok(())
    }

    /// Validates and resolves the subscription schema.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Config`] if validation fails.
    pub fn schema(&self) -> Result<SubscriptionSchema> {
        self.subscriptions.validate()?;
        Ok(SubscriptionSchema::from(&self.subscriptions))
    }
}

impl SubscriptionSettings {
    /// Validates table and column names.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError::Config`] if any name is empty or contains characters other than
    /// ASCII letters, digits and underscores. The model identifier may also contain `::`.
    pub fn validate(&self) -> Result<()> {
        validate_column_name("signature_table", &self.signature_table)?;
        validate_column_name("subscription_model_id_column", &self.subscription_model_id_column)?;
        validate_column_name(
            "subscription_model_plan_column",
            &self.subscription_model_plan_column,
        )?;
        validate_column_name("model_foreign_key", &self.model_foreign_key)?;
        validate_model_name(&self.model)?;

        if self.subscription_model_id_column == self.subscription_model_plan_column {
            return Err(PaymentError::Config(format!(
                "remote id and plan columns must differ, both are '{}'",
                self.subscription_model_id_column
            )));
        }

        Ok(())
    }
}

/// Resolved names used to persist subscriptions and look up their owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionSchema {
    /// Subscription table.
    pub table: String,
    /// Remote subscription id column.
    pub remote_id_column: String,
    /// Remote plan identifier column.
    pub plan_column: String,
    /// Owning account model.
    pub owner_model: String,
    /// Owning account foreign key.
    pub owner_foreign_key: String,
}

impl From<&SubscriptionSettings> for SubscriptionSchema {
    fn from(settings: &SubscriptionSettings) -> Self {
        Self {
            table: settings.signature_table.clone(),
            remote_id_column: settings.subscription_model_id_column.clone(),
            plan_column: settings.subscription_model_plan_column.clone(),
            owner_model: settings.model.clone(),
            owner_foreign_key: settings.model_foreign_key.clone(),
        }
    }
}

impl Default for SubscriptionSchema {
    fn default() -> Self {
        Self::from(&SubscriptionSettings::default())
    }
}

/// Reserved words that must not be used as bare column names.
const FORBIDDEN_COLUMN_NAMES: &[&str] = &["select", "insert", "update", "delete", "drop", "where"];

fn validate_column_name(context: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PaymentError::Config(format!("{context} cannot be empty")));
    }

    if name.len() > 64 {
        return Err(PaymentError::Config(format!("{context} must be 64 characters or less")));
    }

    if let Some(ch) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(PaymentError::Config(format!(
            "{context} contains invalid character '{ch}': {name}"
        )));
    }

    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return Err(PaymentError::Config(format!("{context} must not start with a digit: {name}")));
    }

    if FORBIDDEN_COLUMN_NAMES.contains(&name.to_ascii_lowercase().as_str()) {
        return Err(PaymentError::Config(format!("{context} is a reserved word: {name}")));
    }

    Ok(())
}

fn validate_model_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(PaymentError::Config("model cannot be empty".to_owned()));
    }

    for segment in name.split("::") {
        if segment.is_empty()
            || !segment.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(PaymentError::Config(format!("model is not a valid identifier: {name}")));
        }
    }

    Ok(())
}
