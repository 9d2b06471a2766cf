//! Bucket lifecycle configuration.
//!
//! The rule model follows the S3 lifecycle schema restricted to the actions
//! the engine implements: expiration by age, non-current version expiration,
//! expired-delete-marker cleanup and aborting incomplete multipart uploads.
//! Field names serialize in S3 PascalCase, which is also the shape stored in
//! the bucket row's `lc` column.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Upper bound on rules per configuration, as in S3.
pub const MAX_RULES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RuleStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RuleFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Expiration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expired_object_delete_marker: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NoncurrentVersionExpiration {
    pub noncurrent_days: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AbortIncompleteMultipartUpload {
    pub days_after_initiation: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Rule {
    #[serde(default, rename = "ID")]
    pub id: String,
    pub status: RuleStatus,
    #[serde(default)]
    pub filter: RuleFilter,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<Expiration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub noncurrent_version_expiration: Option<NoncurrentVersionExpiration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_incomplete_multipart_upload: Option<AbortIncompleteMultipartUpload>,
}

impl Rule {
    pub fn is_enabled(&self) -> bool {
        self.status == RuleStatus::Enabled
    }

    pub fn prefix(&self) -> &str {
        self.filter.prefix.as_deref().unwrap_or("")
    }

    /// A rule with an empty prefix applies to the whole bucket and is
    /// evaluated after all prefix-scoped rules.
    pub fn is_default(&self) -> bool {
        self.prefix().is_empty()
    }

    pub fn expired_object_delete_marker(&self) -> bool {
        self.expiration
            .as_ref()
            .and_then(|e| e.expired_object_delete_marker)
            .unwrap_or(false)
    }

    fn validate(&self) -> Result<()> {
        let has_action = self
            .expiration
            .as_ref()
            .map(|e| e.days.is_some() || e.expired_object_delete_marker.is_some())
            .unwrap_or(false)
            || self.noncurrent_version_expiration.is_some()
            || self.abort_incomplete_multipart_upload.is_some();
        if !has_action {
            return Err(CoreError::InvalidLifecycleConfiguration(format!(
                "rule {:?} has no action",
                self.id
            )));
        }
        if let Some(exp) = &self.expiration {
            if exp.days == Some(0) {
                return Err(CoreError::InvalidLifecycleConfiguration(
                    "Expiration.Days must be positive".into(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LifecycleConfiguration {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl LifecycleConfiguration {
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        if self.rules.is_empty() {
            return Err(CoreError::InvalidLifecycleConfiguration(
                "configuration needs at least one rule".into(),
            ));
        }
        if self.rules.len() > MAX_RULES {
            return Err(CoreError::InvalidLifecycleConfiguration(format!(
                "configuration has {} rules, limit is {MAX_RULES}",
                self.rules.len()
            )));
        }
        for rule in &self.rules {
            rule.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expire_rule(prefix: &str, days: u32) -> Rule {
        Rule {
            id: format!("expire-{prefix}"),
            status: RuleStatus::Enabled,
            filter: RuleFilter {
                prefix: Some(prefix.to_string()),
            },
            expiration: Some(Expiration {
                days: Some(days),
                expired_object_delete_marker: None,
            }),
            noncurrent_version_expiration: None,
            abort_incomplete_multipart_upload: None,
        }
    }

    #[test]
    fn validation() {
        let ok = LifecycleConfiguration {
            rules: vec![expire_rule("logs/", 30)],
        };
        ok.validate().unwrap();

        assert!(LifecycleConfiguration::default().validate().is_err());

        let mut actionless = expire_rule("x", 1);
        actionless.expiration = None;
        assert!(LifecycleConfiguration {
            rules: vec![actionless]
        }
        .validate()
        .is_err());

        assert!(LifecycleConfiguration {
            rules: vec![expire_rule("x", 0)]
        }
        .validate()
        .is_err());

        let too_many = LifecycleConfiguration {
            rules: (0..=MAX_RULES).map(|i| expire_rule(&i.to_string(), 1)).collect(),
        };
        assert!(too_many.validate().is_err());
    }

    #[test]
    fn default_rule_detection() {
        assert!(!expire_rule("logs/", 1).is_default());
        let mut rule = expire_rule("", 1);
        assert!(rule.is_default());
        rule.filter.prefix = None;
        assert!(rule.is_default());
    }

    #[test]
    fn serde_uses_s3_names() {
        let config = LifecycleConfiguration {
            rules: vec![expire_rule("tmp/", 7)],
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"Rules\""));
        assert!(json.contains("\"Expiration\""));
        assert!(json.contains("\"Days\":7"));
        let back: LifecycleConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
