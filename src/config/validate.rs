// src/config/validate.rs

use std::num::NonZeroU64;
use std::time::Duration;

use tracing::warn;

use crate::config::model::{FleetConfig, RawCampaignConfig, RawFleetConfig};
use crate::engine::FleetSettings;
use crate::errors::{FleetError, Result};
use crate::keyspace::{DescriptorEstimator, KeyspaceEstimator, Partition};
use crate::liveness::LivenessSettings;
use crate::model::{AttackDefinition, CampaignDefinition};
use crate::router::{RetryPolicy, RouterSettings};

impl TryFrom<RawFleetConfig> for FleetConfig {
    type Error = FleetError;

    fn try_from(raw: RawFleetConfig) -> std::result::Result<Self, Self::Error> {
        let settings = settings_from_raw(&raw)?;

        let mut campaigns = Vec::with_capacity(raw.campaign.len());
        for (name, campaign) in raw.campaign {
            campaigns.push(campaign_from_raw(name, campaign, &settings)?);
        }

        Ok(FleetConfig {
            settings,
            campaigns,
        })
    }
}

fn settings_from_raw(raw: &RawFleetConfig) -> Result<FleetSettings> {
    let scheduler = &raw.scheduler;

    let task_size = NonZeroU64::new(scheduler.task_size).ok_or_else(|| {
        FleetError::ConfigError("[scheduler].task_size must be >= 1 (got 0)".to_string())
    })?;
    let lease = positive_seconds("[scheduler].lease_secs", scheduler.lease_secs)?;
    if scheduler.max_attempts == 0 {
        return Err(FleetError::ConfigError(
            "[scheduler].max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    if scheduler.max_tasks_per_attack == 0 {
        return Err(FleetError::ConfigError(
            "[scheduler].max_tasks_per_attack must be >= 1 (got 0)".to_string(),
        ));
    }

    let liveness = &raw.liveness;
    if liveness.sweep_interval_secs == 0 {
        return Err(FleetError::ConfigError(
            "[liveness].sweep_interval_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    let offline_threshold = positive_seconds(
        "[liveness].offline_threshold_secs",
        liveness.offline_threshold_secs,
    )?;

    let retry = &raw.retry;
    if !retry.multiplier.is_finite() || retry.multiplier < 1.0 {
        return Err(FleetError::ConfigError(format!(
            "[retry].multiplier must be a finite number >= 1.0 (got {})",
            retry.multiplier
        )));
    }

    Ok(FleetSettings {
        task_size,
        max_tasks_per_attack: scheduler.max_tasks_per_attack,
        router: RouterSettings {
            lease,
            max_attempts: scheduler.max_attempts,
        },
        liveness: LivenessSettings {
            sweep_interval: Duration::from_secs(liveness.sweep_interval_secs),
            offline_threshold,
        },
        retry: RetryPolicy {
            max_retries: retry.max_retries,
            initial_delay: Duration::from_millis(retry.initial_delay_ms),
            multiplier: retry.multiplier,
            max_delay: Duration::from_millis(retry.max_delay_ms),
        },
    })
}

fn positive_seconds(field: &str, secs: u64) -> Result<chrono::Duration> {
    if secs == 0 {
        return Err(FleetError::ConfigError(format!(
            "{field} must be >= 1 (got 0)"
        )));
    }
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| FleetError::ConfigError(format!("{field} is out of range (got {secs})")))
}

fn campaign_from_raw(
    name: String,
    raw: RawCampaignConfig,
    settings: &FleetSettings,
) -> Result<CampaignDefinition> {
    if raw.attack.is_empty() {
        return Err(FleetError::ConfigError(format!(
            "campaign '{name}' must contain at least one [[campaign.{name}.attack]] entry"
        )));
    }

    let count = raw.attack.len();
    let mut attacks = Vec::with_capacity(count);

    for (position, attack) in raw.attack.into_iter().enumerate() {
        if attack.name.trim().is_empty() {
            return Err(FleetError::ConfigError(format!(
                "campaign '{name}': attack #{position} has an empty name"
            )));
        }

        let total = DescriptorEstimator.total(&attack.keyspace).map_err(|err| {
            FleetError::ConfigError(format!(
                "campaign '{name}': attack '{}': {err}",
                attack.name
            ))
        })?;
        let tasks = Partition::new(total, settings.task_size).remaining();
        if tasks > settings.max_tasks_per_attack {
            return Err(FleetError::ConfigError(format!(
                "campaign '{name}': attack '{}' splits into {tasks} tasks, more than \
                 [scheduler].max_tasks_per_attack = {}",
                attack.name, settings.max_tasks_per_attack
            )));
        }

        // Out-of-range positions are absent edges, not errors.
        for &dep in attack.after.iter().filter(|&&dep| dep >= count) {
            warn!(
                campaign = %name,
                attack = %attack.name,
                dep,
                "`after` refers to a position outside the attack list; ignored"
            );
        }

        attacks.push(AttackDefinition {
            name: attack.name,
            deps: attack.after,
            keyspace: attack.keyspace,
        });
    }

    Ok(CampaignDefinition {
        name,
        priority: raw.priority,
        attacks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriorityClass;

    fn parse(toml_src: &str) -> Result<FleetConfig> {
        let raw: RawFleetConfig = toml::from_str(toml_src)?;
        FleetConfig::try_from(raw)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.settings.task_size.get(), 1_000_000);
        assert_eq!(cfg.settings.router.max_attempts, 3);
        assert_eq!(cfg.settings.liveness.sweep_interval, Duration::from_secs(60));
        assert_eq!(
            cfg.settings.liveness.offline_threshold,
            chrono::Duration::minutes(5)
        );
        assert!(cfg.campaigns.is_empty());
    }

    #[test]
    fn zero_task_size_is_rejected() {
        let err = parse("[scheduler]\ntask_size = 0\n").unwrap_err();
        assert!(matches!(err, FleetError::ConfigError(msg) if msg.contains("task_size")));
    }

    #[test]
    fn shrinking_backoff_is_rejected() {
        let err = parse("[retry]\nmultiplier = 0.5\n").unwrap_err();
        assert!(matches!(err, FleetError::ConfigError(msg) if msg.contains("multiplier")));
    }

    #[test]
    fn campaign_attacks_keep_their_order() {
        let cfg = parse(
            r#"
            [campaign.office]
            priority = "low"

            [[campaign.office.attack]]
            name = "words"
            mode = "dictionary"
            wordlist_size = 1000
            rule_count = 10

            [[campaign.office.attack]]
            name = "suffix"
            mode = "hybrid"
            wordlist_size = 1000
            mask = "?d?d"
            after = [0, 7]
            "#,
        )
        .unwrap();

        let campaign = &cfg.campaigns[0];
        assert_eq!(campaign.priority, PriorityClass::Low);
        assert_eq!(campaign.attacks[0].name, "words");
        assert_eq!(campaign.attacks[1].deps, vec![0, 7]);
    }

    #[test]
    fn attack_over_task_limit_is_rejected() {
        let err = parse(
            r#"
            [scheduler]
            task_size = 1000000
            max_tasks_per_attack = 1000

            [[campaign.wide.attack]]
            name = "all-printable"
            mode = "mask"
            mask = "?a?a?a?a?a?a?a?a"
            "#,
        )
        .unwrap_err();
        assert!(
            matches!(err, FleetError::ConfigError(msg) if msg.contains("all-printable") && msg.contains("max_tasks_per_attack"))
        );
    }

    #[test]
    fn malformed_mask_is_rejected() {
        let err = parse(
            r#"
            [[campaign.bad.attack]]
            name = "brute"
            mode = "mask"
            mask = "?x?d"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FleetError::ConfigError(msg) if msg.contains("brute")));
    }
}
