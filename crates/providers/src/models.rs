use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Instances are released by the platform this long after they were stopped.
pub const RELEASE_AFTER_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Instance {
    pub uuid: String,
    pub machine_alias: String,
    pub region_name: String,
    pub gpu_all_num: u32,
    pub gpu_idle_num: u32,
    pub snapshot_gpu_alias_name: String,
    pub stopped_at: Option<StoppedAt>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoppedAt {
    pub time: Option<String>,
}

impl Instance {
    pub fn display_name(&self) -> String {
        format!("{}-{}", self.region_name, self.machine_alias)
    }

    pub fn has_idle_gpu(&self) -> bool {
        self.gpu_idle_num > 0
    }

    pub fn stopped_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.stopped_at.as_ref()?.time.as_deref()?;
        if raw.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Time left before a stopped instance is released, if it is still pending.
    pub fn lease_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let release_at = self.stopped_time()? + Duration::hours(RELEASE_AFTER_HOURS);
        (release_at > now).then(|| release_at - now)
    }
}

/// Response envelope shared by every platform endpoint.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        self.code == "Success"
    }

    pub fn is_auth_expired(&self) -> bool {
        self.code == "AuthorizeFailed"
    }

    pub fn message(&self) -> String {
        self.msg.clone().unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stopped(time: &str) -> Instance {
        Instance {
            stopped_at: Some(StoppedAt {
                time: Some(time.to_string()),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_instance_from_platform_json() {
        let instance: Instance = serde_json::from_value(json!({
            "uuid": "abc-123",
            "machine_alias": "m1",
            "region_name": "west",
            "gpu_all_num": 8,
            "gpu_idle_num": 2,
            "snapshot_gpu_alias_name": "RTX A6000",
            "stopped_at": {"time": "2026-10-19T08:00:00Z", "valid": true},
            "charge_type": "payg"
        }))
        .unwrap();

        assert_eq!(instance.uuid, "abc-123");
        assert_eq!(instance.display_name(), "west-m1");
        assert!(instance.has_idle_gpu());
        assert!(instance.stopped_time().is_some());
    }

    #[test]
    fn test_missing_fields_default() {
        let instance: Instance =
            serde_json::from_value(json!({"uuid": "x", "stopped_at": null})).unwrap();
        assert_eq!(instance.gpu_idle_num, 0);
        assert!(!instance.has_idle_gpu());
        assert!(instance.stopped_at.is_none());
    }

    #[test]
    fn test_lease_remaining_counts_down_from_stop_time() {
        let instance = stopped("2026-10-19T08:00:00Z");
        let now = DateTime::parse_from_rfc3339("2026-10-19T20:30:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let remaining = instance.lease_remaining(now).unwrap();
        assert_eq!(remaining.num_hours(), 11);
        assert_eq!(remaining.num_minutes() % 60, 30);
    }

    #[test]
    fn test_lease_remaining_none_after_release() {
        let instance = stopped("2026-10-17T08:00:00Z");
        let now = DateTime::parse_from_rfc3339("2026-10-19T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!(instance.lease_remaining(now).is_none());
    }

    #[test]
    fn test_lease_remaining_ignores_bad_timestamp() {
        let instance = stopped("not a time");
        assert!(instance.lease_remaining(Utc::now()).is_none());
        assert!(stopped("").lease_remaining(Utc::now()).is_none());
    }

    #[test]
    fn test_envelope_codes() {
        let ok: Envelope = serde_json::from_value(json!({"code": "Success", "data": {}})).unwrap();
        assert!(ok.is_success());

        let expired: Envelope =
            serde_json::from_value(json!({"code": "AuthorizeFailed", "msg": "expired"})).unwrap();
        assert!(expired.is_auth_expired());
        assert_eq!(expired.message(), "expired");
    }
}
