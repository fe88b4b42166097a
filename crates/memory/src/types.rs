use serde::{Deserialize, Serialize};

/// Chat-platform identity of a bot user.
pub type UserId = i64;

pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 5;
pub const MIN_CHECK_INTERVAL_SECS: u64 = 3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub grab_config: Option<GrabConfig>,
}

impl UserConfig {
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// A grab that was running when the process last persisted this config.
    pub fn wants_resume(&self) -> bool {
        self.grab_config
            .as_ref()
            .is_some_and(|grab| grab.enabled && grab.is_running)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrabConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub gpu_types: Vec<String>,
    #[serde(default)]
    pub instance_uuid: String,
    #[serde(default = "default_check_interval", rename = "check_interval")]
    pub check_interval_secs: u64,
    #[serde(default)]
    pub is_running: bool,
}

fn default_check_interval() -> u64 {
    DEFAULT_CHECK_INTERVAL_SECS
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gpu_types: Vec::new(),
            instance_uuid: String::new(),
            check_interval_secs: DEFAULT_CHECK_INTERVAL_SECS,
            is_running: false,
        }
    }
}

/// What a grab task is looking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrabTarget<'a> {
    Instance(&'a str),
    GpuTypes(&'a [String]),
    Nothing,
}

impl GrabConfig {
    /// Targets one specific instance, clearing any GPU-type targets.
    pub fn targeting_instance(mut self, uuid: &str) -> Self {
        self.instance_uuid = uuid.to_string();
        self.gpu_types.clear();
        self
    }

    /// Targets any instance whose GPU alias matches `gpu_type`.
    pub fn targeting_gpu(mut self, gpu_type: &str) -> Self {
        self.gpu_types = vec![gpu_type.to_string()];
        self.instance_uuid.clear();
        self
    }

    /// Instance UUID wins when both targets are populated.
    pub fn target(&self) -> GrabTarget<'_> {
        if !self.instance_uuid.is_empty() {
            GrabTarget::Instance(&self.instance_uuid)
        } else if !self.gpu_types.is_empty() {
            GrabTarget::GpuTypes(&self.gpu_types)
        } else {
            GrabTarget::Nothing
        }
    }

    pub fn effective_interval_secs(&self) -> u64 {
        self.check_interval_secs.max(MIN_CHECK_INTERVAL_SECS)
    }
}
