//! Selection of the instance a grab task should power on.

use autodl_claw_memory::GrabTarget;
use autodl_claw_providers::Instance;

/// First instance in listing order that satisfies `target` and has an idle GPU.
pub fn find_candidate<'a>(target: &GrabTarget<'_>, instances: &'a [Instance]) -> Option<&'a Instance> {
    match target {
        GrabTarget::Instance(uuid) => instances
            .iter()
            .find(|instance| instance.uuid == *uuid && instance.has_idle_gpu()),
        GrabTarget::GpuTypes(gpu_types) => instances.iter().find(|instance| {
            instance.has_idle_gpu() && matches_gpu_type(&instance.snapshot_gpu_alias_name, gpu_types)
        }),
        GrabTarget::Nothing => None,
    }
}

/// Exact or substring match of a GPU alias against any wanted type.
pub fn matches_gpu_type(alias: &str, gpu_types: &[String]) -> bool {
    gpu_types
        .iter()
        .filter(|wanted| !wanted.is_empty())
        .any(|wanted| alias == wanted.as_str() || alias.contains(wanted.as_str()))
}
