//! Reload configuration

use std::sync::OnceLock;

static DIRECT_PATCH_ENABLED: OnceLock<bool> = OnceLock::new();

fn parse_env_truthy(value: &str) -> bool {
    !matches!(value.trim(), "" | "0")
        && !value.trim().eq_ignore_ascii_case("false")
        && !value.trim().eq_ignore_ascii_case("off")
        && !value.trim().eq_ignore_ascii_case("no")
}

/// Check whether direct entry patching is enabled via environment flags.
///
/// Enabled by default. Set `LUTRA_DISABLE_PATCH=1` to force every artifact
/// onto the cooperative override channel (artifacts without a slot degrade),
/// which is useful when bisecting patching problems.
pub fn is_direct_patch_enabled() -> bool {
    *DIRECT_PATCH_ENABLED.get_or_init(|| {
        !std::env::var("LUTRA_DISABLE_PATCH")
            .ok()
            .is_some_and(|v| parse_env_truthy(&v))
    })
}

/// Settings for one reload context.
#[derive(Debug, Clone, Copy)]
pub struct ReloadConfig {
    /// Whether the direct-patch strategy may be attempted
    pub direct_patch_enabled: bool,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            direct_patch_enabled: true,
        }
    }
}

impl ReloadConfig {
    /// Build a config from environment flags.
    pub fn from_env() -> Self {
        Self {
            direct_patch_enabled: is_direct_patch_enabled(),
        }
    }

    /// Config with direct patching off, regardless of environment.
    pub fn fallback_only() -> Self {
        Self {
            direct_patch_enabled: false,
        }
    }
}
