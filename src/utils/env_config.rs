//! Environment-variable parsing helpers.
//!
//! Every env read in the crate goes through these so the truthy parsing
//! lives in one place.

use std::path::PathBuf;

/// Overrides the shader directory ahead of the config file.
pub const SHADER_DIR_VAR: &str = "HDR_TONEMAP_SHADER_DIR";
/// Any truthy value makes the orchestrator refuse the GPU backend.
pub const FORCE_CPU_VAR: &str = "HDR_TONEMAP_FORCE_CPU";

/// `true` when the variable is `1`, `true`, `yes` or `on` (case-insensitive, trimmed).
#[inline]
pub fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| is_truthy(&raw))
        .unwrap_or(false)
}

/// Non-empty value of the variable as a path.
#[inline]
pub fn env_var_path(var_name: &str) -> Option<PathBuf> {
    std::env::var_os(var_name)
        .filter(|raw| !raw.is_empty())
        .map(PathBuf::from)
}

pub fn force_cpu() -> bool {
    env_var_truthy(FORCE_CPU_VAR)
}

fn is_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes" || normalized == "on"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthy_values() {
        for v in ["1", "true", "TRUE", " yes ", "On"] {
            assert!(is_truthy(v), "{:?}", v);
        }
        for v in ["", "0", "false", "off", "nope"] {
            assert!(!is_truthy(v), "{:?}", v);
        }
    }

    #[test]
    fn test_unset_variables() {
        let name = "HDR_TONEMAP_TEST_SURELY_UNSET_VARIABLE";
        assert!(!env_var_truthy(name));
        assert!(env_var_path(name).is_none());
    }
}
