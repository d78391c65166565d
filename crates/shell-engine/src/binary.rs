//! Engine binary checks.
//!
//! A missing or non-executable binary is a permanent startup failure; the
//! supervisor never retries it.

use std::path::Path;

use shell_core::{Result, ShellError};

/// Verify that `path` names an executable regular file.
pub fn verify_executable(path: &Path) -> Result<()> {
    let meta = std::fs::metadata(path).map_err(|e| ShellError::Startup {
        reason: format!("engine binary not found at {}: {e}", path.display()),
    })?;

    if !meta.is_file() {
        return Err(ShellError::Startup {
            reason: format!("engine binary path {} is not a file", path.display()),
        });
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if meta.permissions().mode() & 0o111 == 0 {
            return Err(ShellError::Startup {
                reason: format!("engine binary {} is not executable", path.display()),
            });
        }
    }

    Ok(())
}
