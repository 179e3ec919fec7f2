//! Bearer token resolution for the service REST API

use std::io::ErrorKind;

use tokio::process::Command;
use tracing::debug;

use crate::error::{RemediationError, Result};

/// Return the explicit token if one was given, otherwise ask the ambient
/// `oc` session for one.
pub async fn resolve_token(explicit: Option<String>) -> Result<String> {
    if let Some(token) = explicit.map(|t| t.trim().to_string()) {
        if token.is_empty() {
            return Err(RemediationError::NotAuthenticated(
                "an empty token was supplied".to_string(),
            ));
        }
        debug!(source = "explicit", "Using supplied bearer token");
        return Ok(token);
    }
    session_token("oc").await
}

async fn session_token(program: &str) -> Result<String> {
    let output = Command::new(program)
        .args(["whoami", "-t"])
        .output()
        .await
        .map_err(|e| match e.kind() {
            ErrorKind::NotFound => RemediationError::MissingTool {
                tool: program.to_string(),
                hint: "install the OpenShift client or pass --token".to_string(),
            },
            _ => RemediationError::Io(e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RemediationError::NotAuthenticated(format!(
            "`{} whoami -t` failed: {}",
            program,
            stderr.trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(RemediationError::NotAuthenticated(
            "the current session has no token".to_string(),
        ));
    }
    debug!(source = "session", "Using bearer token from the oc session");
    Ok(token)
}
