//! Checks run before any command touches the hypervisor.

use crate::config::ProvisioningRequest;
use crate::error::TemplateError;

/// Every file the run reads must exist. All missing files are reported at
/// once.
pub fn check_prerequisites(req: &ProvisioningRequest) -> Result<(), TemplateError> {
    let files = [
        ("image", &req.image),
        ("ci_file", &req.ci_file),
        ("ssh_key", &req.ssh_key),
    ];

    let missing: Vec<String> = files
        .iter()
        .filter(|(_, path)| !path.is_file())
        .map(|(key, path)| format!("{key} ({})", path.display()))
        .collect();

    if !missing.is_empty() {
        return Err(TemplateError::MissingFiles { missing });
    }

    tracing::debug!("prerequisite files present");
    Ok(())
}
