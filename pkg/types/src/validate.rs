use anyhow::{Result, bail};

/// Maximum length of a namespace-style name.
const MAX_NAME_LEN: usize = 63;

/// Validate a Kubernetes-style resource name.
/// Rules: lowercase `[a-z0-9-]`, max 63 chars, no leading/trailing hyphens.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name.len() > MAX_NAME_LEN {
        bail!("name '{}' exceeds {} characters (got {})", name, MAX_NAME_LEN, name.len());
    }
    if name.starts_with('-') || name.ends_with('-') {
        bail!("name '{}' must not start or end with a hyphen", name);
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        bail!(
            "name '{}' must contain only lowercase letters, digits, and hyphens [a-z0-9-]",
            name
        );
    }
    Ok(())
}

/// Validate a sub-namespace name together with the child namespace address it produces.
pub fn validate_subnamespace_name(parent: &str, name: &str) -> Result<()> {
    validate_name(name)?;
    let child = format!("{}-{}", parent, name);
    if child.len() > MAX_NAME_LEN {
        bail!(
            "child namespace '{}' exceeds {} characters; shorten '{}'",
            child,
            MAX_NAME_LEN,
            name
        );
    }
    Ok(())
}
