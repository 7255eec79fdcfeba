use uuid::Uuid;

pub const TOKEN_PREFIX: &str = "MBT-";
const NEVER_TARGETS: [&str; 2] = ["disk0", "disk1"];

#[derive(Debug, Clone)]
pub struct SafetyContext {
    pub force_mode: bool,
    pub confirmation_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyDecision {
    Allow,
    Deny(String),
}

impl SafetyDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, SafetyDecision::Allow)
    }
}

pub fn require_confirmation_token() -> String {
    format!("{}{}", TOKEN_PREFIX, Uuid::new_v4())
}

/// Gate in front of every destructive device operation.
pub fn can_write_to_disk(ctx: &SafetyContext) -> SafetyDecision {
    if !ctx.force_mode {
        return SafetyDecision::Deny("Denied: destructive ops require force-mode".to_string());
    }

    let Some(token) = &ctx.confirmation_token else {
        return SafetyDecision::Deny("Denied: confirmation token missing".to_string());
    };
    if !token.starts_with(TOKEN_PREFIX) || token.len() == TOKEN_PREFIX.len() {
        return SafetyDecision::Deny("Denied: invalid confirmation token".to_string());
    }

    SafetyDecision::Allow
}

/// Target check for a whole disk. `boot_disk` is `None` when it could not be
/// determined, which is treated as unsafe. `system_mounts` lists system
/// mount points found on the disk.
pub fn validate_safe_target(disk_id: &str, boot_disk: Option<&str>, system_mounts: &[String]) -> SafetyDecision {
    if NEVER_TARGETS.contains(&disk_id) {
        return SafetyDecision::Deny("disk0 and disk1 are never safe targets".to_string());
    }
    match boot_disk {
        None => return SafetyDecision::Deny("boot disk could not be determined".to_string()),
        Some(boot) if boot == disk_id => {
            return SafetyDecision::Deny(format!("{} is the boot disk", disk_id));
        }
        Some(_) => {}
    }
    if !system_mounts.is_empty() {
        return SafetyDecision::Deny(format!(
            "{} has mounted system volumes: {}",
            disk_id,
            system_mounts.join(", ")
        ));
    }
    SafetyDecision::Allow
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denies_without_force() {
        let ctx = SafetyContext {
            force_mode: false,
            confirmation_token: None,
        };
        assert!(matches!(can_write_to_disk(&ctx), SafetyDecision::Deny(_)));
    }

    #[test]
    fn denies_without_token() {
        let ctx = SafetyContext {
            force_mode: true,
            confirmation_token: None,
        };
        assert!(matches!(can_write_to_disk(&ctx), SafetyDecision::Deny(_)));
    }

    #[test]
    fn denies_invalid_token() {
        for token in ["BAD", "PHX-123", "MBT-"] {
            let ctx = SafetyContext {
                force_mode: true,
                confirmation_token: Some(token.to_string()),
            };
            assert!(matches!(can_write_to_disk(&ctx), SafetyDecision::Deny(_)), "{token}");
        }
    }

    #[test]
    fn allows_with_generated_token() {
        let ctx = SafetyContext {
            force_mode: true,
            confirmation_token: Some(require_confirmation_token()),
        };
        assert!(can_write_to_disk(&ctx).is_allowed());
    }

    #[test]
    fn protected_targets() {
        assert!(!validate_safe_target("disk0", Some("disk3"), &[]).is_allowed());
        assert!(!validate_safe_target("disk1", Some("disk3"), &[]).is_allowed());
        assert!(!validate_safe_target("disk3", Some("disk3"), &[]).is_allowed());
        assert!(!validate_safe_target("disk4", None, &[]).is_allowed());
        assert!(!validate_safe_target("disk4", Some("disk3"), &["/".to_string()]).is_allowed());
        assert!(validate_safe_target("disk4", Some("disk3"), &[]).is_allowed());
    }
}
