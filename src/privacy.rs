use crate::config::RunConfig;

/// What the pipeline is allowed to persist for a given widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureDecision {
    /// Registry, snapshot with text body, and change events.
    Observe,
    /// Registry, hash-only snapshot (NULL text body), and change events.
    MetadataOnly,
    /// Nothing is stored for this widget.
    Skip,
}

/// Roles whose content must never be captured, no matter what the
/// configuration says. Role names arrive from the accessibility bus in a
/// few spellings ("password text", "password-text"), so matching is over a
/// normalized form.
const SENSITIVE_ROLES: &[&str] = &["password text", "password", "secret text", "secret"];

pub fn is_sensitive_role(role: &str) -> bool {
    let normalized = normalize_role(role);
    SENSITIVE_ROLES.iter().any(|r| *r == normalized)
}

/// Pure policy decision for one widget. Deterministic over its inputs and
/// free of side effects.
///
/// The sensitive-role override is consulted first and cannot be lifted by
/// any flag: such widgets resolve to at most `MetadataOnly` (registry
/// bookkeeping), and the pipeline separately refuses to read their text at
/// all, so not even a content hash of a secret is derived.
pub fn decide(application: &str, role: &str, config: &RunConfig) -> CaptureDecision {
    if is_sensitive_role(role) {
        if !config.application_allowed(application) || !config.role_allowed(role) {
            return CaptureDecision::Skip;
        }
        return CaptureDecision::MetadataOnly;
    }

    if !config.application_allowed(application) || !config.role_allowed(role) {
        return CaptureDecision::Skip;
    }

    if !config.capture_content {
        return CaptureDecision::MetadataOnly;
    }

    CaptureDecision::Observe
}

fn normalize_role(role: &str) -> String {
    role.trim()
        .to_lowercase()
        .replace(['-', '_'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(capture: bool) -> RunConfig {
        RunConfig {
            capture_content: capture,
            ..RunConfig::default()
        }
    }

    #[test]
    fn capture_enabled_observes_ordinary_roles() {
        assert_eq!(
            decide("gedit", "text", &config(true)),
            CaptureDecision::Observe
        );
    }

    #[test]
    fn capture_disabled_downgrades_to_metadata() {
        assert_eq!(
            decide("gedit", "text", &config(false)),
            CaptureDecision::MetadataOnly
        );
    }

    #[test]
    fn excluded_application_skips() {
        let cfg = RunConfig {
            capture_content: true,
            exclude_apps: vec!["keepassxc".into()],
            ..RunConfig::default()
        };
        assert_eq!(decide("KeePassXC", "text", &cfg), CaptureDecision::Skip);
    }

    #[test]
    fn excluded_role_skips() {
        let cfg = RunConfig {
            capture_content: true,
            exclude_roles: vec!["terminal".into()],
            ..RunConfig::default()
        };
        assert_eq!(decide("gedit", "terminal", &cfg), CaptureDecision::Skip);
    }

    #[test]
    fn include_list_limits_scope() {
        let cfg = RunConfig {
            capture_content: true,
            include_apps: vec!["gedit".into()],
            ..RunConfig::default()
        };
        assert_eq!(decide("gedit", "text", &cfg), CaptureDecision::Observe);
        assert_eq!(decide("firefox", "text", &cfg), CaptureDecision::Skip);
    }

    #[test]
    fn sensitive_role_spellings_detected() {
        assert!(is_sensitive_role("password text"));
        assert!(is_sensitive_role("password-text"));
        assert!(is_sensitive_role("Password_Text"));
        assert!(is_sensitive_role("secret"));
        assert!(!is_sensitive_role("text"));
        assert!(!is_sensitive_role("push button"));
    }

    /// Sweep the whole configuration space: no combination of flags and
    /// filters may ever grant `Observe` to a sensitive role.
    #[test]
    fn sensitive_roles_never_observed() {
        let sensitive = ["password text", "password", "secret text", "secret"];
        let app_lists: &[Vec<String>] = &[vec![], vec!["gedit".into()]];
        for role in sensitive {
            for capture in [false, true] {
                for include_apps in app_lists {
                    for exclude_apps in app_lists {
                        for include_roles in &[vec![], vec![role.to_string()]] {
                            let cfg = RunConfig {
                                capture_content: capture,
                                include_apps: include_apps.clone(),
                                exclude_apps: exclude_apps.clone(),
                                include_roles: include_roles.clone(),
                                ..RunConfig::default()
                            };
                            let decision = decide("gedit", role, &cfg);
                            assert_ne!(
                                decision,
                                CaptureDecision::Observe,
                                "role {role:?} observed under {cfg:?}"
                            );
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn sensitive_role_in_excluded_app_skips_entirely() {
        let cfg = RunConfig {
            exclude_apps: vec!["gedit".into()],
            ..RunConfig::default()
        };
        assert_eq!(
            decide("gedit", "password text", &cfg),
            CaptureDecision::Skip
        );
    }
}
