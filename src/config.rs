use std::path::PathBuf;
use std::time::Duration;

/// Frozen operating parameters for one run. Built once at startup from the
/// CLI surface and passed by reference to every component that needs a
/// policy decision; never mutated afterwards.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub db_path: PathBuf,
    /// Perform a single tree scan and exit instead of monitoring.
    pub once: bool,
    /// Persist raw text bodies. Off by default: only hashes and metadata
    /// are stored until the operator opts in.
    pub capture_content: bool,
    pub include_apps: Vec<String>,
    pub exclude_apps: Vec<String>,
    pub include_roles: Vec<String>,
    pub exclude_roles: Vec<String>,
    /// Interval between periodic rescans of the full tree.
    pub scan_interval: Duration,
    /// How long to wait for the accessibility bus before giving up.
    pub bus_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("axwatch.sqlite3"),
            once: false,
            capture_content: false,
            include_apps: Vec::new(),
            exclude_apps: Vec::new(),
            include_roles: Vec::new(),
            exclude_roles: Vec::new(),
            scan_interval: Duration::from_millis(500),
            bus_timeout: Duration::from_secs(10),
        }
    }
}

impl RunConfig {
    /// Application filter. Names compare case-insensitively; an explicit
    /// exclude beats an include.
    pub fn application_allowed(&self, application: &str) -> bool {
        let lowered = application.to_lowercase();
        if self
            .exclude_apps
            .iter()
            .any(|app| app.to_lowercase() == lowered)
        {
            return false;
        }
        if self.include_apps.is_empty() {
            return true;
        }
        self.include_apps
            .iter()
            .any(|app| app.to_lowercase() == lowered)
    }

    /// Role filter. Roles compare exactly; an explicit exclude beats an
    /// include.
    pub fn role_allowed(&self, role: &str) -> bool {
        if self.exclude_roles.iter().any(|r| r == role) {
            return false;
        }
        if self.include_roles.is_empty() {
            return true;
        }
        self.include_roles.iter().any(|r| r == role)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.scan_interval.is_zero() {
            return Err("scan interval must be greater than zero".into());
        }
        if self.db_path.as_os_str().is_empty() {
            return Err("database path must not be empty".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclude_beats_include() {
        let cfg = RunConfig {
            include_apps: vec!["gedit".into()],
            exclude_apps: vec!["gedit".into()],
            ..RunConfig::default()
        };
        assert!(!cfg.application_allowed("gedit"));
    }

    #[test]
    fn application_matching_is_case_insensitive() {
        let cfg = RunConfig {
            include_apps: vec!["Firefox".into()],
            ..RunConfig::default()
        };
        assert!(cfg.application_allowed("firefox"));
        assert!(!cfg.application_allowed("gedit"));
    }

    #[test]
    fn empty_filters_allow_everything() {
        let cfg = RunConfig::default();
        assert!(cfg.application_allowed("anything"));
        assert!(cfg.role_allowed("text"));
    }

    #[test]
    fn role_matching_is_exact() {
        let cfg = RunConfig {
            include_roles: vec!["text".into()],
            ..RunConfig::default()
        };
        assert!(cfg.role_allowed("text"));
        assert!(!cfg.role_allowed("Text"));
    }

    #[test]
    fn zero_interval_rejected() {
        let cfg = RunConfig {
            scan_interval: Duration::ZERO,
            ..RunConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
