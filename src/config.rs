use clap::Parser;
use std::path::PathBuf;

/// schoold - school records sidecar speaking JSON lines on stdin/stdout
///
/// Process-level settings only. Workspace-level settings live in the
/// `settings` table and are edited through `setup.update`.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "schoold")]
#[command(about = "School records sidecar speaking JSON lines on stdin/stdout", long_about = None)]
pub struct DaemonConfig {
    /// Workspace directory to open at startup (or set SCHOOLD_WORKSPACE env var)
    #[arg(short, long, env = "SCHOOLD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Log filter directive, e.g. "info" or "schoold=debug" (or set SCHOOLD_LOG env var)
    #[arg(short, long = "log", env = "SCHOOLD_LOG", default_value = "info")]
    log_filter: String,
}

impl DaemonConfig {
    pub fn workspace(&self) -> Option<PathBuf> {
        self.workspace
            .as_ref()
            .filter(|p| !p.as_os_str().to_string_lossy().trim().is_empty())
            .cloned()
    }

    pub fn log_filter(&self) -> &str {
        match self.log_filter.trim() {
            "" => "info",
            v => v,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cfg = DaemonConfig::try_parse_from([
            "schoold",
            "--workspace",
            "/tmp/school-ws",
            "--log",
            " schoold=debug ",
        ])
        .expect("parse args");
        assert_eq!(cfg.log_filter(), "schoold=debug");
        assert_eq!(cfg.workspace(), Some(PathBuf::from("/tmp/school-ws")));
    }

    #[test]
    fn blank_values_fall_back() {
        let cfg = DaemonConfig::try_parse_from(["schoold", "-w", "  ", "-l", "  "]).expect("parse args");
        assert_eq!(cfg.workspace(), None);
        assert_eq!(cfg.log_filter(), "info");
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(DaemonConfig::try_parse_from(["schoold", "--port", "80"]).is_err());
    }
}
