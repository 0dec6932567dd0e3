//! Forge status notifier
//!
//! Reports build and proc status back to the code host. Callers treat every
//! failure as best-effort and only log it.

use async_trait::async_trait;
use perch_core::domain::{Build, Proc, Repo};

#[derive(Debug, Clone, thiserror::Error)]
#[error("forge: {0}")]
pub struct ForgeError(pub String);

#[async_trait]
pub trait Forge: Send + Sync {
    /// Report `build` (or one of its procs when the build has several) to
    /// the forge, linking back to `link`.
    async fn status(
        &self,
        repo: &Repo,
        build: &Build,
        link: &str,
        proc: Option<&Proc>,
    ) -> Result<(), ForgeError>;
}

/// Forge used when no code host is connected: records the status in the log.
#[derive(Debug, Default)]
pub struct LogForge;

#[async_trait]
impl Forge for LogForge {
    async fn status(
        &self,
        repo: &Repo,
        build: &Build,
        link: &str,
        proc: Option<&Proc>,
    ) -> Result<(), ForgeError> {
        match proc {
            Some(proc) => tracing::debug!(
                repo = %repo.full_name,
                build = build.number,
                proc = %proc.name,
                status = %proc.state,
                link,
                "Forge status"
            ),
            None => tracing::debug!(
                repo = %repo.full_name,
                build = build.number,
                status = %build.status,
                link,
                "Forge status"
            ),
        }
        Ok(())
    }
}

/// Link to a build page on this server.
pub fn build_link(host: &str, repo: &Repo, build: &Build) -> String {
    format!(
        "{}/{}/{}",
        host.trim_end_matches('/'),
        repo.full_name,
        build.number
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_link() {
        let repo = Repo {
            full_name: "octocat/hello".to_string(),
            ..Default::default()
        };
        let build = Build {
            number: 12,
            ..Default::default()
        };
        assert_eq!(
            build_link("http://ci.example.com/", &repo, &build),
            "http://ci.example.com/octocat/hello/12"
        );
    }
}
