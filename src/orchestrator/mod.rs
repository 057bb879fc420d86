//! Pipeline orchestration: the fixed macro-pipeline of work agents, the
//! store-backed pause/resume control, and the development-loop runner.
//!
//! ## Module Map
//!
//! | Module    | Responsibility                                          |
//! |-----------|---------------------------------------------------------|
//! | `mod`     | `RoleId` catalog: the 13 work agents and their ordering |
//! | `control` | `PipelineControl` row: pause/resume + CAS activation    |
//! | `runner`  | `PipelineRunner`: sequencing, records, escalation       |

use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod control;
pub mod runner;

pub use control::ResumeReport;
pub use runner::{PipelineRunner, RunOutcome, RunnerOptions};

/// Identifier of a work agent in the macro-pipeline.
///
/// The pipeline runs `requirements-analyst` through `notifier` in order;
/// the development loop (scrum-master / developer / reviewer / tester) sits
/// between decomposition and packaging. `issue-reporter` is outside the
/// sequence: it is invoked best-effort when any other role fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoleId {
    RequirementsAnalyst,
    SolutionArchitect,
    BacklogPlanner,
    ScrumMaster,
    Developer,
    Reviewer,
    Tester,
    ReleasePackager,
    RepoPublisher,
    SiteDeployer,
    DeployVerifier,
    Notifier,
    IssueReporter,
}

impl RoleId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequirementsAnalyst => "requirements-analyst",
            Self::SolutionArchitect => "solution-architect",
            Self::BacklogPlanner => "backlog-planner",
            Self::ScrumMaster => "scrum-master",
            Self::Developer => "developer",
            Self::Reviewer => "reviewer",
            Self::Tester => "tester",
            Self::ReleasePackager => "release-packager",
            Self::RepoPublisher => "repo-publisher",
            Self::SiteDeployer => "site-deployer",
            Self::DeployVerifier => "deploy-verifier",
            Self::Notifier => "notifier",
            Self::IssueReporter => "issue-reporter",
        }
    }

    /// Human-readable name recorded on each execution record.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::RequirementsAnalyst => "Requirements Analyst",
            Self::SolutionArchitect => "Solution Architect",
            Self::BacklogPlanner => "Backlog Planner",
            Self::ScrumMaster => "Scrum Master",
            Self::Developer => "Developer",
            Self::Reviewer => "Reviewer",
            Self::Tester => "Tester",
            Self::ReleasePackager => "Release Packager",
            Self::RepoPublisher => "Repository Publisher",
            Self::SiteDeployer => "Site Deployer",
            Self::DeployVerifier => "Deploy Verifier",
            Self::Notifier => "Notifier",
            Self::IssueReporter => "Issue Reporter",
        }
    }

    /// All thirteen work agents.
    pub fn all() -> &'static [RoleId] {
        &[
            Self::RequirementsAnalyst,
            Self::SolutionArchitect,
            Self::BacklogPlanner,
            Self::ScrumMaster,
            Self::Developer,
            Self::Reviewer,
            Self::Tester,
            Self::ReleasePackager,
            Self::RepoPublisher,
            Self::SiteDeployer,
            Self::DeployVerifier,
            Self::Notifier,
            Self::IssueReporter,
        ]
    }

    /// Roles that participate in the development loop. Only their records
    /// feed phase derivation.
    pub fn development_loop() -> &'static [RoleId] {
        &[
            Self::ScrumMaster,
            Self::Developer,
            Self::Reviewer,
            Self::Tester,
        ]
    }

    /// Downstream steps that are skipped (with a logged reason, never
    /// failed) when the project has no target repository configured.
    pub fn requires_target_repo(&self) -> bool {
        matches!(
            self,
            Self::ReleasePackager | Self::RepoPublisher | Self::SiteDeployer | Self::DeployVerifier
        )
    }
}

impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "requirements-analyst" => Ok(Self::RequirementsAnalyst),
            "solution-architect" => Ok(Self::SolutionArchitect),
            "backlog-planner" => Ok(Self::BacklogPlanner),
            "scrum-master" => Ok(Self::ScrumMaster),
            "developer" => Ok(Self::Developer),
            "reviewer" => Ok(Self::Reviewer),
            "tester" => Ok(Self::Tester),
            "release-packager" => Ok(Self::ReleasePackager),
            "repo-publisher" => Ok(Self::RepoPublisher),
            "site-deployer" => Ok(Self::SiteDeployer),
            "deploy-verifier" => Ok(Self::DeployVerifier),
            "notifier" => Ok(Self::Notifier),
            "issue-reporter" => Ok(Self::IssueReporter),
            _ => Err(format!("Invalid role id: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_id_roundtrip() {
        for role in RoleId::all() {
            let parsed: RoleId = role.as_str().parse().unwrap();
            assert_eq!(parsed, *role);
        }
        assert!("scrum_master".parse::<RoleId>().is_err());
    }

    #[test]
    fn test_catalog_has_thirteen_agents() {
        assert_eq!(RoleId::all().len(), 13);
    }

    #[test]
    fn test_serde_uses_kebab_case() {
        assert_eq!(
            serde_json::to_string(&RoleId::ScrumMaster).unwrap(),
            "\"scrum-master\""
        );
        assert_eq!(
            serde_json::from_str::<RoleId>("\"issue-reporter\"").unwrap(),
            RoleId::IssueReporter
        );
    }

    #[test]
    fn test_optional_steps_are_the_deployment_tail() {
        assert!(RoleId::ReleasePackager.requires_target_repo());
        assert!(RoleId::DeployVerifier.requires_target_repo());
        assert!(!RoleId::ScrumMaster.requires_target_repo());
        assert!(!RoleId::Notifier.requires_target_repo());
    }

    #[test]
    fn test_development_loop_membership() {
        let dev = RoleId::development_loop();
        assert!(dev.contains(&RoleId::ScrumMaster));
        assert!(dev.contains(&RoleId::Tester));
        assert!(!dev.contains(&RoleId::BacklogPlanner));
    }
}
