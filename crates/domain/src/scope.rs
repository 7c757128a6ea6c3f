use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ports::applications::ApplicationRepository;
use crate::ports::milestones::MilestoneRepository;
use crate::ports::programs::ProgramRepository;
use crate::DomainResult;

/// Ownership/role relationship between a user and an entity. Closed set: an
/// unknown scope is unrepresentable, so callers cannot pass a tag the
/// checker does not understand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessScope {
    ProgramCreator,
    ProgramValidator,
    ApplicationBuilder,
    ApplicationValidator,
    MilestoneBuilder,
    MilestoneValidator,
}

/// Outcome of a scope check. A broken link in the id chain resolves to
/// `Missing`, never `Granted`, and is kept distinct from `Denied` so a
/// data-integrity hole does not masquerade as a permission problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeDecision {
    Granted,
    Denied,
    Missing(&'static str),
}

impl ScopeDecision {
    pub fn is_granted(&self) -> bool {
        matches!(self, ScopeDecision::Granted)
    }

    /// Maps the decision to a caller-facing error: `Denied` becomes a
    /// `Forbidden` with the given message, `Missing` a `NotFound` naming the
    /// absent entity.
    pub fn require(self, denied_message: &str) -> DomainResult<()> {
        match self {
            ScopeDecision::Granted => Ok(()),
            ScopeDecision::Denied => Err(DomainError::Forbidden(denied_message.to_string())),
            ScopeDecision::Missing(entity) => Err(DomainError::NotFound(entity.to_string())),
        }
    }

    fn from_match(granted: bool) -> Self {
        if granted {
            ScopeDecision::Granted
        } else {
            ScopeDecision::Denied
        }
    }
}

/// Read-only predicate over the program/application/milestone foreign-key
/// chain. Multi-hop chains are resolved by the repository in one snapshot.
#[derive(Clone)]
pub struct ScopeService {
    programs: Arc<dyn ProgramRepository>,
    applications: Arc<dyn ApplicationRepository>,
    milestones: Arc<dyn MilestoneRepository>,
}

impl ScopeService {
    pub fn new(
        programs: Arc<dyn ProgramRepository>,
        applications: Arc<dyn ApplicationRepository>,
        milestones: Arc<dyn MilestoneRepository>,
    ) -> Self {
        Self {
            programs,
            applications,
            milestones,
        }
    }

    pub async fn check(
        &self,
        scope: AccessScope,
        user_id: &str,
        entity_id: &str,
    ) -> DomainResult<ScopeDecision> {
        match scope {
            AccessScope::ProgramCreator => {
                let Some(program) = self.programs.get_program(entity_id).await? else {
                    return Ok(ScopeDecision::Missing("program"));
                };
                Ok(ScopeDecision::from_match(program.creator_id == user_id))
            }
            AccessScope::ProgramValidator => {
                let Some(program) = self.programs.get_program(entity_id).await? else {
                    return Ok(ScopeDecision::Missing("program"));
                };
                Ok(ScopeDecision::from_match(
                    program.validator_id.as_deref() == Some(user_id),
                ))
            }
            AccessScope::ApplicationBuilder => {
                let Some(application) = self.applications.get_application(entity_id).await? else {
                    return Ok(ScopeDecision::Missing("application"));
                };
                Ok(ScopeDecision::from_match(
                    application.applicant_id == user_id,
                ))
            }
            AccessScope::ApplicationValidator => {
                let Some(chain) = self.applications.get_with_program(entity_id).await? else {
                    return Ok(ScopeDecision::Missing("application"));
                };
                let Some(program) = chain.program else {
                    return Ok(ScopeDecision::Missing("program"));
                };
                Ok(ScopeDecision::from_match(
                    program.validator_id.as_deref() == Some(user_id),
                ))
            }
            AccessScope::MilestoneBuilder => {
                let Some(chain) = self.milestones.get_chain(entity_id).await? else {
                    return Ok(ScopeDecision::Missing("milestone"));
                };
                let Some(application) = chain.application else {
                    return Ok(ScopeDecision::Missing("application"));
                };
                Ok(ScopeDecision::from_match(
                    application.applicant_id == user_id,
                ))
            }
            AccessScope::MilestoneValidator => {
                let Some(chain) = self.milestones.get_chain(entity_id).await? else {
                    return Ok(ScopeDecision::Missing("milestone"));
                };
                if chain.application.is_none() {
                    return Ok(ScopeDecision::Missing("application"));
                }
                let Some(program) = chain.program else {
                    return Ok(ScopeDecision::Missing("program"));
                };
                Ok(ScopeDecision::from_match(
                    program.validator_id.as_deref() == Some(user_id),
                ))
            }
        }
    }
}
