use std::sync::Arc;

use crate::error::DomainError;
use crate::ports::programs::ProgramRepository;
use crate::programs::{ProgramRoleType, ProgramVisibility};
use crate::DomainResult;

/// Why a viewer or applicant was turned away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DenyReason {
    ProgramNotFound,
    AuthenticationRequired,
    CreatorCannotApply,
    ValidatorCannotApply,
    RoleRequired,
    BuilderRoleRequired,
}

impl DenyReason {
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::ProgramNotFound => "program not found",
            DenyReason::AuthenticationRequired => "authentication required",
            DenyReason::CreatorCannotApply => {
                "program creators cannot apply to their own program"
            }
            DenyReason::ValidatorCannotApply => {
                "validators cannot apply to programs they validate"
            }
            DenyReason::RoleRequired => "private programs require an assigned role",
            DenyReason::BuilderRoleRequired => "private programs require a builder role",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    Denied(DenyReason),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Granted)
    }

    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            AccessDecision::Granted => None,
            AccessDecision::Denied(reason) => Some(*reason),
        }
    }

    pub fn into_result(self) -> DomainResult<()> {
        match self {
            AccessDecision::Granted => Ok(()),
            AccessDecision::Denied(DenyReason::ProgramNotFound) => {
                Err(DomainError::NotFound("program".to_string()))
            }
            AccessDecision::Denied(DenyReason::AuthenticationRequired) => {
                Err(DomainError::Unauthorized)
            }
            AccessDecision::Denied(reason) => {
                Err(DomainError::Forbidden(reason.message().to_string()))
            }
        }
    }
}

/// Derives who may view or apply to a program from its visibility and the
/// role assignments. Access widens monotonically: public ⊇ restricted ⊇
/// private.
#[derive(Clone)]
pub struct VisibilityPolicy {
    programs: Arc<dyn ProgramRepository>,
}

impl VisibilityPolicy {
    pub fn new(programs: Arc<dyn ProgramRepository>) -> Self {
        Self { programs }
    }

    pub async fn can_access_program(
        &self,
        program_id: &str,
        viewer: Option<&str>,
    ) -> DomainResult<AccessDecision> {
        let Some(program) = self.programs.get_program(program_id).await? else {
            return Ok(AccessDecision::Denied(DenyReason::ProgramNotFound));
        };

        match program.visibility {
            ProgramVisibility::Public | ProgramVisibility::Restricted => {
                Ok(AccessDecision::Granted)
            }
            ProgramVisibility::Private => {
                let Some(viewer) = viewer else {
                    return Ok(AccessDecision::Denied(DenyReason::AuthenticationRequired));
                };
                if program.creator_id == viewer {
                    return Ok(AccessDecision::Granted);
                }
                let roles = self.programs.list_roles(program_id, viewer).await?;
                if roles.is_empty() {
                    Ok(AccessDecision::Denied(DenyReason::RoleRequired))
                } else {
                    Ok(AccessDecision::Granted)
                }
            }
        }
    }

    pub async fn can_apply_to_program(
        &self,
        program_id: &str,
        applicant: Option<&str>,
    ) -> DomainResult<AccessDecision> {
        let Some(program) = self.programs.get_program(program_id).await? else {
            return Ok(AccessDecision::Denied(DenyReason::ProgramNotFound));
        };
        let Some(applicant) = applicant else {
            return Ok(AccessDecision::Denied(DenyReason::AuthenticationRequired));
        };
        if program.creator_id == applicant {
            return Ok(AccessDecision::Denied(DenyReason::CreatorCannotApply));
        }

        match program.visibility {
            ProgramVisibility::Public | ProgramVisibility::Restricted => {
                Ok(AccessDecision::Granted)
            }
            ProgramVisibility::Private => {
                let roles = self.programs.list_roles(program_id, applicant).await?;
                // A validator role vetoes application eligibility even when a
                // builder role coexists for the same user.
                if roles
                    .iter()
                    .any(|role| role.role == ProgramRoleType::Validator)
                {
                    return Ok(AccessDecision::Denied(DenyReason::ValidatorCannotApply));
                }
                if roles
                    .iter()
                    .any(|role| role.role == ProgramRoleType::Builder)
                {
                    Ok(AccessDecision::Granted)
                } else {
                    Ok(AccessDecision::Denied(DenyReason::BuilderRoleRequired))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_before_authentication() {
        let err = AccessDecision::Denied(DenyReason::ProgramNotFound)
            .into_result()
            .expect_err("must deny");
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn validator_veto_is_a_forbidden_error_with_its_own_message() {
        let err = AccessDecision::Denied(DenyReason::ValidatorCannotApply)
            .into_result()
            .expect_err("must deny");
        match err {
            DomainError::Forbidden(message) => {
                assert_eq!(message, "validators cannot apply to programs they validate");
            }
            other => panic!("expected forbidden, got {other:?}"),
        }
    }
}
