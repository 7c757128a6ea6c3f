use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::notifications::{
    NotificationAction, NotificationCreate, NotificationService, NotificationType,
};
use crate::ports::programs::ProgramRepository;
use crate::scope::{AccessScope, ScopeService};
use crate::util::{now_ms, uuid_v7_without_dashes};
use crate::visibility::VisibilityPolicy;
use crate::DomainResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramVisibility {
    Public,
    Restricted,
    Private,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgramRoleType {
    Builder,
    Validator,
}

impl ProgramRoleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgramRoleType::Builder => "builder",
            ProgramRoleType::Validator => "validator",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Program {
    pub program_id: String,
    pub creator_id: String,
    pub validator_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub visibility: ProgramVisibility,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub program_id: String,
    pub user_id: String,
    pub role: ProgramRoleType,
    pub tier: Option<String>,
    pub assigned_by: String,
    pub created_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct ProgramCreate {
    pub name: String,
    pub description: Option<String>,
    pub visibility: ProgramVisibility,
    pub validator_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct RoleInvite {
    pub user_id: String,
    pub role: ProgramRoleType,
    pub tier: Option<String>,
}

#[derive(Clone)]
pub struct ProgramService {
    repository: Arc<dyn ProgramRepository>,
    scope: ScopeService,
    policy: VisibilityPolicy,
    notifications: NotificationService,
}

impl ProgramService {
    pub fn new(
        repository: Arc<dyn ProgramRepository>,
        scope: ScopeService,
        policy: VisibilityPolicy,
        notifications: NotificationService,
    ) -> Self {
        Self {
            repository,
            scope,
            policy,
            notifications,
        }
    }

    pub async fn create(
        &self,
        actor: ActorIdentity,
        input: ProgramCreate,
    ) -> DomainResult<Program> {
        let name = input.name.trim().to_string();
        if name.is_empty() {
            return Err(DomainError::Validation("name is required".into()));
        }
        let validator_id = match input.validator_id {
            Some(validator_id) if validator_id.trim().is_empty() => {
                return Err(DomainError::Validation("validator_id cannot be empty".into()));
            }
            other => other,
        };

        let program = Program {
            program_id: uuid_v7_without_dashes(),
            creator_id: actor.user_id,
            validator_id,
            name,
            description: input.description,
            visibility: input.visibility,
            created_at_ms: now_ms(),
        };
        self.repository.create_program(&program).await
    }

    pub async fn view(&self, viewer: Option<&str>, program_id: &str) -> DomainResult<Program> {
        self.policy
            .can_access_program(program_id, viewer)
            .await?
            .into_result()?;
        self.repository
            .get_program(program_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("program".to_string()))
    }

    /// Creator-only. The invitee is notified; an optional tier travels in
    /// the notification metadata so invitation terms survive alongside the
    /// role row.
    pub async fn invite(
        &self,
        actor: ActorIdentity,
        program_id: &str,
        input: RoleInvite,
    ) -> DomainResult<RoleAssignment> {
        if input.user_id.trim().is_empty() {
            return Err(DomainError::Validation("user_id is required".into()));
        }
        self.scope
            .check(AccessScope::ProgramCreator, &actor.user_id, program_id)
            .await?
            .require("only the program creator can assign roles")?;

        let program = self
            .repository
            .get_program(program_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("program".to_string()))?;

        let assignment = RoleAssignment {
            program_id: program_id.to_string(),
            user_id: input.user_id.clone(),
            role: input.role,
            tier: input.tier.clone(),
            assigned_by: actor.user_id,
            created_at_ms: now_ms(),
        };
        let assignment = self.repository.assign_role(&assignment).await?;

        let metadata = input.tier.map(|tier| json!({ "tier": tier }));
        self.notifications
            .notify(NotificationCreate {
                recipient_id: input.user_id,
                notification_type: NotificationType::Program,
                action: NotificationAction::Invited,
                title: format!("Invited to {}", program.name),
                content: format!(
                    "You have been invited to \"{}\" as a {}",
                    program.name,
                    input.role.as_str()
                ),
                entity_id: Some(program_id.to_string()),
                metadata,
            })
            .await?;

        Ok(assignment)
    }
}
