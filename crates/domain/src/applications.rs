use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::identity::ActorIdentity;
use crate::notifications::{
    NotificationAction, NotificationCreate, NotificationService, NotificationType,
};
use crate::ports::applications::ApplicationRepository;
use crate::ports::programs::ProgramRepository;
use crate::scope::{AccessScope, ScopeService};
use crate::util::{now_ms, uuid_v7_without_dashes};
use crate::visibility::VisibilityPolicy;
use crate::DomainResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    Submitted,
    Accepted,
    Rejected,
}

/// Accept-or-reject outcome shared by application and milestone review.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Accept,
    Reject,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Application {
    pub application_id: String,
    pub program_id: String,
    pub applicant_id: String,
    pub summary: Option<String>,
    pub status: ApplicationStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Clone, Debug)]
pub struct ApplicationCreate {
    pub summary: Option<String>,
}

#[derive(Clone)]
pub struct ApplicationService {
    applications: Arc<dyn ApplicationRepository>,
    programs: Arc<dyn ProgramRepository>,
    scope: ScopeService,
    policy: VisibilityPolicy,
    notifications: NotificationService,
}

impl ApplicationService {
    pub fn new(
        applications: Arc<dyn ApplicationRepository>,
        programs: Arc<dyn ProgramRepository>,
        scope: ScopeService,
        policy: VisibilityPolicy,
        notifications: NotificationService,
    ) -> Self {
        Self {
            applications,
            programs,
            scope,
            policy,
            notifications,
        }
    }

    /// Gated by the visibility policy; the program creator is notified of
    /// the new application.
    pub async fn apply(
        &self,
        actor: ActorIdentity,
        program_id: &str,
        input: ApplicationCreate,
    ) -> DomainResult<Application> {
        self.policy
            .can_apply_to_program(program_id, Some(&actor.user_id))
            .await?
            .into_result()?;

        let program = self
            .programs
            .get_program(program_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("program".to_string()))?;

        let now = now_ms();
        let application = Application {
            application_id: uuid_v7_without_dashes(),
            program_id: program_id.to_string(),
            applicant_id: actor.user_id,
            summary: input.summary.clone(),
            status: ApplicationStatus::Submitted,
            created_at_ms: now,
            updated_at_ms: now,
        };
        let application = self.applications.create_application(&application).await?;

        self.notifications
            .notify(NotificationCreate {
                recipient_id: program.creator_id,
                notification_type: NotificationType::Application,
                action: NotificationAction::Created,
                title: format!("New application for {}", program.name),
                content: input
                    .summary
                    .unwrap_or_else(|| "A builder applied to your program".to_string()),
                entity_id: Some(application.application_id.clone()),
                metadata: None,
            })
            .await?;

        Ok(application)
    }

    /// Validator-only; only submitted applications can be decided. The
    /// applicant is notified of the outcome.
    pub async fn decide(
        &self,
        actor: ActorIdentity,
        application_id: &str,
        decision: ReviewDecision,
    ) -> DomainResult<Application> {
        self.scope
            .check(AccessScope::ApplicationValidator, &actor.user_id, application_id)
            .await?
            .require("only the program validator can review applications")?;

        let chain = self
            .applications
            .get_with_program(application_id)
            .await?
            .ok_or_else(|| DomainError::NotFound("application".to_string()))?;
        if chain.application.status != ApplicationStatus::Submitted {
            return Err(DomainError::Validation(
                "application has already been decided".into(),
            ));
        }

        let (status, action) = match decision {
            ReviewDecision::Accept => (ApplicationStatus::Accepted, NotificationAction::Accepted),
            ReviewDecision::Reject => (ApplicationStatus::Rejected, NotificationAction::Rejected),
        };
        let updated = self
            .applications
            .update_application_status(application_id, status, now_ms())
            .await?;

        let program_name = chain
            .program
            .map(|program| program.name)
            .unwrap_or_else(|| "the program".to_string());
        let verdict = match decision {
            ReviewDecision::Accept => "accepted",
            ReviewDecision::Reject => "rejected",
        };
        self.notifications
            .notify(NotificationCreate {
                recipient_id: updated.applicant_id.clone(),
                notification_type: NotificationType::Application,
                action,
                title: format!("Application {verdict}"),
                content: format!("Your application to {program_name} was {verdict}"),
                entity_id: Some(application_id.to_string()),
                metadata: None,
            })
            .await?;

        Ok(updated)
    }
}
