use std::sync::Arc;

use ludium_domain::applications::{Application, ApplicationStatus};
use ludium_domain::error::DomainError;
use ludium_domain::milestones::{Milestone, MilestoneStatus};
use ludium_domain::notifications::{Notification, NotificationFilter, NotificationTab, SortOrder};
use ludium_domain::ports::applications::{ApplicationChain, ApplicationRepository};
use ludium_domain::ports::milestones::{MilestoneChain, MilestoneRepository};
use ludium_domain::ports::notifications::{NotificationListQuery, NotificationRepository};
use ludium_domain::ports::programs::ProgramRepository;
use ludium_domain::ports::BoxFuture;
use ludium_domain::programs::{Program, RoleAssignment};
use ludium_domain::DomainResult;
use serde::de::DeserializeOwned;
use serde_json::Value;
use surrealdb::engine::remote::ws::Client;
use surrealdb::Surreal;

use crate::db::{self, DbConfig};

const PROGRAM_FIELDS: &str =
    "program_id, creator_id, validator_id, name, description, visibility, created_at_ms";
const ROLE_FIELDS: &str = "program_id, user_id, role, tier, assigned_by, created_at_ms";
const APPLICATION_FIELDS: &str =
    "application_id, program_id, applicant_id, summary, status, created_at_ms, updated_at_ms";
const MILESTONE_FIELDS: &str =
    "milestone_id, application_id, title, amount, deadline_ms, status, created_at_ms, updated_at_ms";
const NOTIFICATION_FIELDS: &str = "notification_id, recipient_id, notification_type, action, \
     title, content, entity_id, metadata, read_at_ms, created_at_ms";

/// SurrealDB backend. Record ids are deterministic (`type::thing` over the
/// natural key) so uniqueness constraints fall out of record creation and a
/// duplicate surfaces as `Conflict`.
pub struct SurrealStore {
    client: Arc<Surreal<Client>>,
}

impl SurrealStore {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: db::connect(db_config).await?,
        })
    }

    fn map_surreal_error(err: surrealdb::Error) -> DomainError {
        let message = err.to_string().to_lowercase();
        if message.contains("already exists")
            || message.contains("duplicate")
            || message.contains("unique")
        {
            return DomainError::Conflict;
        }
        DomainError::Storage(format!("surreal query failed: {message}"))
    }

    fn decode_row<T: DeserializeOwned>(row: Value, what: &str) -> DomainResult<T> {
        serde_json::from_value(row)
            .map_err(|err| DomainError::Storage(format!("invalid {what} row: {err}")))
    }

    fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>, what: &str) -> DomainResult<Vec<T>> {
        rows.into_iter()
            .map(|row| Self::decode_row(row, what))
            .collect()
    }

    fn take_rows(
        response: &mut surrealdb::Response,
        index: usize,
    ) -> DomainResult<Vec<Value>> {
        response
            .take(index)
            .map_err(|err| DomainError::Storage(format!("invalid query result: {err}")))
    }

    fn to_row<T: serde::Serialize>(value: &T) -> DomainResult<Value> {
        serde_json::to_value(value)
            .map_err(|err| DomainError::Storage(format!("row serialization failed: {err}")))
    }

    async fn create_record(
        client: &Surreal<Client>,
        table: &'static str,
        key: String,
        data: Value,
    ) -> DomainResult<()> {
        client
            .query(format!(
                "CREATE type::thing('{table}', $key) CONTENT $data RETURN NONE"
            ))
            .bind(("key", key))
            .bind(("data", data))
            .await
            .map_err(Self::map_surreal_error)?
            .check()
            .map_err(Self::map_surreal_error)?;
        Ok(())
    }
}

/// Renders the closed filter set as a SurrealQL conjunction. The mandatory
/// recipient predicate always leads; `$recipient_id` is bound by the caller.
fn filter_clause(filters: &[NotificationFilter]) -> String {
    let mut clause = String::from("recipient_id = $recipient_id");
    for filter in filters {
        match filter {
            NotificationFilter::Tab(NotificationTab::All)
            | NotificationFilter::Unread(false) => {}
            NotificationFilter::Tab(NotificationTab::Reclaim) => clause.push_str(
                " AND notification_type IN ['program', 'milestone', 'application'] \
                 AND action = 'completed' AND metadata.reason = 'deadline_passed'",
            ),
            NotificationFilter::Tab(NotificationTab::InvestmentCondition) => clause.push_str(
                " AND notification_type = 'program' AND action = 'invited' \
                 AND metadata.tier != NONE AND metadata.tier != NULL",
            ),
            NotificationFilter::Tab(NotificationTab::Progress) => clause.push_str(
                " AND ((notification_type = 'program' AND action IN ['accepted', 'rejected']) \
                 OR (notification_type = 'application' \
                     AND action IN ['accepted', 'rejected', 'submitted', 'created']) \
                 OR (notification_type = 'milestone' \
                     AND action IN ['accepted', 'submitted', 'created']))",
            ),
            NotificationFilter::Unread(true) => clause.push_str(" AND read_at_ms = NONE"),
        }
    }
    clause
}

fn sort_direction(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    }
}

impl ProgramRepository for SurrealStore {
    fn create_program(&self, program: &Program) -> BoxFuture<'_, DomainResult<Program>> {
        let program = program.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let data = Self::to_row(&program)?;
            Self::create_record(&client, "program", program.program_id.clone(), data).await?;
            Ok(program)
        })
    }

    fn get_program(&self, program_id: &str) -> BoxFuture<'_, DomainResult<Option<Program>>> {
        let program_id = program_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT {PROGRAM_FIELDS} FROM program WHERE program_id = $program_id LIMIT 1"
                ))
                .bind(("program_id", program_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut rows = Self::take_rows(&mut response, 0)?;
            rows.pop()
                .map(|row| Self::decode_row(row, "program"))
                .transpose()
        })
    }

    fn assign_role(
        &self,
        assignment: &RoleAssignment,
    ) -> BoxFuture<'_, DomainResult<RoleAssignment>> {
        let assignment = assignment.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let key = format!(
                "{}:{}:{}",
                assignment.program_id,
                assignment.user_id,
                assignment.role.as_str()
            );
            let data = Self::to_row(&assignment)?;
            Self::create_record(&client, "program_role", key, data).await?;
            Ok(assignment)
        })
    }

    fn list_roles(
        &self,
        program_id: &str,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<RoleAssignment>>> {
        let program_id = program_id.to_string();
        let user_id = user_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT {ROLE_FIELDS} FROM program_role \
                     WHERE program_id = $program_id AND user_id = $user_id \
                     ORDER BY created_at_ms ASC"
                ))
                .bind(("program_id", program_id))
                .bind(("user_id", user_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let rows = Self::take_rows(&mut response, 0)?;
            Self::decode_rows(rows, "program_role")
        })
    }
}

impl ApplicationRepository for SurrealStore {
    fn create_application(
        &self,
        application: &Application,
    ) -> BoxFuture<'_, DomainResult<Application>> {
        let application = application.clone();
        let client = self.client.clone();
        Box::pin(async move {
            // Keyed by (program, applicant): the second application from the
            // same user collides on the record id.
            let key = format!("{}:{}", application.program_id, application.applicant_id);
            let data = Self::to_row(&application)?;
            Self::create_record(&client, "application", key, data).await?;
            Ok(application)
        })
    }

    fn get_application(
        &self,
        application_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Application>>> {
        let application_id = application_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT {APPLICATION_FIELDS} FROM application \
                     WHERE application_id = $application_id LIMIT 1"
                ))
                .bind(("application_id", application_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut rows = Self::take_rows(&mut response, 0)?;
            rows.pop()
                .map(|row| Self::decode_row(row, "application"))
                .transpose()
        })
    }

    fn get_with_program(
        &self,
        application_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<ApplicationChain>>> {
        let application_id = application_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            // One round trip resolves the whole chain from one snapshot.
            let mut response = client
                .query(format!(
                    "LET $applications = (SELECT {APPLICATION_FIELDS} FROM application \
                         WHERE application_id = $application_id LIMIT 1); \
                     LET $programs = (SELECT {PROGRAM_FIELDS} FROM program \
                         WHERE program_id = $applications[0].program_id LIMIT 1); \
                     RETURN {{ application: $applications, program: $programs }};"
                ))
                .bind(("application_id", application_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let chain: Option<Value> = response
                .take(2)
                .map_err(|err| DomainError::Storage(format!("invalid query result: {err}")))?;
            let Some(chain) = chain else {
                return Ok(None);
            };
            let Some(application) = first_row(&chain, "application") else {
                return Ok(None);
            };
            let application: Application = Self::decode_row(application, "application")?;
            let program = first_row(&chain, "program")
                .map(|row| Self::decode_row::<Program>(row, "program"))
                .transpose()?;
            Ok(Some(ApplicationChain {
                application,
                program,
            }))
        })
    }

    fn update_application_status(
        &self,
        application_id: &str,
        status: ApplicationStatus,
        updated_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Application>> {
        let application_id = application_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let status = Self::to_row(&status)?;
            let mut response = client
                .query(
                    "UPDATE application SET status = $status, updated_at_ms = $updated_at_ms \
                     WHERE application_id = $application_id RETURN NONE",
                )
                .query(format!(
                    "SELECT {APPLICATION_FIELDS} FROM application \
                     WHERE application_id = $application_id LIMIT 1"
                ))
                .bind(("application_id", application_id))
                .bind(("status", status))
                .bind(("updated_at_ms", updated_at_ms))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut rows = Self::take_rows(&mut response, 1)?;
            rows.pop()
                .map(|row| Self::decode_row(row, "application"))
                .transpose()?
                .ok_or_else(|| DomainError::NotFound("application".to_string()))
        })
    }
}

impl MilestoneRepository for SurrealStore {
    fn create_milestone(&self, milestone: &Milestone) -> BoxFuture<'_, DomainResult<Milestone>> {
        let milestone = milestone.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let data = Self::to_row(&milestone)?;
            Self::create_record(&client, "milestone", milestone.milestone_id.clone(), data)
                .await?;
            Ok(milestone)
        })
    }

    fn get_chain(
        &self,
        milestone_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<MilestoneChain>>> {
        let milestone_id = milestone_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "LET $milestones = (SELECT {MILESTONE_FIELDS} FROM milestone \
                         WHERE milestone_id = $milestone_id LIMIT 1); \
                     LET $applications = (SELECT {APPLICATION_FIELDS} FROM application \
                         WHERE application_id = $milestones[0].application_id LIMIT 1); \
                     LET $programs = (SELECT {PROGRAM_FIELDS} FROM program \
                         WHERE program_id = $applications[0].program_id LIMIT 1); \
                     RETURN {{ milestone: $milestones, application: $applications, \
                               program: $programs }};"
                ))
                .bind(("milestone_id", milestone_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let chain: Option<Value> = response
                .take(3)
                .map_err(|err| DomainError::Storage(format!("invalid query result: {err}")))?;
            let Some(chain) = chain else {
                return Ok(None);
            };
            let Some(milestone) = first_row(&chain, "milestone") else {
                return Ok(None);
            };
            let milestone: Milestone = Self::decode_row(milestone, "milestone")?;
            let application = first_row(&chain, "application")
                .map(|row| Self::decode_row::<Application>(row, "application"))
                .transpose()?;
            let program = first_row(&chain, "program")
                .map(|row| Self::decode_row::<Program>(row, "program"))
                .transpose()?;
            Ok(Some(MilestoneChain {
                milestone,
                application,
                program,
            }))
        })
    }

    fn update_milestone_status(
        &self,
        milestone_id: &str,
        status: MilestoneStatus,
        updated_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Milestone>> {
        let milestone_id = milestone_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let status = Self::to_row(&status)?;
            let mut response = client
                .query(
                    "UPDATE milestone SET status = $status, updated_at_ms = $updated_at_ms \
                     WHERE milestone_id = $milestone_id RETURN NONE",
                )
                .query(format!(
                    "SELECT {MILESTONE_FIELDS} FROM milestone \
                     WHERE milestone_id = $milestone_id LIMIT 1"
                ))
                .bind(("milestone_id", milestone_id))
                .bind(("status", status))
                .bind(("updated_at_ms", updated_at_ms))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut rows = Self::take_rows(&mut response, 1)?;
            rows.pop()
                .map(|row| Self::decode_row(row, "milestone"))
                .transpose()?
                .ok_or_else(|| DomainError::NotFound("milestone".to_string()))
        })
    }
}

impl NotificationRepository for SurrealStore {
    fn create_notification(
        &self,
        notification: &Notification,
    ) -> BoxFuture<'_, DomainResult<Notification>> {
        let notification = notification.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let data = Self::to_row(&notification)?;
            Self::create_record(
                &client,
                "notification",
                notification.notification_id.clone(),
                data,
            )
            .await?;
            Ok(notification)
        })
    }

    fn get_notification(
        &self,
        recipient_id: &str,
        notification_id: &str,
    ) -> BoxFuture<'_, DomainResult<Option<Notification>>> {
        let recipient_id = recipient_id.to_string();
        let notification_id = notification_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(format!(
                    "SELECT {NOTIFICATION_FIELDS} FROM notification \
                     WHERE notification_id = $notification_id \
                     AND recipient_id = $recipient_id LIMIT 1"
                ))
                .bind(("notification_id", notification_id))
                .bind(("recipient_id", recipient_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut rows = Self::take_rows(&mut response, 0)?;
            rows.pop()
                .map(|row| Self::decode_row(row, "notification"))
                .transpose()
        })
    }

    fn list_notifications(
        &self,
        query: &NotificationListQuery,
    ) -> BoxFuture<'_, DomainResult<Vec<Notification>>> {
        let query = query.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let clause = filter_clause(&query.filters);
            let direction = sort_direction(query.sort);
            let mut response = client
                .query(format!(
                    "SELECT {NOTIFICATION_FIELDS} FROM notification WHERE {clause} \
                     ORDER BY created_at_ms {direction}, notification_id {direction} \
                     LIMIT $limit START $offset"
                ))
                .bind(("recipient_id", query.recipient_id))
                .bind(("limit", query.limit as i64))
                .bind(("offset", query.offset as i64))
                .await
                .map_err(Self::map_surreal_error)?;
            let rows = Self::take_rows(&mut response, 0)?;
            Self::decode_rows(rows, "notification")
        })
    }

    fn count_notifications(
        &self,
        query: &NotificationListQuery,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        let query = query.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let clause = filter_clause(&query.filters);
            let mut response = client
                .query(format!(
                    "SELECT count() AS total FROM notification WHERE {clause} GROUP ALL"
                ))
                .bind(("recipient_id", query.recipient_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let rows = Self::take_rows(&mut response, 0)?;
            Ok(rows
                .first()
                .and_then(|row| row.get("total"))
                .and_then(Value::as_u64)
                .unwrap_or(0))
        })
    }

    fn mark_read(
        &self,
        recipient_id: &str,
        notification_id: &str,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<Notification>> {
        let recipient_id = recipient_id.to_string();
        let notification_id = notification_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            // The recipient predicate keeps another tenant's row untouched
            // and indistinguishable from a missing one.
            let mut response = client
                .query(
                    "UPDATE notification SET read_at_ms = $read_at_ms \
                     WHERE notification_id = $notification_id \
                     AND recipient_id = $recipient_id \
                     AND read_at_ms = NONE RETURN NONE",
                )
                .query(format!(
                    "SELECT {NOTIFICATION_FIELDS} FROM notification \
                     WHERE notification_id = $notification_id \
                     AND recipient_id = $recipient_id LIMIT 1"
                ))
                .bind(("notification_id", notification_id))
                .bind(("recipient_id", recipient_id))
                .bind(("read_at_ms", read_at_ms))
                .await
                .map_err(Self::map_surreal_error)?;
            let mut rows = Self::take_rows(&mut response, 1)?;
            rows.pop()
                .map(|row| Self::decode_row(row, "notification"))
                .transpose()?
                .ok_or_else(|| DomainError::NotFound("notification".to_string()))
        })
    }

    fn mark_all_read(
        &self,
        recipient_id: &str,
        read_at_ms: i64,
    ) -> BoxFuture<'_, DomainResult<u64>> {
        let recipient_id = recipient_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "LET $unread = (SELECT count() AS total FROM notification \
                         WHERE recipient_id = $recipient_id AND read_at_ms = NONE GROUP ALL); \
                     UPDATE notification SET read_at_ms = $read_at_ms \
                         WHERE recipient_id = $recipient_id AND read_at_ms = NONE RETURN NONE; \
                     RETURN $unread[0].total OR 0;",
                )
                .bind(("recipient_id", recipient_id))
                .bind(("read_at_ms", read_at_ms))
                .await
                .map_err(Self::map_surreal_error)?;
            let updated: Option<u64> = response
                .take(2)
                .map_err(|err| DomainError::Storage(format!("invalid query result: {err}")))?;
            Ok(updated.unwrap_or(0))
        })
    }

    fn unread_count(&self, recipient_id: &str) -> BoxFuture<'_, DomainResult<u64>> {
        let recipient_id = recipient_id.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT count() AS total FROM notification \
                     WHERE recipient_id = $recipient_id AND read_at_ms = NONE GROUP ALL",
                )
                .bind(("recipient_id", recipient_id))
                .await
                .map_err(Self::map_surreal_error)?;
            let rows = Self::take_rows(&mut response, 0)?;
            Ok(rows
                .first()
                .and_then(|row| row.get("total"))
                .and_then(Value::as_u64)
                .unwrap_or(0))
        })
    }
}

fn first_row(chain: &Value, key: &str) -> Option<Value> {
    chain
        .get(key)
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .cloned()
}
