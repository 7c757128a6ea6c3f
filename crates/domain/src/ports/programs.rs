use crate::programs::{Program, RoleAssignment};
use crate::DomainResult;

use super::BoxFuture;

pub trait ProgramRepository: Send + Sync {
    fn create_program(&self, program: &Program) -> BoxFuture<'_, DomainResult<Program>>;

    fn get_program(&self, program_id: &str) -> BoxFuture<'_, DomainResult<Option<Program>>>;

    /// Fails with `Conflict` when the (program, user, role) triple already
    /// exists.
    fn assign_role(
        &self,
        assignment: &RoleAssignment,
    ) -> BoxFuture<'_, DomainResult<RoleAssignment>>;

    fn list_roles(
        &self,
        program_id: &str,
        user_id: &str,
    ) -> BoxFuture<'_, DomainResult<Vec<RoleAssignment>>>;
}
