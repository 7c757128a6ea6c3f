use std::sync::Arc;

use ludium_domain::applications::ApplicationService;
use ludium_domain::error::DomainError;
use ludium_domain::events::NotificationHub;
use ludium_domain::identity::ActorIdentity;
use ludium_domain::milestones::Milestone;
use ludium_domain::milestones::MilestoneStatus;
use ludium_domain::notifications::NotificationService;
use ludium_domain::ports::applications::ApplicationRepository;
use ludium_domain::ports::milestones::MilestoneRepository;
use ludium_domain::ports::notifications::NotificationRepository;
use ludium_domain::ports::programs::ProgramRepository;
use ludium_domain::programs::{
    ProgramCreate, ProgramRoleType, ProgramService, ProgramVisibility, RoleInvite,
};
use ludium_domain::scope::{AccessScope, ScopeDecision, ScopeService};
use ludium_domain::visibility::{DenyReason, VisibilityPolicy};
use ludium_infra::repositories::InMemoryStore;

struct World {
    programs: ProgramService,
    milestone_repo: Arc<dyn MilestoneRepository>,
    scope: ScopeService,
    policy: VisibilityPolicy,
}

fn world() -> World {
    let store = Arc::new(InMemoryStore::new());
    let program_repo: Arc<dyn ProgramRepository> = store.clone();
    let application_repo: Arc<dyn ApplicationRepository> = store.clone();
    let milestone_repo: Arc<dyn MilestoneRepository> = store.clone();
    let notification_repo: Arc<dyn NotificationRepository> = store.clone();

    let hub = Arc::new(NotificationHub::default());
    let scope = ScopeService::new(
        program_repo.clone(),
        application_repo.clone(),
        milestone_repo.clone(),
    );
    let policy = VisibilityPolicy::new(program_repo.clone());
    let notifications = NotificationService::new(notification_repo, hub);
    let programs = ProgramService::new(
        program_repo,
        scope.clone(),
        policy.clone(),
        notifications,
    );

    World {
        programs,
        milestone_repo,
        scope,
        policy,
    }
}

fn actor(user_id: &str) -> ActorIdentity {
    ActorIdentity::new(user_id, format!("{user_id}-name"))
}

async fn seed_program(world: &World, creator: &str, visibility: ProgramVisibility) -> String {
    world
        .programs
        .create(
            actor(creator),
            ProgramCreate {
                name: "Builder Grants".to_string(),
                description: None,
                visibility,
                validator_id: None,
            },
        )
        .await
        .expect("create program")
        .program_id
}

async fn invite(world: &World, creator: &str, program_id: &str, user: &str, role: ProgramRoleType) {
    world
        .programs
        .invite(
            actor(creator),
            program_id,
            RoleInvite {
                user_id: user.to_string(),
                role,
                tier: None,
            },
        )
        .await
        .expect("invite role");
}

#[tokio::test]
async fn every_scope_resolves_missing_chain_links_without_granting() {
    let world = world();
    for scope in [
        AccessScope::ProgramCreator,
        AccessScope::ProgramValidator,
        AccessScope::ApplicationBuilder,
        AccessScope::ApplicationValidator,
        AccessScope::MilestoneBuilder,
        AccessScope::MilestoneValidator,
    ] {
        let decision = world
            .scope
            .check(scope, "someone", "absent-id")
            .await
            .expect("a missing row is a decision, not an error");
        assert!(
            matches!(decision, ScopeDecision::Missing(_)),
            "{scope:?} must report the broken link"
        );
        assert!(!decision.is_granted());
    }
}

#[tokio::test]
async fn dangling_milestone_chain_reports_the_absent_application() {
    let world = world();
    let milestone = Milestone {
        milestone_id: "m-orphan".to_string(),
        application_id: "gone".to_string(),
        title: "orphaned".to_string(),
        amount: None,
        deadline_ms: None,
        status: MilestoneStatus::Pending,
        created_at_ms: 1,
        updated_at_ms: 1,
    };
    world
        .milestone_repo
        .create_milestone(&milestone)
        .await
        .expect("seed milestone");

    let decision = world
        .scope
        .check(AccessScope::MilestoneBuilder, "someone", "m-orphan")
        .await
        .expect("check runs");
    assert_eq!(decision, ScopeDecision::Missing("application"));
}

#[tokio::test]
async fn private_program_admits_creator_and_role_holders_only() {
    let world = world();
    let program_id = seed_program(&world, "sponsor", ProgramVisibility::Private).await;
    invite(&world, "sponsor", &program_id, "vera", ProgramRoleType::Validator).await;

    let creator = world
        .policy
        .can_access_program(&program_id, Some("sponsor"))
        .await
        .expect("check");
    assert!(creator.is_allowed());

    let role_holder = world
        .policy
        .can_access_program(&program_id, Some("vera"))
        .await
        .expect("check");
    assert!(role_holder.is_allowed());

    let stranger = world
        .policy
        .can_access_program(&program_id, Some("mallory"))
        .await
        .expect("check");
    assert_eq!(stranger.reason(), Some(DenyReason::RoleRequired));

    let anonymous = world
        .policy
        .can_access_program(&program_id, None)
        .await
        .expect("check");
    assert_eq!(anonymous.reason(), Some(DenyReason::AuthenticationRequired));
}

#[tokio::test]
async fn public_and_restricted_programs_are_viewable_by_anyone() {
    let world = world();
    for visibility in [ProgramVisibility::Public, ProgramVisibility::Restricted] {
        let program_id = seed_program(&world, "sponsor", visibility).await;
        let anonymous = world
            .policy
            .can_access_program(&program_id, None)
            .await
            .expect("check");
        assert!(anonymous.is_allowed(), "{visibility:?} must be open");
    }
}

#[tokio::test]
async fn validator_veto_outranks_a_coexisting_builder_role() {
    let world = world();
    let program_id = seed_program(&world, "sponsor", ProgramVisibility::Private).await;
    invite(&world, "sponsor", &program_id, "dual", ProgramRoleType::Builder).await;
    invite(&world, "sponsor", &program_id, "dual", ProgramRoleType::Validator).await;

    let decision = world
        .policy
        .can_apply_to_program(&program_id, Some("dual"))
        .await
        .expect("check");
    assert_eq!(decision.reason(), Some(DenyReason::ValidatorCannotApply));

    let err = decision.into_result().expect_err("veto must map to an error");
    match err {
        DomainError::Forbidden(message) => {
            assert_eq!(message, "validators cannot apply to programs they validate");
        }
        other => panic!("expected forbidden, got {other:?}"),
    }
}

#[tokio::test]
async fn creators_never_apply_to_their_own_program_under_any_visibility() {
    let world = world();
    for visibility in [
        ProgramVisibility::Public,
        ProgramVisibility::Restricted,
        ProgramVisibility::Private,
    ] {
        let program_id = seed_program(&world, "sponsor", visibility).await;
        let decision = world
            .policy
            .can_apply_to_program(&program_id, Some("sponsor"))
            .await
            .expect("check");
        assert_eq!(
            decision.reason(),
            Some(DenyReason::CreatorCannotApply),
            "{visibility:?} must still block the creator"
        );
    }
}

#[tokio::test]
async fn private_program_requires_a_builder_role_to_apply() {
    let world = world();
    let program_id = seed_program(&world, "sponsor", ProgramVisibility::Private).await;
    invite(&world, "sponsor", &program_id, "bob", ProgramRoleType::Builder).await;

    let builder = world
        .policy
        .can_apply_to_program(&program_id, Some("bob"))
        .await
        .expect("check");
    assert!(builder.is_allowed());

    let outsider = world
        .policy
        .can_apply_to_program(&program_id, Some("mallory"))
        .await
        .expect("check");
    assert_eq!(outsider.reason(), Some(DenyReason::BuilderRoleRequired));
}

#[tokio::test]
async fn duplicate_role_assignment_is_a_conflict() {
    let world = world();
    let program_id = seed_program(&world, "sponsor", ProgramVisibility::Public).await;
    invite(&world, "sponsor", &program_id, "bob", ProgramRoleType::Builder).await;

    let err = world
        .programs
        .invite(
            actor("sponsor"),
            &program_id,
            RoleInvite {
                user_id: "bob".to_string(),
                role: ProgramRoleType::Builder,
                tier: None,
            },
        )
        .await
        .expect_err("second identical assignment must fail");
    assert!(matches!(err, DomainError::Conflict));
}

#[tokio::test]
async fn only_the_creator_may_assign_roles() {
    let world = world();
    let program_id = seed_program(&world, "sponsor", ProgramVisibility::Public).await;

    let err = world
        .programs
        .invite(
            actor("mallory"),
            &program_id,
            RoleInvite {
                user_id: "bob".to_string(),
                role: ProgramRoleType::Builder,
                tier: None,
            },
        )
        .await
        .expect_err("non-creator must be refused");
    assert!(matches!(err, DomainError::Forbidden(_)));
}

#[tokio::test]
async fn apply_is_refused_for_the_creator_through_the_service() {
    let store = Arc::new(InMemoryStore::new());
    let program_repo: Arc<dyn ProgramRepository> = store.clone();
    let application_repo: Arc<dyn ApplicationRepository> = store.clone();
    let milestone_repo: Arc<dyn MilestoneRepository> = store.clone();
    let notification_repo: Arc<dyn NotificationRepository> = store.clone();
    let hub = Arc::new(NotificationHub::default());
    let scope = ScopeService::new(
        program_repo.clone(),
        application_repo.clone(),
        milestone_repo,
    );
    let policy = VisibilityPolicy::new(program_repo.clone());
    let notifications = NotificationService::new(notification_repo, hub);
    let programs = ProgramService::new(
        program_repo.clone(),
        scope.clone(),
        policy.clone(),
        notifications.clone(),
    );
    let applications = ApplicationService::new(
        application_repo,
        program_repo,
        scope,
        policy,
        notifications,
    );

    let program = programs
        .create(
            actor("sponsor"),
            ProgramCreate {
                name: "Open Call".to_string(),
                description: None,
                visibility: ProgramVisibility::Public,
                validator_id: None,
            },
        )
        .await
        .expect("create program");

    let err = applications
        .apply(
            actor("sponsor"),
            &program.program_id,
            ludium_domain::applications::ApplicationCreate { summary: None },
        )
        .await
        .expect_err("creator cannot apply");
    assert!(matches!(err, DomainError::Forbidden(_)));
}
