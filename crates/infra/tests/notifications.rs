use std::sync::Arc;

use ludium_domain::applications::{ApplicationCreate, ApplicationService, ReviewDecision};
use ludium_domain::error::DomainError;
use ludium_domain::events::{
    NotificationHub, CHANNEL_NOTIFICATIONS, CHANNEL_NOTIFICATION_COUNT,
};
use ludium_domain::identity::ActorIdentity;
use ludium_domain::milestones::{MilestoneCreate, MilestoneService, MilestoneStatus};
use ludium_domain::notifications::{
    NotificationAction, NotificationCreate, NotificationFilter, NotificationPage,
    NotificationService, NotificationTab, NotificationType, SortOrder,
};
use ludium_domain::ports::applications::ApplicationRepository;
use ludium_domain::ports::milestones::MilestoneRepository;
use ludium_domain::ports::notifications::NotificationRepository;
use ludium_domain::ports::programs::ProgramRepository;
use ludium_domain::programs::{ProgramCreate, ProgramService, ProgramVisibility};
use ludium_domain::scope::ScopeService;
use ludium_domain::util::now_ms;
use ludium_domain::visibility::VisibilityPolicy;
use ludium_infra::repositories::InMemoryStore;

struct World {
    hub: Arc<NotificationHub>,
    programs: ProgramService,
    applications: ApplicationService,
    milestones: MilestoneService,
    notifications: NotificationService,
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
    let notifications = NotificationService::new(notification_repo, hub.clone());
    let programs = ProgramService::new(
        program_repo.clone(),
        scope.clone(),
        policy.clone(),
        notifications.clone(),
    );
    let applications = ApplicationService::new(
        application_repo.clone(),
        program_repo,
        scope.clone(),
        policy,
        notifications.clone(),
    );
    let milestones = MilestoneService::new(
        milestone_repo,
        application_repo,
        scope,
        notifications.clone(),
    );

    World {
        hub,
        programs,
        applications,
        milestones,
        notifications,
    }
}

fn actor(user_id: &str) -> ActorIdentity {
    ActorIdentity::new(user_id, format!("{user_id}-name"))
}

fn simple_create(recipient: &str, title: &str) -> NotificationCreate {
    NotificationCreate {
        recipient_id: recipient.to_string(),
        notification_type: NotificationType::System,
        action: NotificationAction::Created,
        title: title.to_string(),
        content: "hello".to_string(),
        entity_id: None,
        metadata: None,
    }
}

fn typed_create(
    recipient: &str,
    notification_type: NotificationType,
    action: NotificationAction,
) -> NotificationCreate {
    NotificationCreate {
        recipient_id: recipient.to_string(),
        notification_type,
        action,
        title: "update".to_string(),
        content: "update".to_string(),
        entity_id: None,
        metadata: None,
    }
}

#[tokio::test]
async fn record_persists_without_publishing_and_broadcast_publishes() {
    let world = world();
    let mut list_events = world.hub.subscribe(CHANNEL_NOTIFICATIONS, "u1").await;
    let mut count_events = world.hub.subscribe(CHANNEL_NOTIFICATION_COUNT, "u1").await;

    let recorded = world
        .notifications
        .record(simple_create("u1", "quiet"))
        .await
        .expect("record");
    assert!(list_events.try_recv().is_err(), "record must stay silent");
    assert!(count_events.try_recv().is_err());

    let listed = world
        .notifications
        .list("u1", NotificationPage::default())
        .await
        .expect("list");
    assert_eq!(listed.count, 1, "the row is durable before any publish");

    world
        .notifications
        .broadcast("u1", Some(&recorded.notification_id))
        .await;
    let event = list_events.try_recv().expect("broadcast reaches the list channel");
    assert_eq!(event.notification_id.as_deref(), Some(recorded.notification_id.as_str()));
    assert!(count_events.try_recv().is_ok());
}

#[tokio::test]
async fn unread_filter_count_is_independent_of_the_page_limit() {
    let world = world();
    for title in ["a", "b", "c"] {
        world
            .notifications
            .record(simple_create("u1", title))
            .await
            .expect("record");
    }
    let first = world
        .notifications
        .list("u1", NotificationPage::default())
        .await
        .expect("list")
        .data
        .remove(0);
    world
        .notifications
        .mark_read("u1", &first.notification_id)
        .await
        .expect("mark read");

    let page = NotificationPage {
        limit: 1,
        offset: 0,
        sort: SortOrder::Desc,
        filters: vec![NotificationFilter::Unread(true)],
    };
    let listed = world.notifications.list("u1", page).await.expect("list");
    assert_eq!(listed.data.len(), 1, "limit bounds the page");
    assert_eq!(listed.count, 2, "count covers every unread row");
    assert!(listed.data.iter().all(|row| row.read_at_ms.is_none()));
}

#[tokio::test]
async fn mark_read_is_idempotent_and_keeps_the_first_timestamp() {
    let world = world();
    let recorded = world
        .notifications
        .record(simple_create("u1", "once"))
        .await
        .expect("record");

    let first = world
        .notifications
        .mark_read("u1", &recorded.notification_id)
        .await
        .expect("first mark");
    let read_at = first.read_at_ms.expect("read timestamp set");

    let mut events = world.hub.subscribe(CHANNEL_NOTIFICATIONS, "u1").await;
    let second = world
        .notifications
        .mark_read("u1", &recorded.notification_id)
        .await
        .expect("second mark");
    assert_eq!(second.read_at_ms, Some(read_at), "timestamp must not move");
    assert!(
        events.try_recv().is_err(),
        "an already-read row publishes nothing"
    );
}

#[tokio::test]
async fn mark_all_read_publishes_exactly_once_per_channel() {
    let world = world();
    for title in ["a", "b", "c"] {
        world
            .notifications
            .record(simple_create("u1", title))
            .await
            .expect("record");
    }
    let first = world
        .notifications
        .list("u1", NotificationPage::default())
        .await
        .expect("list")
        .data
        .remove(0);
    world
        .notifications
        .mark_read("u1", &first.notification_id)
        .await
        .expect("mark read");
    assert_eq!(
        world.notifications.unread_count("u1").await.expect("count"),
        2
    );

    let mut list_events = world.hub.subscribe(CHANNEL_NOTIFICATIONS, "u1").await;
    let mut count_events = world.hub.subscribe(CHANNEL_NOTIFICATION_COUNT, "u1").await;

    let updated = world
        .notifications
        .mark_all_read("u1")
        .await
        .expect("mark all");
    assert_eq!(updated, 2);
    assert_eq!(
        world.notifications.unread_count("u1").await.expect("count"),
        0
    );

    assert!(list_events.try_recv().is_ok());
    assert!(list_events.try_recv().is_err(), "exactly one list event");
    assert!(count_events.try_recv().is_ok());
    assert!(count_events.try_recv().is_err(), "exactly one count event");

    let silent = world
        .notifications
        .mark_all_read("u1")
        .await
        .expect("second mark all");
    assert_eq!(silent, 0);
    assert!(
        list_events.try_recv().is_err(),
        "nothing transitioned, nothing published"
    );
}

#[tokio::test]
async fn progress_tab_uses_the_milestone_action_set() {
    let world = world();
    world
        .notifications
        .record(typed_create(
            "u1",
            NotificationType::Milestone,
            NotificationAction::Rejected,
        ))
        .await
        .expect("record");
    world
        .notifications
        .record(typed_create(
            "u1",
            NotificationType::Milestone,
            NotificationAction::Submitted,
        ))
        .await
        .expect("record");

    let page = NotificationPage {
        filters: vec![NotificationFilter::Tab(NotificationTab::Progress)],
        ..NotificationPage::default()
    };
    let listed = world.notifications.list("u1", page).await.expect("list");
    assert_eq!(listed.count, 1);
    assert_eq!(listed.data.len(), 1);
    assert_eq!(listed.data[0].action, NotificationAction::Submitted);
}

#[tokio::test]
async fn cross_tenant_mark_read_neither_mutates_nor_leaks() {
    let world = world();
    let owned = world
        .notifications
        .record(simple_create("owner", "private"))
        .await
        .expect("record");

    let cross_tenant = world
        .notifications
        .mark_read("attacker", &owned.notification_id)
        .await
        .expect_err("foreign row must look missing");
    let truly_missing = world
        .notifications
        .mark_read("attacker", "no-such-id")
        .await
        .expect_err("missing row");
    assert_eq!(
        cross_tenant.to_string(),
        truly_missing.to_string(),
        "a foreign row and a missing row must be indistinguishable"
    );

    let listed = world
        .notifications
        .list("owner", NotificationPage::default())
        .await
        .expect("list");
    assert!(
        listed.data[0].read_at_ms.is_none(),
        "the owner's row stays unread"
    );
}

#[tokio::test]
async fn list_rejects_out_of_range_limits() {
    let world = world();
    for limit in [0, 101] {
        let page = NotificationPage {
            limit,
            ..NotificationPage::default()
        };
        let err = world
            .notifications
            .list("u1", page)
            .await
            .expect_err("limit outside 1..=100");
        assert!(matches!(err, DomainError::Validation(_)));
    }
}

/// Full grant lifecycle: the reclaim path is the only producer of rows the
/// reclaim tab matches, so walk the whole flow and assert the tab finds
/// exactly that row.
#[tokio::test]
async fn reclaimed_milestone_lands_in_the_reclaim_tab() {
    let world = world();
    let program = world
        .programs
        .create(
            actor("sponsor"),
            ProgramCreate {
                name: "Grant Round".to_string(),
                description: None,
                visibility: ProgramVisibility::Public,
                validator_id: Some("vera".to_string()),
            },
        )
        .await
        .expect("create program");

    let application = world
        .applications
        .apply(
            actor("bob"),
            &program.program_id,
            ApplicationCreate {
                summary: Some("I build things".to_string()),
            },
        )
        .await
        .expect("apply");
    world
        .applications
        .decide(actor("vera"), &application.application_id, ReviewDecision::Accept)
        .await
        .expect("accept application");

    let milestone = world
        .milestones
        .create(
            actor("bob"),
            &application.application_id,
            MilestoneCreate {
                title: "Ship v1".to_string(),
                amount: Some("1000".to_string()),
                deadline_ms: Some(now_ms() - 60_000),
            },
        )
        .await
        .expect("create milestone");

    let reclaimed = world
        .milestones
        .reclaim_expired(actor("sponsor"), &milestone.milestone_id)
        .await
        .expect("reclaim");
    assert_eq!(reclaimed.status, MilestoneStatus::Completed);

    let page = NotificationPage {
        filters: vec![NotificationFilter::Tab(NotificationTab::Reclaim)],
        ..NotificationPage::default()
    };
    let listed = world.notifications.list("bob", page).await.expect("list");
    assert_eq!(listed.count, 1);
    assert_eq!(listed.data[0].notification_type, NotificationType::Milestone);
    assert_eq!(listed.data[0].action, NotificationAction::Completed);

    // bob also holds the acceptance notification, which the tab must skip.
    let everything = world
        .notifications
        .list("bob", NotificationPage::default())
        .await
        .expect("list all");
    assert!(everything.count > 1);
}

#[tokio::test]
async fn second_application_by_the_same_user_is_a_conflict() {
    let world = world();
    let program = world
        .programs
        .create(
            actor("sponsor"),
            ProgramCreate {
                name: "Grant Round".to_string(),
                description: None,
                visibility: ProgramVisibility::Public,
                validator_id: None,
            },
        )
        .await
        .expect("create program");

    world
        .applications
        .apply(
            actor("bob"),
            &program.program_id,
            ApplicationCreate {
                summary: Some("first".to_string()),
            },
        )
        .await
        .expect("first apply");

    let err = world
        .applications
        .apply(
            actor("bob"),
            &program.program_id,
            ApplicationCreate {
                summary: Some("second".to_string()),
            },
        )
        .await
        .expect_err("one application per applicant per program");
    assert!(matches!(err, DomainError::Conflict));

    // Another builder is unaffected.
    world
        .applications
        .apply(actor("carol"), &program.program_id, ApplicationCreate { summary: None })
        .await
        .expect("a different applicant still applies");
}

#[tokio::test]
async fn rejected_milestone_can_be_resubmitted() {
    let world = world();
    let program = world
        .programs
        .create(
            actor("sponsor"),
            ProgramCreate {
                name: "Grant Round".to_string(),
                description: None,
                visibility: ProgramVisibility::Public,
                validator_id: Some("vera".to_string()),
            },
        )
        .await
        .expect("create program");
    let application = world
        .applications
        .apply(actor("bob"), &program.program_id, ApplicationCreate { summary: None })
        .await
        .expect("apply");
    world
        .applications
        .decide(actor("vera"), &application.application_id, ReviewDecision::Accept)
        .await
        .expect("accept");
    let milestone = world
        .milestones
        .create(
            actor("bob"),
            &application.application_id,
            MilestoneCreate {
                title: "Ship v1".to_string(),
                amount: None,
                deadline_ms: None,
            },
        )
        .await
        .expect("create milestone");

    world
        .milestones
        .submit(actor("bob"), &milestone.milestone_id)
        .await
        .expect("first submit");
    world
        .milestones
        .review(actor("vera"), &milestone.milestone_id, ReviewDecision::Reject)
        .await
        .expect("reject");

    let resubmitted = world
        .milestones
        .submit(actor("bob"), &milestone.milestone_id)
        .await
        .expect("rejected work goes back into review");
    assert_eq!(resubmitted.status, MilestoneStatus::Submitted);

    // Accepted work cannot be submitted again.
    world
        .milestones
        .review(actor("vera"), &milestone.milestone_id, ReviewDecision::Accept)
        .await
        .expect("accept");
    let err = world
        .milestones
        .submit(actor("bob"), &milestone.milestone_id)
        .await
        .expect_err("accepted milestones are final");
    assert!(matches!(err, DomainError::Validation(_)));
}

#[tokio::test]
async fn reclaim_is_refused_before_the_deadline_and_for_non_creators() {
    let world = world();
    let program = world
        .programs
        .create(
            actor("sponsor"),
            ProgramCreate {
                name: "Grant Round".to_string(),
                description: None,
                visibility: ProgramVisibility::Public,
                validator_id: Some("vera".to_string()),
            },
        )
        .await
        .expect("create program");
    let application = world
        .applications
        .apply(actor("bob"), &program.program_id, ApplicationCreate { summary: None })
        .await
        .expect("apply");
    world
        .applications
        .decide(actor("vera"), &application.application_id, ReviewDecision::Accept)
        .await
        .expect("accept");
    let milestone = world
        .milestones
        .create(
            actor("bob"),
            &application.application_id,
            MilestoneCreate {
                title: "Ship v1".to_string(),
                amount: None,
                deadline_ms: Some(now_ms() + 3_600_000),
            },
        )
        .await
        .expect("create milestone");

    let err = world
        .milestones
        .reclaim_expired(actor("vera"), &milestone.milestone_id)
        .await
        .expect_err("only the creator reclaims");
    assert!(matches!(err, DomainError::Forbidden(_)));

    let err = world
        .milestones
        .reclaim_expired(actor("sponsor"), &milestone.milestone_id)
        .await
        .expect_err("deadline has not passed");
    assert!(matches!(err, DomainError::Validation(_)));
}
