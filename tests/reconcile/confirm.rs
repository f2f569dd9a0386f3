use std::time::Duration;

use serde_json::json;

use crate::common::*;

fn applied(project_id: &str) -> ReconcileOutcome {
    ReconcileOutcome::Applied {
        project_id: project_id.to_string(),
    }
}

fn already_processed(project_id: &str) -> ReconcileOutcome {
    ReconcileOutcome::AlreadyProcessed {
        project_id: project_id.to_string(),
    }
}

fn assert_fully_processed_premium(project: &Project, reference: &str) {
    assert_eq!(project.plan, Plan::Premium);
    assert!(project.payment_status, "payment_status should be set");
    assert!(!project.is_draft, "project should no longer be a draft");
    assert_eq!(project.order_id.as_deref(), Some(reference));
    assert!(project.scheduled_launch);
    assert_eq!(project.status.as_deref(), Some("pending"));
    assert_eq!(project.link_type, LinkType::Dofollow);
    assert!(project.dofollow_status);
    assert_eq!(project.dofollow_reason.as_deref(), Some("premium_plan"));
    assert!(project.dofollow_awarded_at.is_some());
    assert_eq!(project.premium_badge, Some(true));
    assert_eq!(project.skip_queue, Some(true));
    assert_eq!(project.social_promotion, Some(true));
    assert_eq!(project.guaranteed_backlinks, Some(3));
    assert!(project.payment_date.is_some());
    assert!(project.is_fully_processed());
}

#[tokio::test]
async fn test_checkout_completed_applies_premium() {
    let pool = setup_test_pool();
    let competition = {
        let conn = pool.get().unwrap();
        let competition = create_test_competition(&conn, "2030-W10", now() + 10 * ONE_DAY);
        create_premium_draft(&conn, "p1", "u1", Some("cs_1"));
        assign_competition(&conn, "p1", &competition);
        competition
    };
    let reconciler = test_reconciler(&pool);

    let outcome = deliver(
        &reconciler,
        event_type::CHECKOUT_COMPLETED,
        checkout_session("cs_1", "pi_1", metadata("u1", Some("p1"))),
    )
    .await;
    assert_eq!(outcome, applied("p1"));

    let conn = pool.get().unwrap();
    let project = get_project(&conn, "p1");
    assert_fully_processed_premium(&project, "pi_1");

    let payments = payments_for(&conn, "pi_1");
    assert_eq!(payments.len(), 1);
    let payment = &payments[0];
    assert_eq!(payment.status, PaymentStatus::Completed);
    assert_eq!(payment.app_id.as_deref(), Some("p1"));
    assert_eq!(payment.user_id.as_deref(), Some("u1"));
    assert_eq!(payment.invoice_id.as_deref(), Some("cs_1"));
    assert_eq!(payment.amount, 1500);
    assert_eq!(payment.plan, Plan::Premium);
    assert_eq!(payment.metadata.provider, "stripe");
    assert_eq!(payment.metadata.customer_email.as_deref(), Some("buyer@example.com"));

    let competition = get_competition(&conn, &competition.id);
    assert_eq!(competition.total_submissions, 1);
    assert_eq!(competition.premium_submissions, 1);
}

#[tokio::test]
async fn test_replayed_delivery_is_a_no_op() {
    let pool = setup_test_pool();
    let competition = {
        let conn = pool.get().unwrap();
        let competition = create_test_competition(&conn, "2030-W10", now() + 10 * ONE_DAY);
        create_premium_draft(&conn, "p1", "u1", Some("cs_1"));
        assign_competition(&conn, "p1", &competition);
        competition
    };
    let reconciler = test_reconciler(&pool);
    let session = checkout_session("cs_1", "pi_1", metadata("u1", Some("p1")));

    deliver(&reconciler, event_type::CHECKOUT_COMPLETED, session.clone()).await;
    let first = {
        let conn = pool.get().unwrap();
        get_project(&conn, "p1")
    };

    let outcome = deliver(&reconciler, event_type::CHECKOUT_COMPLETED, session).await;
    assert_eq!(outcome, already_processed("p1"));

    let conn = pool.get().unwrap();
    let second = get_project(&conn, "p1");
    assert_eq!(second.payment_date, first.payment_date);
    assert_eq!(second.dofollow_awarded_at, first.dofollow_awarded_at);
    assert_eq!(payments_for(&conn, "pi_1").len(), 1);

    let competition = get_competition(&conn, &competition.id);
    assert_eq!(competition.total_submissions, 1, "replay must not count again");
    assert_eq!(competition.premium_submissions, 1);
}

#[tokio::test]
async fn test_payment_intent_after_checkout_is_same_payment() {
    let pool = setup_test_pool();
    {
        let conn = pool.get().unwrap();
        create_premium_draft(&conn, "p1", "u1", Some("cs_1"));
    }
    let reconciler = test_reconciler(&pool);

    deliver(
        &reconciler,
        event_type::CHECKOUT_COMPLETED,
        checkout_session("cs_1", "pi_1", metadata("u1", Some("p1"))),
    )
    .await;
    let outcome = deliver(
        &reconciler,
        event_type::PAYMENT_INTENT_SUCCEEDED,
        payment_intent("pi_1", metadata("u1", Some("p1"))),
    )
    .await;
    assert_eq!(outcome, already_processed("p1"));

    let conn = pool.get().unwrap();
    assert_eq!(payments_for(&conn, "pi_1").len(), 1);
}

#[tokio::test]
async fn test_payment_intent_alone_confirms_payment() {
    let pool = setup_test_pool();
    {
        let conn = pool.get().unwrap();
        create_premium_draft(&conn, "p1", "u1", None);
    }
    let reconciler = test_reconciler(&pool);

    let outcome = deliver(
        &reconciler,
        event_type::PAYMENT_INTENT_SUCCEEDED,
        payment_intent("pi_9", metadata("u1", Some("p1"))),
    )
    .await;
    assert_eq!(outcome, applied("p1"));

    let conn = pool.get().unwrap();
    assert_fully_processed_premium(&get_project(&conn, "p1"), "pi_9");
    let payments = payments_for(&conn, "pi_9");
    assert_eq!(payments.len(), 1);
    assert!(payments[0].invoice_id.is_none());
}

#[tokio::test]
async fn test_unpaid_checkout_changes_nothing() {
    let pool = setup_test_pool();
    {
        let conn = pool.get().unwrap();
        create_premium_draft(&conn, "p1", "u1", Some("cs_1"));
    }
    let reconciler = test_reconciler(&pool);

    let mut session = checkout_session("cs_1", "pi_1", metadata("u1", Some("p1")));
    session["payment_status"] = json!("unpaid");
    let outcome = deliver(&reconciler, event_type::CHECKOUT_COMPLETED, session).await;
    assert_eq!(
        outcome,
        ReconcileOutcome::NotPaid {
            session_id: "cs_1".to_string()
        }
    );

    let conn = pool.get().unwrap();
    let project = get_project(&conn, "p1");
    assert!(!project.payment_status);
    assert!(project.is_draft);
    assert!(payments_for(&conn, "pi_1").is_empty());
}

#[tokio::test]
async fn test_async_payment_succeeded_confirms_like_checkout() {
    let pool = setup_test_pool();
    {
        let conn = pool.get().unwrap();
        create_premium_draft(&conn, "p1", "u1", Some("cs_1"));
    }
    let reconciler = test_reconciler(&pool);

    let outcome = deliver(
        &reconciler,
        event_type::ASYNC_PAYMENT_SUCCEEDED,
        checkout_session("cs_1", "pi_1", metadata("u1", Some("p1"))),
    )
    .await;
    assert_eq!(outcome, applied("p1"));

    let conn = pool.get().unwrap();
    let payments = payments_for(&conn, "pi_1");
    assert_eq!(payments.len(), 1);
    assert_eq!(
        payments[0].metadata.processed_by.as_deref(),
        Some("checkout.session.async_payment_succeeded")
    );
}

#[tokio::test]
async fn test_checkout_session_resolves_without_project_id() {
    let pool = setup_test_pool();
    {
        let conn = pool.get().unwrap();
        create_premium_draft(&conn, "p_old", "u1", Some("cs_old"));
        create_premium_draft(&conn, "p_new", "u1", Some("cs_new"));
    }
    let reconciler = test_reconciler(&pool);

    let outcome = deliver(
        &reconciler,
        event_type::CHECKOUT_COMPLETED,
        checkout_session("cs_old", "pi_old", metadata("u1", None)),
    )
    .await;
    assert_eq!(outcome, applied("p_old"));

    let conn = pool.get().unwrap();
    assert!(get_project(&conn, "p_old").payment_status);
    assert!(!get_project(&conn, "p_new").payment_status);
}

#[tokio::test]
async fn test_slug_scoped_to_owner() {
    let pool = setup_test_pool();
    {
        let conn = pool.get().unwrap();
        // Same slug, different owners
        queries::create_project(
            &conn,
            &CreateProject {
                id: Some("other".into()),
                slug: "shared".into(),
                name: "Other".into(),
                submitted_by: "u2".into(),
                plan: Plan::Premium,
                is_draft: true,
                ..Default::default()
            },
        )
        .unwrap();
        queries::create_project(
            &conn,
            &CreateProject {
                id: Some("mine".into()),
                slug: "shared".into(),
                name: "Mine".into(),
                submitted_by: "u1".into(),
                plan: Plan::Premium,
                is_draft: true,
                ..Default::default()
            },
        )
        .unwrap();
    }
    let reconciler = test_reconciler(&pool);

    let meta = json!({ "userId": "u1", "projectSlug": "shared", "planType": "premium" });
    let outcome = deliver(
        &reconciler,
        event_type::CHECKOUT_COMPLETED,
        checkout_session("cs_x", "pi_x", meta),
    )
    .await;
    assert_eq!(outcome, applied("mine"));

    let conn = pool.get().unwrap();
    assert!(!get_project(&conn, "other").payment_status);
}

#[tokio::test]
async fn test_recent_unpaid_premium_heuristic() {
    let pool = setup_test_pool();
    {
        let conn = pool.get().unwrap();
        create_premium_draft(&conn, "p1", "u1", None);
    }
    let reconciler = test_reconciler(&pool);

    // Nothing in the metadata or session names the project
    let outcome = deliver(
        &reconciler,
        event_type::CHECKOUT_COMPLETED,
        checkout_session("cs_unknown", "pi_h", metadata("u1", None)),
    )
    .await;
    assert_eq!(outcome, applied("p1"));
}

#[tokio::test]
async fn test_absent_plan_type_means_premium() {
    let pool = setup_test_pool();
    {
        let conn = pool.get().unwrap();
        create_premium_draft(&conn, "p1", "u1", Some("cs_1"));
    }
    let reconciler = test_reconciler(&pool);

    let meta = json!({ "userId": "u1", "projectId": "p1" });
    deliver(
        &reconciler,
        event_type::CHECKOUT_COMPLETED,
        checkout_session("cs_1", "pi_1", meta),
    )
    .await;

    let conn = pool.get().unwrap();
    let project = get_project(&conn, "p1");
    assert_eq!(project.plan, Plan::Premium);
    assert_eq!(project.link_type, LinkType::Dofollow);
}

#[tokio::test]
async fn test_recovers_when_payment_recorded_but_project_not_updated() {
    let pool = setup_test_pool();
    let competition = {
        let conn = pool.get().unwrap();
        let competition = create_test_competition(&conn, "2030-W10", now() + 10 * ONE_DAY);
        create_premium_draft(&conn, "p1", "u1", Some("cs_1"));
        assign_competition(&conn, "p1", &competition);
        // Payment row written, project update lost
        queries::create_payment(
            &conn,
            &CreatePayment {
                user_id: Some("u1".into()),
                app_id: Some("p1".into()),
                plan: Plan::Premium,
                amount: 1500,
                currency: "usd".into(),
                payment_id: "pi_1".into(),
                invoice_id: Some("cs_1".into()),
                metadata: PaymentMetadata::default(),
                paid_at: now(),
            },
        )
        .unwrap()
        .unwrap();
        competition
    };
    let reconciler = test_reconciler(&pool);

    let outcome = deliver(
        &reconciler,
        event_type::CHECKOUT_COMPLETED,
        checkout_session("cs_1", "pi_1", metadata("u1", Some("p1"))),
    )
    .await;
    assert_eq!(
        outcome,
        ReconcileOutcome::Recovered {
            project_id: "p1".into()
        }
    );

    let conn = pool.get().unwrap();
    assert_fully_processed_premium(&get_project(&conn, "p1"), "pi_1");
    assert_eq!(payments_for(&conn, "pi_1").len(), 1, "no second payment row");
    // The project had not been confirmed before, so this is its first count
    assert_eq!(get_competition(&conn, &competition.id).premium_submissions, 1);
}

#[tokio::test]
async fn test_repair_of_confirmed_project_does_not_recount() {
    let pool = setup_test_pool();
    let competition = {
        let conn = pool.get().unwrap();
        let competition = create_test_competition(&conn, "2030-W10", now() + 10 * ONE_DAY);
        create_premium_draft(&conn, "p1", "u1", Some("cs_1"));
        assign_competition(&conn, "p1", &competition);
        // Confirmed earlier, but the dofollow grant never landed
        queries::update_project(
            &conn,
            "p1",
            &ProjectUpdate {
                payment_status: Some(true),
                is_draft: Some(false),
                order_id: Some("pi_1".into()),
                premium_badge: Some(Some(true)),
                ..Default::default()
            },
        )
        .unwrap();
        queries::create_payment(
            &conn,
            &CreatePayment {
                user_id: Some("u1".into()),
                app_id: Some("p1".into()),
                plan: Plan::Premium,
                amount: 1500,
                currency: "usd".into(),
                payment_id: "pi_1".into(),
                invoice_id: Some("cs_1".into()),
                metadata: PaymentMetadata::default(),
                paid_at: now(),
            },
        )
        .unwrap();
        competition
    };
    let reconciler = test_reconciler(&pool);

    let outcome = deliver(
        &reconciler,
        event_type::CHECKOUT_COMPLETED,
        checkout_session("cs_1", "pi_1", metadata("u1", Some("p1"))),
    )
    .await;
    assert_eq!(
        outcome,
        ReconcileOutcome::Recovered {
            project_id: "p1".into()
        }
    );

    let conn = pool.get().unwrap();
    let project = get_project(&conn, "p1");
    assert_eq!(project.link_type, LinkType::Dofollow);
    assert!(project.dofollow_status);
    assert_eq!(payments_for(&conn, "pi_1").len(), 1);

    let competition = get_competition(&conn, &competition.id);
    assert_eq!(competition.total_submissions, 0, "repair must not count again");
    assert_eq!(competition.premium_submissions, 0);
}

#[tokio::test]
async fn test_replay_restores_lost_badge() {
    let pool = setup_test_pool();
    {
        let conn = pool.get().unwrap();
        create_premium_draft(&conn, "p1", "u1", Some("cs_1"));
    }
    let reconciler = test_reconciler(&pool);
    let session = checkout_session("cs_1", "pi_1", metadata("u1", Some("p1")));
    deliver(&reconciler, event_type::CHECKOUT_COMPLETED, session.clone()).await;
    {
        let conn = pool.get().unwrap();
        queries::update_project(
            &conn,
            "p1",
            &ProjectUpdate {
                premium_badge: Some(None),
                ..Default::default()
            },
        )
        .unwrap();
    }

    let outcome = deliver(&reconciler, event_type::CHECKOUT_COMPLETED, session).await;
    assert_eq!(
        outcome,
        ReconcileOutcome::Recovered {
            project_id: "p1".into()
        }
    );

    let conn = pool.get().unwrap();
    assert_eq!(get_project(&conn, "p1").premium_badge, Some(true));
    assert_eq!(payments_for(&conn, "pi_1").len(), 1);
}

#[tokio::test]
async fn test_lookup_retried_after_delay_finds_late_project() {
    let pool = setup_test_pool();
    let reconciler = Reconciler::new(
        pool.clone(),
        Notifier::disabled(),
        Duration::from_millis(300),
    );

    // The draft row lands while the reconciler is waiting
    let writer = {
        let pool = pool.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let conn = pool.get().unwrap();
            create_premium_draft(&conn, "late", "u1", None);
        })
    };

    let outcome = deliver(
        &reconciler,
        event_type::CHECKOUT_COMPLETED,
        checkout_session("cs_late", "pi_late", metadata("u1", Some("late"))),
    )
    .await;
    writer.await.unwrap();
    assert_eq!(outcome, applied("late"));

    let conn = pool.get().unwrap();
    assert_fully_processed_premium(&get_project(&conn, "late"), "pi_late");
    assert_eq!(payments_for(&conn, "pi_late").len(), 1);
}

#[tokio::test]
async fn test_perks_dropped_during_confirmation_are_rewritten() {
    let pool = setup_test_pool();
    {
        let conn = pool.get().unwrap();
        create_premium_draft(&conn, "p1", "u1", Some("cs_1"));
        // Another writer strips the perks as soon as the payment lands
        conn.execute_batch(
            "CREATE TRIGGER drop_perks AFTER UPDATE ON apps
             WHEN OLD.payment_status = 0 AND NEW.payment_status = 1
             BEGIN
                 UPDATE apps SET premium_badge = NULL, dofollow_status = 0 WHERE id = NEW.id;
             END;",
        )
        .unwrap();
    }
    let reconciler = test_reconciler(&pool);

    let outcome = deliver(
        &reconciler,
        event_type::CHECKOUT_COMPLETED,
        checkout_session("cs_1", "pi_1", metadata("u1", Some("p1"))),
    )
    .await;
    assert_eq!(outcome, applied("p1"));

    let conn = pool.get().unwrap();
    let project = get_project(&conn, "p1");
    assert_eq!(project.premium_badge, Some(true));
    assert!(project.dofollow_status);
    assert_fully_processed_premium(&project, "pi_1");
}

#[tokio::test]
async fn test_standard_plan_payment_grants_no_dofollow() {
    let pool = setup_test_pool();
    {
        let conn = pool.get().unwrap();
        create_standard_project(&conn, "s1", "u1", None);
    }
    let reconciler = test_reconciler(&pool);

    let meta = json!({ "userId": "u1", "projectId": "s1", "planType": "standard" });
    let session = checkout_session("cs_s", "pi_s", meta);
    assert_eq!(
        deliver(&reconciler, event_type::CHECKOUT_COMPLETED, session.clone()).await,
        applied("s1")
    );
    // Fully processed for standard does not need dofollow
    assert_eq!(
        deliver(&reconciler, event_type::CHECKOUT_COMPLETED, session).await,
        already_processed("s1")
    );

    let conn = pool.get().unwrap();
    let project = get_project(&conn, "s1");
    assert_eq!(project.plan, Plan::Standard);
    assert!(project.payment_status);
    assert_eq!(project.link_type, LinkType::Nofollow);
    assert!(project.premium_badge.is_none());
}

#[tokio::test]
async fn test_ignored_event_type() {
    let pool = setup_test_pool();
    let reconciler = test_reconciler(&pool);

    let outcome = deliver(&reconciler, "customer.created", json!({ "id": "cus_1" })).await;
    assert_eq!(
        outcome,
        ReconcileOutcome::Ignored {
            event_type: "customer.created".into()
        }
    );
}

/// Two deliveries of one payment racing each other. The unique completed-payment
/// index keeps the payment single. The counter increment is not guarded: if
/// both deliveries see the project unpaid, both count it. That double count is
/// an accepted race, so the counter is only bounded here.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_deliveries_record_one_payment() {
    let pool = setup_test_pool();
    let competition = {
        let conn = pool.get().unwrap();
        let competition = create_test_competition(&conn, "2030-W10", now() + 10 * ONE_DAY);
        create_premium_draft(&conn, "p1", "u1", Some("cs_1"));
        assign_competition(&conn, "p1", &competition);
        competition
    };

    let session = checkout_session("cs_1", "pi_1", metadata("u1", Some("p1")));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let reconciler = test_reconciler(&pool);
        let session = session.clone();
        handles.push(tokio::spawn(async move {
            deliver(&reconciler, event_type::CHECKOUT_COMPLETED, session).await
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let conn = pool.get().unwrap();
    assert_fully_processed_premium(&get_project(&conn, "p1"), "pi_1");
    let completed: Vec<_> = payments_for(&conn, "pi_1")
        .into_iter()
        .filter(|p| p.status == PaymentStatus::Completed)
        .collect();
    assert_eq!(completed.len(), 1);

    let premium = get_competition(&conn, &competition.id).premium_submissions;
    assert!((1..=2).contains(&premium), "counted {} times", premium);
}
