use std::sync::Arc;

use chrono::TimeDelta;
use draftgate_core::{
    ApplyContext, ApplyRequest, AuditOutcome, CancellationFlag, Clock, DraftStatus, EngineError,
    FieldMap, ScopeFingerprint, TargetId,
};
use draftgate_test_utils::{
    missing_titles, product_id, rules, FailingAuditSink, Fixture, ScriptedProposer, PLAYBOOK,
    PROJECT,
};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_preview_generate_apply() {
    let fx = Fixture::new(5);
    let rules = rules("Acme | ");

    let preview = fx
        .engine
        .preview(&rules, &missing_titles(), Some(2))
        .await
        .unwrap();
    assert_eq!(preview.scope_size, 5);
    assert_eq!(preview.sample_items.len(), 2);

    let draft = fx.draft(rules).await;
    assert_eq!(draft.status, DraftStatus::Ready);
    assert_eq!(draft.rules_fingerprint, preview.rules_fingerprint);
    assert_eq!(draft.scope_fingerprint, preview.scope_fingerprint);

    let result = fx
        .engine
        .apply(ApplyRequest::new(
            PROJECT,
            PLAYBOOK,
            preview.scope_fingerprint,
            preview.rules_fingerprint,
        ))
        .await
        .unwrap();

    assert_eq!(result.draft_id, draft.id);
    assert!(!result.already_applied);
    assert_eq!(result.applied_count, 5);
    assert_eq!(result.written_this_call, 5);
    assert!(result.is_complete());
    assert_eq!(fx.seo_title(3).as_deref(), Some("Acme | Product 3"));

    let stored = fx.engine.get_draft(draft.id).await.unwrap();
    assert_eq!(stored.status, DraftStatus::Applied);
    assert_eq!(stored.applied_at, Some(fx.clock.now()));
    assert_eq!(result.applied_at, fx.clock.now());
}

#[tokio::test]
async fn test_rules_change_fails_fast_without_side_effects() {
    let fx = Fixture::new(5);
    let draft = fx.draft(rules("Acme | ")).await;
    let calls_before = fx.proposer.calls();

    let mut request = ApplyRequest::for_draft(&draft);
    request.rules_fingerprint = rules("Brand | ").fingerprint();
    let err = fx.engine.apply(request).await.unwrap_err();

    assert!(matches!(err, EngineError::RulesChanged { .. }));
    assert_eq!(err.code(), "RULES_CHANGED");
    assert!(err.is_recoverable());

    assert_eq!(fx.proposer.calls(), calls_before);
    assert_eq!(fx.sink.attempts(), 0);
    assert_eq!(fx.seo_title(1), None);
    assert!(fx.audit.is_empty());

    let stored = fx.engine.get_draft(draft.id).await.unwrap();
    assert_eq!(stored.status, DraftStatus::Ready);
    assert_eq!(stored.applied_at, None);
}

#[tokio::test]
async fn test_rules_changed_reported_when_scope_also_changed() {
    let fx = Fixture::new(5);
    let draft = fx.draft(rules("Acme | ")).await;
    fx.add_product(6);

    let mut request = ApplyRequest::for_draft(&draft);
    request.rules_fingerprint = rules("Brand | ").fingerprint();
    let err = fx.engine.apply(request).await.unwrap_err();

    assert!(matches!(err, EngineError::RulesChanged { .. }), "got {err}");
}

#[tokio::test]
async fn test_new_record_in_scope_invalidates_draft() {
    let fx = Fixture::new(5);
    let draft = fx.draft(rules("Acme | ")).await;
    fx.add_product(6);

    let err = fx
        .engine
        .apply(ApplyRequest::for_draft(&draft))
        .await
        .unwrap_err();

    let ids: Vec<TargetId> = (1..=6).map(|i| TargetId::from(product_id(i))).collect();
    match err {
        EngineError::ScopeInvalid {
            draft_id,
            stored,
            current,
        } => {
            assert_eq!(draft_id, draft.id);
            assert_eq!(stored, draft.scope_fingerprint);
            assert_eq!(current, ScopeFingerprint::of(&ids));
        }
        other => panic!("expected ScopeInvalid, got {other}"),
    }
    assert_eq!(fx.sink.attempts(), 0);
    assert_eq!(fx.seo_title(6), None);
}

#[tokio::test]
async fn test_stale_submitted_scope_is_rejected() {
    let fx = Fixture::new(5);
    let stale = fx
        .engine
        .preview(&rules("Acme | "), &missing_titles(), None)
        .await
        .unwrap();
    fx.add_product(6);
    let draft = fx.draft(rules("Acme | ")).await;

    let mut request = ApplyRequest::for_draft(&draft);
    request.scope_fingerprint = stale.scope_fingerprint;
    let err = fx.engine.apply(request).await.unwrap_err();

    assert_eq!(err.code(), "SCOPE_INVALID");
    assert_eq!(fx.sink.attempts(), 0);
}

#[tokio::test]
async fn test_apply_is_idempotent() {
    let fx = Fixture::new(5);
    let draft = fx.draft(rules("Acme | ")).await;

    let first = fx
        .engine
        .apply(ApplyRequest::for_draft(&draft))
        .await
        .unwrap();
    let second = fx
        .engine
        .apply(ApplyRequest::for_draft(&draft))
        .await
        .unwrap();

    assert!(!first.already_applied);
    assert!(second.already_applied);
    assert_eq!(second.applied_at, first.applied_at);
    assert_eq!(second.applied_count, 5);
    assert_eq!(second.written_this_call, 0);
    assert_eq!(fx.sink.total_writes(), 5);
    assert_eq!(fx.audit.len(), 5);
}

#[tokio::test]
async fn test_failed_write_is_retried_alone() {
    let fx = Fixture::new(5);
    let draft = fx.draft(rules("Acme | ")).await;
    let proposer_calls = fx.proposer.calls();
    fx.sink.fail_on(product_id(3));

    let first = fx
        .engine
        .apply(ApplyRequest::for_draft(&draft))
        .await
        .unwrap();
    assert_eq!(first.applied_count, 4);
    assert_eq!(first.errors.len(), 1);
    assert_eq!(first.errors[0].target_id, TargetId::from(product_id(3)));
    assert_eq!(first.errors[0].attempts, 1);
    assert!(!first.is_complete());
    assert_eq!(fx.seo_title(3), None);

    fx.sink.heal(product_id(3));
    let second = fx
        .engine
        .apply(ApplyRequest::for_draft(&draft))
        .await
        .unwrap();

    assert!(second.already_applied);
    assert_eq!(second.written_this_call, 1);
    assert_eq!(second.applied_count, 5);
    assert!(second.errors.is_empty());
    assert_eq!(fx.seo_title(3).as_deref(), Some("Acme | Product 3"));

    for i in 1..=5 {
        assert_eq!(fx.sink.writes_for(&product_id(i)), 1, "product {i}");
    }
    assert_eq!(fx.sink.attempts(), 6);
    assert_eq!(fx.proposer.calls(), proposer_calls);
}

#[tokio::test]
async fn test_expired_draft_is_rejected() {
    let fx = Fixture::new(3);
    let draft = fx.draft(rules("Acme | ")).await;
    fx.clock.advance(TimeDelta::days(8));

    let err = fx
        .engine
        .apply(ApplyRequest::for_draft(&draft))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DraftExpired { .. }));
    assert!(err.is_recoverable());

    let stored = fx.engine.get_draft(draft.id).await.unwrap();
    assert_eq!(stored.status, DraftStatus::Ready);
    assert_eq!(stored.effective_status(fx.clock.now()), DraftStatus::Expired);
    assert_eq!(fx.sink.attempts(), 0);
}

#[tokio::test]
async fn test_applied_draft_can_resume_after_ttl() {
    let fx = Fixture::new(3);
    let draft = fx.draft(rules("Acme | ")).await;
    fx.sink.fail_on(product_id(2));
    fx.engine
        .apply(ApplyRequest::for_draft(&draft))
        .await
        .unwrap();

    fx.clock.advance(TimeDelta::days(30));
    fx.sink.heal(product_id(2));
    let result = fx
        .engine
        .apply(ApplyRequest::for_draft(&draft))
        .await
        .unwrap();
    assert!(result.already_applied);
    assert_eq!(result.applied_count, 3);
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_apply() {
    let failing = Arc::new(FailingAuditSink::default());
    let fx = Fixture::builder()
        .products(4)
        .audit(failing.clone())
        .build();
    let draft = fx.draft(rules("Acme | ")).await;

    let result = fx
        .engine
        .apply(ApplyRequest::for_draft(&draft))
        .await
        .unwrap();
    assert_eq!(result.applied_count, 4);
    assert_eq!(failing.attempts(), 4);
    assert!(matches!(
        fx.engine.audit_records(draft.id).await,
        Err(EngineError::Audit(_))
    ));
}

#[tokio::test]
async fn test_audit_records_snapshots_and_context() {
    let fx = Fixture::new(2);
    let draft = fx.draft(rules("Acme | ")).await;
    let request = ApplyRequest::for_draft(&draft)
        .with_context(ApplyContext::new("alice").with_reason("spring launch"));
    fx.engine.apply(request).await.unwrap();

    let records = fx.engine.audit_records(draft.id).await.unwrap();
    assert_eq!(records.len(), 2);

    let mut after = FieldMap::new();
    after.insert("seo_title".into(), "Acme | Product 1".into());
    assert_eq!(
        records[0].outcome,
        AuditOutcome::Written {
            before: Some(FieldMap::new()),
            after,
        }
    );
    assert_eq!(records[0].context.actor, "alice");
    assert_eq!(records[0].context.reason.as_deref(), Some("spring launch"));
    assert!(fx.audit.verify_integrity().is_ok());
}

#[tokio::test]
async fn test_failed_proposals_are_skipped() {
    let fx = Fixture::new(4);
    fx.proposer.fail_on(product_id(2));
    let draft = fx.draft(rules("Acme | ")).await;
    assert_eq!(draft.status, DraftStatus::Partial);

    let result = fx
        .engine
        .apply(ApplyRequest::for_draft(&draft))
        .await
        .unwrap();
    assert_eq!(result.applied_count, 3);
    assert_eq!(result.skipped_count, 1);
    assert!(result.errors.is_empty());
    assert_eq!(fx.seo_title(2), None);
}

#[tokio::test]
async fn test_lookup_failures() {
    let fx = Fixture::new(2);
    let fingerprints = fx
        .engine
        .preview(&rules("Acme | "), &missing_titles(), None)
        .await
        .unwrap();
    let request = ApplyRequest::new(
        PROJECT,
        PLAYBOOK,
        fingerprints.scope_fingerprint,
        fingerprints.rules_fingerprint,
    );

    let err = fx.engine.apply(request.clone()).await.unwrap_err();
    assert!(matches!(err, EngineError::DraftNotFound(_)));

    // A draft pinned under another playbook is not visible
    let draft = fx.draft(rules("Acme | ")).await;
    let mut foreign = request.with_draft(draft.id);
    foreign.playbook_id = "other".into();
    let err = fx.engine.apply(foreign).await.unwrap_err();
    assert!(matches!(err, EngineError::DraftNotFound(_)));
}

#[tokio::test]
async fn test_cancelled_draft_is_not_applicable() {
    let flag = CancellationFlag::new();
    let fx = Fixture::builder()
        .products(4)
        .proposer(ScriptedProposer::new().with_cancel_after(2, flag.clone()))
        .build();
    let rules = rules("Acme | ");
    let err = fx
        .engine
        .generate_draft_with_cancel(PROJECT, PLAYBOOK, rules, missing_titles(), &flag)
        .await
        .unwrap_err();
    let EngineError::Cancelled { draft_id } = err else {
        panic!("expected Cancelled");
    };

    let draft = fx.engine.get_draft(draft_id).await.unwrap();
    let err = fx
        .engine
        .apply(ApplyRequest::for_draft(&draft))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::DraftNotReady {
            status: DraftStatus::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn test_expired_newer_draft_does_not_shadow_applied_one() {
    let fx = Fixture::new(3);
    let applied = fx.draft(rules("Acme | ")).await;
    fx.engine
        .apply(ApplyRequest::for_draft(&applied))
        .await
        .unwrap();

    fx.add_product(4);
    let newer = fx.draft(rules("Acme | ")).await;
    assert_ne!(newer.id, applied.id);
    fx.clock.advance(TimeDelta::days(8));

    let retry = ApplyRequest::new(
        PROJECT,
        PLAYBOOK,
        applied.scope_fingerprint,
        applied.rules_fingerprint,
    );
    let result = fx.engine.apply(retry).await.unwrap();
    assert_eq!(result.draft_id, applied.id);
    assert!(result.already_applied);
    assert_eq!(result.applied_count, 3);
    assert_eq!(result.written_this_call, 0);
    assert_eq!(fx.seo_title(4), None);
}

#[tokio::test]
async fn test_unpinned_lookup_reports_expiry() {
    let fx = Fixture::new(2);
    let draft = fx.draft(rules("Acme | ")).await;
    fx.clock.advance(TimeDelta::days(8));

    let request = ApplyRequest::new(
        PROJECT,
        PLAYBOOK,
        draft.scope_fingerprint,
        draft.rules_fingerprint,
    );
    let err = fx.engine.apply(request).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::DraftExpired { draft_id, .. } if draft_id == draft.id
    ));
}

#[tokio::test]
async fn test_removed_record_invalidates_draft() {
    let fx = Fixture::new(3);
    let draft = fx.draft(rules("Acme | ")).await;

    let removed = fx.catalog.remove(&TargetId::from(product_id(2)));
    assert!(removed.is_some());

    let err = fx
        .engine
        .apply(ApplyRequest::for_draft(&draft))
        .await
        .unwrap_err();
    let remaining = [TargetId::from(product_id(1)), TargetId::from(product_id(3))];
    assert!(matches!(
        err,
        EngineError::ScopeInvalid { current, .. } if current == ScopeFingerprint::of(&remaining)
    ));
    assert_eq!(fx.sink.attempts(), 0);
}
