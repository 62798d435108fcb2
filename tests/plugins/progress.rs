use std::sync::Arc;

use techpath::core::authz::Role;
use techpath::core::config::Config;
use techpath::core::error::TechPathError;
use techpath::core::notify::NotificationSink;
use techpath::core::store::Store;
use techpath::plugins::achievements::{FIRST_STEP_TITLE, list_user_achievements};
use techpath::plugins::catalog::{parse_catalog, seed_catalog};
use techpath::plugins::mentorship::{
    ConnectionStatus, MentorStats, decide_connection, mentor_stats, request_mentorship,
};
use techpath::plugins::notifications::list_notifications;
use techpath::plugins::progress::{
    ProgressStatus, ReviewAction, get_progress, pending_reviews, portfolio, progress_for,
    review_progress, submit_milestone, toggle_milestone,
};
use techpath::plugins::roadmap::resolve_roadmap;
use techpath::plugins::users::{User, create_user};
use techpath::subsystems::initialize_all;
use tempfile::{TempDir, tempdir};

const CATALOG: &str = r#"
[[paths]]
trait_code = "I"
title = "The Data & AI Path"

[[paths.milestones]]
title = "Master Python & SQL"

[[paths.milestones]]
title = "Learn Statistical Modeling"

[[paths.milestones]]
title = "Ship a Model"
"#;

struct Fixture {
    _tmp: TempDir,
    store: Store,
    student: User,
    mentor: User,
    milestones: Vec<String>,
}

fn fixture() -> Fixture {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap();
    initialize_all(&store.root).unwrap();
    seed_catalog(&store, &parse_catalog(CATALOG).unwrap()).unwrap();

    let student = create_user(&store, "ada", "ada@example.com", Role::Student).unwrap();
    let mentor = create_user(&store, "grace", "grace@example.com", Role::Mentor).unwrap();
    let milestones = resolve_roadmap(&store, &student.id, "I")
        .unwrap()
        .milestones
        .into_iter()
        .map(|m| m.id)
        .collect();
    Fixture {
        _tmp: tmp,
        store,
        student,
        mentor,
        milestones,
    }
}

fn assign(store: &Store, student: &User, mentor: &User) {
    let c = request_mentorship(store, &student.id, &mentor.id, "hi").unwrap();
    decide_connection(store, &c.id, &mentor.id, ConnectionStatus::Accepted).unwrap();
}

fn messages(store: &Store, user_id: &str) -> Vec<String> {
    list_notifications(store, user_id, false)
        .unwrap()
        .into_iter()
        .map(|n| n.message)
        .collect()
}

#[test]
fn blank_url_is_rejected_before_storage() {
    let f = fixture();
    let err = submit_milestone(&f.store, "U_nobody", "MS_nothing", "   ", None).unwrap_err();
    assert!(matches!(err, TechPathError::ValidationError(_)));
}

#[test]
fn unknown_milestone_or_user_is_not_found() {
    let f = fixture();
    let err =
        submit_milestone(&f.store, &f.student.id, "MS_missing", "https://x", None).unwrap_err();
    assert!(matches!(err, TechPathError::NotFound(_)));
    let err =
        submit_milestone(&f.store, "U_missing", &f.milestones[0], "https://x", None).unwrap_err();
    assert!(matches!(err, TechPathError::NotFound(_)));
}

#[test]
fn submit_moves_to_pending_review_and_notifies_mentor() {
    let f = fixture();
    assign(&f.store, &f.student, &f.mentor);

    let row = submit_milestone(
        &f.store,
        &f.student.id,
        &f.milestones[0],
        "https://github.com/ada/sql",
        Some("first pass"),
    )
    .unwrap();
    assert_eq!(row.status, ProgressStatus::PendingReview);
    assert_eq!(row.submission_url.as_deref(), Some("https://github.com/ada/sql"));
    assert_eq!(row.submission_notes.as_deref(), Some("first pass"));
    assert!(row.submitted_at.is_some());
    assert!(row.completed_at.is_none());

    let mentor_inbox = messages(&f.store, &f.mentor.id);
    assert!(
        mentor_inbox
            .iter()
            .any(|m| m == "ada submitted \"Master Python & SQL\" for review.")
    );
}

#[test]
fn submit_without_mentor_succeeds_silently() {
    let f = fixture();
    let row =
        submit_milestone(&f.store, &f.student.id, &f.milestones[0], "https://x", None).unwrap();
    assert_eq!(row.status, ProgressStatus::PendingReview);
    assert!(messages(&f.store, &f.mentor.id).is_empty());
}

#[test]
fn student_cannot_review() {
    let f = fixture();
    assign(&f.store, &f.student, &f.mentor);
    let row =
        submit_milestone(&f.store, &f.student.id, &f.milestones[0], "https://x", None).unwrap();

    let err = review_progress(&f.store, &row.id, &f.student.id, ReviewAction::Approve, "")
        .unwrap_err();
    assert!(matches!(err, TechPathError::Unauthorized(_)));
}

#[test]
fn unassigned_mentor_is_forbidden_but_admin_may_review() {
    let f = fixture();
    assign(&f.store, &f.student, &f.mentor);
    let other = create_user(&f.store, "linus", "linus@example.com", Role::Mentor).unwrap();
    let admin = create_user(&f.store, "root", "root@example.com", Role::Admin).unwrap();
    let row =
        submit_milestone(&f.store, &f.student.id, &f.milestones[0], "https://x", None).unwrap();

    let err = review_progress(&f.store, &row.id, &other.id, ReviewAction::Approve, "").unwrap_err();
    assert!(matches!(err, TechPathError::Forbidden(_)));

    let outcome =
        review_progress(&f.store, &row.id, &admin.id, ReviewAction::Approve, "ok").unwrap();
    assert_eq!(outcome.progress.status, ProgressStatus::Completed);
}

#[test]
fn unknown_progress_or_actor_is_not_found() {
    let f = fixture();
    let err = review_progress(&f.store, "UP_missing", &f.mentor.id, ReviewAction::Approve, "")
        .unwrap_err();
    assert!(matches!(err, TechPathError::NotFound(_)));

    let row =
        submit_milestone(&f.store, &f.student.id, &f.milestones[0], "https://x", None).unwrap();
    let err =
        review_progress(&f.store, &row.id, "U_missing", ReviewAction::Approve, "").unwrap_err();
    assert!(matches!(err, TechPathError::NotFound(_)));
}

#[test]
fn approve_completes_awards_and_notifies() {
    let f = fixture();
    assign(&f.store, &f.student, &f.mentor);
    let row =
        submit_milestone(&f.store, &f.student.id, &f.milestones[0], "https://x", None).unwrap();

    let outcome = review_progress(
        &f.store,
        &row.id,
        &f.mentor.id,
        ReviewAction::Approve,
        "Great job!",
    )
    .unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.progress.status, ProgressStatus::Completed);
    assert!(outcome.progress.completed_at.is_some());
    assert_eq!(outcome.progress.mentor_feedback.as_deref(), Some("Great job!"));
    assert_eq!(outcome.achievements.len(), 1);
    assert_eq!(outcome.achievements[0].title, FIRST_STEP_TITLE);

    let inbox = messages(&f.store, &f.student.id);
    assert!(inbox.iter().any(|m| m
        == "Your submission for \"Master Python & SQL\" was approved! Feedback: Great job!"));
}

#[test]
fn approving_twice_is_a_no_op() {
    let f = fixture();
    assign(&f.store, &f.student, &f.mentor);
    let row =
        submit_milestone(&f.store, &f.student.id, &f.milestones[0], "https://x", None).unwrap();

    review_progress(&f.store, &row.id, &f.mentor.id, ReviewAction::Approve, "yes").unwrap();
    let again =
        review_progress(&f.store, &row.id, &f.mentor.id, ReviewAction::Approve, "yes").unwrap();
    assert!(!again.changed);
    assert!(again.achievements.is_empty());

    let badges = list_user_achievements(&f.store, &f.student.id).unwrap();
    assert_eq!(badges.iter().filter(|b| b.title == FIRST_STEP_TITLE).count(), 1);
    let approvals = messages(&f.store, &f.student.id)
        .into_iter()
        .filter(|m| m.contains("was approved"))
        .count();
    assert_eq!(approvals, 1);
}

#[test]
fn reject_keeps_completed_at_and_allows_resubmission() {
    let f = fixture();
    assign(&f.store, &f.student, &f.mentor);
    let row =
        submit_milestone(&f.store, &f.student.id, &f.milestones[1], "https://x", None).unwrap();

    let outcome = review_progress(
        &f.store,
        &row.id,
        &f.mentor.id,
        ReviewAction::Reject,
        "Add tests",
    )
    .unwrap();
    assert_eq!(outcome.progress.status, ProgressStatus::Rejected);
    assert!(outcome.progress.completed_at.is_none());
    assert_eq!(outcome.progress.mentor_feedback.as_deref(), Some("Add tests"));
    assert!(messages(&f.store, &f.student.id)
        .iter()
        .any(|m| m.contains("needs changes. Feedback: Add tests")));

    let resubmitted =
        submit_milestone(&f.store, &f.student.id, &f.milestones[1], "https://y", None).unwrap();
    assert_eq!(resubmitted.id, row.id);
    assert_eq!(resubmitted.status, ProgressStatus::PendingReview);
    assert_eq!(resubmitted.submission_url.as_deref(), Some("https://y"));
}

#[test]
fn completed_rows_reject_further_changes() {
    let f = fixture();
    assign(&f.store, &f.student, &f.mentor);
    let row =
        submit_milestone(&f.store, &f.student.id, &f.milestones[0], "https://x", None).unwrap();
    review_progress(&f.store, &row.id, &f.mentor.id, ReviewAction::Approve, "").unwrap();

    let err =
        review_progress(&f.store, &row.id, &f.mentor.id, ReviewAction::Reject, "no").unwrap_err();
    assert!(matches!(err, TechPathError::Conflict(_)));

    let err =
        submit_milestone(&f.store, &f.student.id, &f.milestones[0], "https://z", None).unwrap_err();
    assert!(matches!(err, TechPathError::Conflict(_)));
    assert_eq!(get_progress(&f.store, &row.id).unwrap().status, ProgressStatus::Completed);
}

#[test]
fn never_submitted_rows_cannot_be_reviewed() {
    let f = fixture();
    assign(&f.store, &f.student, &f.mentor);
    let row = toggle_milestone(&f.store, &f.student.id, &f.milestones[2]).unwrap();
    let row = toggle_milestone(&f.store, &f.student.id, &row.milestone_id).unwrap();
    assert_eq!(row.status, ProgressStatus::InProgress);

    let err =
        review_progress(&f.store, &row.id, &f.mentor.id, ReviewAction::Approve, "").unwrap_err();
    assert!(matches!(err, TechPathError::Conflict(_)));
}

#[test]
fn toggle_flips_completion_without_badges() {
    let f = fixture();
    let on = toggle_milestone(&f.store, &f.student.id, &f.milestones[0]).unwrap();
    assert_eq!(on.status, ProgressStatus::Completed);
    assert!(on.completed_at.is_some());
    assert!(list_user_achievements(&f.store, &f.student.id).unwrap().is_empty());

    let off = toggle_milestone(&f.store, &f.student.id, &f.milestones[0]).unwrap();
    assert_eq!(off.id, on.id);
    assert_eq!(off.status, ProgressStatus::InProgress);
    assert!(off.completed_at.is_none());
}

#[test]
fn toggle_can_be_disabled_by_configuration() {
    let f = fixture();
    let mut config = Config::default();
    config.progress.allow_toggle = false;
    let store = f.store.clone().with_config(config);

    let err = toggle_milestone(&store, &f.student.id, &f.milestones[0]).unwrap_err();
    assert!(matches!(err, TechPathError::Forbidden(_)));
    assert!(progress_for(&store, &f.student.id, &f.milestones[0]).unwrap().is_none());
}

#[test]
fn pending_queue_lists_roster_submissions_only() {
    let f = fixture();
    assign(&f.store, &f.student, &f.mentor);
    let loner = create_user(&f.store, "bob", "bob@example.com", Role::Student).unwrap();
    submit_milestone(&f.store, &f.student.id, &f.milestones[0], "https://a", Some("n1")).unwrap();
    submit_milestone(&f.store, &loner.id, &f.milestones[0], "https://b", None).unwrap();

    let queue = pending_reviews(&f.store, &f.mentor.id).unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].student_username, "ada");
    assert_eq!(queue[0].milestone_title, "Master Python & SQL");
    assert_eq!(queue[0].path_title, "The Data & AI Path");
    assert_eq!(queue[0].submission_notes.as_deref(), Some("n1"));

    let err = pending_reviews(&f.store, &f.student.id).unwrap_err();
    assert!(matches!(err, TechPathError::Unauthorized(_)));
}

struct FailingSink;

impl NotificationSink for FailingSink {
    fn notify(&self, _recipient_id: &str, _message: &str) -> Result<(), TechPathError> {
        Err(TechPathError::IoError(std::io::Error::other("push gateway down")))
    }
}

#[test]
fn sink_failures_never_fail_the_transition() {
    let f = fixture();
    assign(&f.store, &f.student, &f.mentor);
    let store = f.store.clone().with_notifier(Arc::new(FailingSink));

    let row = submit_milestone(&store, &f.student.id, &f.milestones[0], "https://x", None).unwrap();
    let outcome =
        review_progress(&store, &row.id, &f.mentor.id, ReviewAction::Approve, "").unwrap();
    assert_eq!(outcome.progress.status, ProgressStatus::Completed);
    assert_eq!(outcome.achievements.len(), 1);
}

#[test]
fn rejection_without_feedback_is_refused() {
    let f = fixture();
    assign(&f.store, &f.student, &f.mentor);
    let row =
        submit_milestone(&f.store, &f.student.id, &f.milestones[0], "https://x", None).unwrap();
    let before = messages(&f.store, &f.student.id).len();

    let err =
        review_progress(&f.store, &row.id, &f.mentor.id, ReviewAction::Reject, "   ").unwrap_err();
    assert!(matches!(err, TechPathError::ValidationError(_)));
    assert_eq!(
        get_progress(&f.store, &row.id).unwrap().status,
        ProgressStatus::PendingReview
    );
    assert_eq!(messages(&f.store, &f.student.id).len(), before);
}

#[test]
fn portfolio_lists_completed_milestones_with_notes() {
    let f = fixture();
    assign(&f.store, &f.student, &f.mentor);
    let approved =
        submit_milestone(&f.store, &f.student.id, &f.milestones[0], "https://x", None).unwrap();
    review_progress(
        &f.store,
        &approved.id,
        &f.mentor.id,
        ReviewAction::Approve,
        "Nice work",
    )
    .unwrap();
    submit_milestone(&f.store, &f.student.id, &f.milestones[1], "https://y", None).unwrap();
    toggle_milestone(&f.store, &f.student.id, &f.milestones[2]).unwrap();

    let entries = portfolio(&f.store, &f.student.id).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].milestone_title, "Ship a Model");
    assert!(entries[0].project_url.is_none());
    let reviewed = &entries[1];
    assert_eq!(reviewed.progress_id, approved.id);
    assert_eq!(reviewed.milestone_title, "Master Python & SQL");
    assert_eq!(reviewed.path_title, "The Data & AI Path");
    assert_eq!(reviewed.project_url.as_deref(), Some("https://x"));
    assert_eq!(reviewed.mentor_notes.as_deref(), Some("Nice work"));
    assert!(reviewed.completion_date.is_some());

    let err = portfolio(&f.store, "U_missing").unwrap_err();
    assert!(matches!(err, TechPathError::NotFound(_)));
}

#[test]
fn mentor_stats_count_roster_and_reviews() {
    let f = fixture();
    let bob = create_user(&f.store, "bob", "bob@example.com", Role::Student).unwrap();
    assign(&f.store, &f.student, &f.mentor);
    assign(&f.store, &bob, &f.mentor);

    let row =
        submit_milestone(&f.store, &f.student.id, &f.milestones[0], "https://x", None).unwrap();
    review_progress(&f.store, &row.id, &f.mentor.id, ReviewAction::Approve, "").unwrap();
    submit_milestone(&f.store, &f.student.id, &f.milestones[1], "https://y", None).unwrap();
    submit_milestone(&f.store, &bob.id, &f.milestones[0], "https://z", None).unwrap();
    toggle_milestone(&f.store, &bob.id, &f.milestones[2]).unwrap();

    assert_eq!(
        mentor_stats(&f.store, &f.mentor.id).unwrap(),
        MentorStats {
            active_students: 2,
            pending_reviews: 2,
            total_approved: 1,
        }
    );

    let err = mentor_stats(&f.store, &f.student.id).unwrap_err();
    assert!(matches!(err, TechPathError::Unauthorized(_)));
}
