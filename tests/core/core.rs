use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;

use rusqlite::params;
use techpath::core::authz::{self, Role};
use techpath::core::broker::{AUDIT_LOG_NAME, Broker};
use techpath::core::config::{self, Config, RoadmapFallback};
use techpath::core::db;
use techpath::core::error::TechPathError;
use techpath::core::store::{self, STORE_DIR_NAME, Store};
use techpath::plugins::achievements::{FIRST_STEP_TITLE, list_user_achievements};
use techpath::plugins::catalog::{parse_catalog, seed_catalog};
use techpath::plugins::mentorship::{ConnectionStatus, decide_connection, request_mentorship};
use techpath::plugins::progress::{
    ProgressStatus, ReviewAction, review_progress, submit_milestone,
};
use techpath::plugins::roadmap::resolve_roadmap;
use techpath::plugins::users::{create_user, list_users};
use techpath::subsystems::{SUBSYSTEMS, initialize_all};
use tempfile::tempdir;

#[test]
fn initialize_all_is_idempotent_and_enables_pragmas() {
    let tmp = tempdir().expect("tempdir");
    initialize_all(tmp.path()).expect("first init");
    initialize_all(tmp.path()).expect("second init");
    assert_eq!(SUBSYSTEMS[0].name, "users");

    let db_path = db::techpath_db_path(tmp.path());
    assert!(db_path.exists());
    let conn = db::db_connect(&db_path.to_string_lossy()).expect("db connect");
    let fk_on: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .expect("pragma foreign_keys");
    assert_eq!(fk_on, 1);
    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("pragma journal_mode");
    assert_eq!(mode.to_lowercase(), "wal");

    for table in [
        "users",
        "assessment_results",
        "career_paths",
        "milestones",
        "learning_resources",
        "user_progress",
        "mentorship_connections",
        "conversation_threads",
        "notifications",
        "achievements",
        "user_achievements",
    ] {
        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
                params![table],
                |row| row.get(0),
            )
            .expect("sqlite_master");
        assert!(exists, "missing table {}", table);
    }
}

#[test]
fn broker_audits_outcomes_and_rolls_back_failures() {
    let tmp = tempdir().expect("tempdir");
    initialize_all(tmp.path()).expect("init");
    let broker = Broker::new(tmp.path());
    let before = broker.audit_events().expect("audit").len();

    broker
        .write("tester", "audit.ok", |conn| {
            conn.execute(
                "INSERT INTO notifications(id, recipient_id, message, is_read, created_at)
                 VALUES('NT_1', 'U_1', 'kept', 0, '1Z')",
                [],
            )?;
            Ok(())
        })
        .expect("write ok");

    let err = broker
        .write("tester", "audit.fail", |conn| {
            conn.execute(
                "INSERT INTO notifications(id, recipient_id, message, is_read, created_at)
                 VALUES('NT_2', 'U_1', 'dropped', 0, '1Z')",
                [],
            )?;
            Err::<(), _>(TechPathError::Conflict("abort".into()))
        })
        .unwrap_err();
    assert!(matches!(err, TechPathError::Conflict(_)));

    let count: i64 = broker
        .read(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM notifications", [], |row| row.get(0))?)
        })
        .expect("read");
    assert_eq!(count, 1);

    let events = broker.audit_events().expect("audit");
    assert_eq!(events.len(), before + 2);
    let last_two: Vec<(&str, &str)> = events[before..]
        .iter()
        .map(|e| (e.op.as_str(), e.status.as_str()))
        .collect();
    assert_eq!(
        last_two,
        [("audit.ok", "success"), ("audit.fail", "rejected")]
    );
    assert!(tmp.path().join(AUDIT_LOG_NAME).exists());
}

#[test]
fn config_file_is_loaded_with_defaults_for_missing_sections() {
    let tmp = tempdir().expect("tempdir");
    assert_eq!(Config::load(tmp.path()).expect("missing file"), Config::default());

    fs::write(
        config::config_path(tmp.path()),
        "[roadmap]\nfallback = \"none\"\n[achievements]\nspecialist_threshold = 5\n",
    )
    .expect("write config");
    let store = Store::open(tmp.path()).expect("open");
    assert_eq!(store.config.roadmap.fallback, RoadmapFallback::None);
    assert_eq!(store.config.achievements.specialist_threshold, 5);
    assert!(store.config.progress.allow_toggle);

    fs::write(config::config_path(tmp.path()), "[roadmap\n").expect("write config");
    let err = Store::open(tmp.path()).unwrap_err();
    assert!(matches!(err, TechPathError::ConfigError(_)));
}

#[test]
fn store_root_is_found_from_nested_directories() {
    let tmp = tempdir().expect("tempdir");
    let store_dir = tmp.path().join(STORE_DIR_NAME);
    fs::create_dir_all(&store_dir).expect("store dir");
    let nested = tmp.path().join("a").join("b");
    fs::create_dir_all(&nested).expect("nested");

    assert_eq!(store::find_store_root(&nested).expect("found"), store_dir);
}

#[test]
fn duplicate_users_conflict() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open");
    initialize_all(&store.root).expect("init");

    create_user(&store, "ada", "ada@example.com", Role::Student).expect("create");
    let err = create_user(&store, "ada", "other@example.com", Role::Student).unwrap_err();
    assert!(matches!(err, TechPathError::Conflict(_)));
    let err = create_user(&store, "ada2", "ADA@example.com", Role::Mentor).unwrap_err();
    assert!(matches!(err, TechPathError::Conflict(_)));
    let err = create_user(&store, "eve", "not-an-email", Role::Student).unwrap_err();
    assert!(matches!(err, TechPathError::ValidationError(_)));

    assert_eq!(list_users(&store, None).expect("list").len(), 1);
    assert!(list_users(&store, Some(Role::Mentor)).expect("list").is_empty());
}

#[test]
fn role_guards_map_to_distinct_errors() {
    let err = authz::ensure_reviewer("U_1", Role::Student, "progress.review").unwrap_err();
    assert_eq!(err.code(), "unauthorized");
    let err =
        authz::ensure_assigned_reviewer("U_2", Role::Mentor, Some("U_3"), "progress.review")
            .unwrap_err();
    assert_eq!(err.code(), "forbidden");
    assert!(authz::ensure_assigned_reviewer("U_9", Role::Admin, None, "progress.review").is_ok());
}

#[test]
fn concurrent_submissions_leave_one_progress_row() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open");
    initialize_all(&store.root).expect("init");
    seed_catalog(
        &store,
        &parse_catalog(
            "[[paths]]\ntrait_code = \"C\"\ntitle = \"Ops\"\n\
             [[paths.milestones]]\ntitle = \"Spreadsheets\"\n",
        )
        .expect("catalog"),
    )
    .expect("seed");
    let student = create_user(&store, "ada", "ada@example.com", Role::Student).expect("user");
    let milestone_id = resolve_roadmap(&store, &student.id, "C").expect("roadmap").milestones[0]
        .id
        .clone();

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            let student_id = student.id.clone();
            let milestone_id = milestone_id.clone();
            thread::spawn(move || {
                barrier.wait();
                submit_milestone(
                    &store,
                    &student_id,
                    &milestone_id,
                    &format!("https://example.com/{}", i),
                    None,
                )
            })
        })
        .collect();
    for handle in handles {
        let row = handle.join().expect("join").expect("submit");
        assert_eq!(row.status, ProgressStatus::PendingReview);
    }

    let rows: i64 = store
        .broker()
        .read(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM user_progress WHERE user_id = ?1 AND milestone_id = ?2",
                params![student.id, milestone_id],
                |row| row.get(0),
            )?)
        })
        .expect("count");
    assert_eq!(rows, 1);
}

#[test]
fn racing_requests_for_one_pair_leave_one_connection() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open");
    initialize_all(&store.root).expect("init");
    let student = create_user(&store, "ada", "ada@example.com", Role::Student).expect("student");
    let mentor = create_user(&store, "grace", "grace@example.com", Role::Mentor).expect("mentor");

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|i| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            let student_id = student.id.clone();
            let mentor_id = mentor.id.clone();
            thread::spawn(move || {
                barrier.wait();
                request_mentorship(&store, &student_id, &mentor_id, &format!("request {}", i))
            })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        match handle.join().expect("join") {
            Ok(c) => {
                assert_eq!(c.status, ConnectionStatus::Pending);
                accepted += 1;
            }
            Err(e) => assert!(matches!(e, TechPathError::Conflict(_)), "unexpected {:?}", e),
        }
    }
    assert_eq!(accepted, 1);

    let rows: i64 = store
        .broker()
        .read(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM mentorship_connections WHERE student_id = ?1 AND mentor_id = ?2",
                params![student.id, mentor.id],
                |row| row.get(0),
            )?)
        })
        .expect("count");
    assert_eq!(rows, 1);
}

#[test]
fn concurrent_approvals_award_each_badge_once() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open");
    initialize_all(&store.root).expect("init");
    seed_catalog(
        &store,
        &parse_catalog(
            "[[paths]]\ntrait_code = \"R\"\ntitle = \"Infrastructure\"\n\
             [[paths.milestones]]\ntitle = \"Linux\"\n\
             [[paths.milestones]]\ntitle = \"Networking\"\n\
             [[paths.milestones]]\ntitle = \"Containers\"\n",
        )
        .expect("catalog"),
    )
    .expect("seed");
    let student = create_user(&store, "ada", "ada@example.com", Role::Student).expect("student");
    let mentor = create_user(&store, "grace", "grace@example.com", Role::Mentor).expect("mentor");
    let c = request_mentorship(&store, &student.id, &mentor.id, "").expect("request");
    decide_connection(&store, &c.id, &mentor.id, ConnectionStatus::Accepted).expect("accept");

    let progress_ids: Vec<String> = resolve_roadmap(&store, &student.id, "R")
        .expect("roadmap")
        .milestones
        .iter()
        .map(|m| {
            submit_milestone(&store, &student.id, &m.id, "https://example.com/work", None)
                .expect("submit")
                .id
        })
        .collect();

    let barrier = Arc::new(Barrier::new(progress_ids.len()));
    let handles: Vec<_> = progress_ids
        .into_iter()
        .map(|progress_id| {
            let store = store.clone();
            let barrier = Arc::clone(&barrier);
            let mentor_id = mentor.id.clone();
            thread::spawn(move || {
                barrier.wait();
                review_progress(&store, &progress_id, &mentor_id, ReviewAction::Approve, "")
            })
        })
        .collect();

    let mut awarded: Vec<String> = Vec::new();
    for handle in handles {
        let outcome = handle.join().expect("join").expect("approve");
        assert_eq!(outcome.progress.status, ProgressStatus::Completed);
        awarded.extend(outcome.achievements.into_iter().map(|a| a.title));
    }
    awarded.sort();
    assert_eq!(awarded, ["First Step Taken", "Infrastructure Specialist"]);

    let badges = list_user_achievements(&store, &student.id).expect("badges");
    assert_eq!(badges.len(), 2);
    assert_eq!(badges.iter().filter(|b| b.title == FIRST_STEP_TITLE).count(), 1);
}
