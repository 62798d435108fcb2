use techpath::core::authz::Role;
use techpath::core::config::Config;
use techpath::core::store::Store;
use techpath::plugins::achievements::{
    FIRST_STEP_TITLE, leaderboard, list_user_achievements, on_milestone_completed,
    specialist_title, take_unnotified,
};
use techpath::plugins::catalog::{parse_catalog, seed_catalog};
use techpath::plugins::mentorship::{ConnectionStatus, decide_connection, request_mentorship};
use techpath::plugins::progress::{ReviewAction, review_progress, submit_milestone};
use techpath::plugins::roadmap::{RoadmapView, resolve_roadmap};
use techpath::plugins::users::{User, create_user};
use techpath::subsystems::initialize_all;
use tempfile::{TempDir, tempdir};

const CATALOG: &str = r#"
[[paths]]
trait_code = "R"
title = "Infrastructure"

[[paths.milestones]]
title = "Linux Basics"

[[paths.milestones]]
title = "Networking"

[[paths.milestones]]
title = "Containers"

[[paths.milestones]]
title = "Kubernetes"
"#;

struct Fixture {
    _tmp: TempDir,
    store: Store,
    mentor: User,
    path: RoadmapView,
}

fn fixture_with(config: Config) -> Fixture {
    let tmp = tempdir().unwrap();
    let store = Store::open(tmp.path()).unwrap().with_config(config);
    initialize_all(&store.root).unwrap();
    seed_catalog(&store, &parse_catalog(CATALOG).unwrap()).unwrap();
    let mentor = create_user(&store, "grace", "grace@example.com", Role::Mentor).unwrap();
    let path = resolve_roadmap(&store, &mentor.id, "R").unwrap();
    Fixture {
        _tmp: tmp,
        store,
        mentor,
        path,
    }
}

fn student(f: &Fixture, name: &str) -> User {
    let user =
        create_user(&f.store, name, &format!("{}@example.com", name), Role::Student).unwrap();
    let c = request_mentorship(&f.store, &user.id, &f.mentor.id, "").unwrap();
    decide_connection(&f.store, &c.id, &f.mentor.id, ConnectionStatus::Accepted).unwrap();
    user
}

fn complete(f: &Fixture, user: &User, index: usize) -> Vec<String> {
    let row = submit_milestone(
        &f.store,
        &user.id,
        &f.path.milestones[index].id,
        "https://example.com/work",
        None,
    )
    .unwrap();
    review_progress(&f.store, &row.id, &f.mentor.id, ReviewAction::Approve, "")
        .unwrap()
        .achievements
        .into_iter()
        .map(|a| a.title)
        .collect()
}

#[test]
fn first_completion_earns_first_step_once() {
    let f = fixture_with(Config::default());
    let ada = student(&f, "ada");

    assert_eq!(complete(&f, &ada, 0), [FIRST_STEP_TITLE]);
    assert!(complete(&f, &ada, 1).is_empty());

    let again = on_milestone_completed(&f.store, &ada.id, &f.path.path.id).unwrap();
    assert!(again.is_empty());
    assert_eq!(list_user_achievements(&f.store, &ada.id).unwrap().len(), 1);
}

#[test]
fn third_completion_in_a_path_earns_specialist() {
    let f = fixture_with(Config::default());
    let ada = student(&f, "ada");
    complete(&f, &ada, 0);
    complete(&f, &ada, 1);

    assert_eq!(complete(&f, &ada, 2), [specialist_title("Infrastructure")]);
    assert!(complete(&f, &ada, 3).is_empty());

    let badges = list_user_achievements(&f.store, &ada.id).unwrap();
    let specialist = badges
        .iter()
        .find(|b| b.title == "Infrastructure Specialist")
        .unwrap();
    assert_eq!(specialist.points, 150);
    assert_eq!(specialist.badge_icon, "ShieldCheck");
}

#[test]
fn specialist_threshold_is_configurable() {
    let mut config = Config::default();
    config.achievements.specialist_threshold = 1;
    let f = fixture_with(config);
    let ada = student(&f, "ada");

    let earned = complete(&f, &ada, 0);
    assert_eq!(earned.len(), 2);
    assert!(earned.contains(&FIRST_STEP_TITLE.to_string()));
}

#[test]
fn badge_definitions_are_shared_between_users() {
    let f = fixture_with(Config::default());
    let ada = student(&f, "ada");
    let bob = student(&f, "bob");
    complete(&f, &ada, 0);
    complete(&f, &bob, 0);

    let a = &list_user_achievements(&f.store, &ada.id).unwrap()[0];
    let b = &list_user_achievements(&f.store, &bob.id).unwrap()[0];
    assert_eq!(a.achievement_id, b.achievement_id);
}

#[test]
fn unnotified_badges_are_returned_once() {
    let f = fixture_with(Config::default());
    let ada = student(&f, "ada");
    complete(&f, &ada, 0);

    let fresh = take_unnotified(&f.store, &ada.id).unwrap();
    assert_eq!(fresh.len(), 1);
    assert_eq!(fresh[0].points, 50);
    assert!(take_unnotified(&f.store, &ada.id).unwrap().is_empty());
}

#[test]
fn leaderboard_ranks_students_by_points_then_name() {
    let f = fixture_with(Config::default());
    let zed = student(&f, "zed");
    let amy = student(&f, "amy");
    let bob = student(&f, "bob");
    for i in 0..3 {
        complete(&f, &zed, i);
    }
    complete(&f, &amy, 0);
    complete(&f, &bob, 0);

    let board = leaderboard(&f.store, 10).unwrap();
    let names: Vec<&str> = board.iter().map(|e| e.username.as_str()).collect();
    assert_eq!(names, ["zed", "amy", "bob"]);
    assert_eq!(board[0].points, 200);
    assert_eq!(board[0].badges, 2);
    assert_eq!(board[1].points, 50);

    assert_eq!(leaderboard(&f.store, 1).unwrap().len(), 1);
}
