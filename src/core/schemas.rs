//! Table definitions for every subsystem.
//!
//! All subsystems share `techpath.db`. Each constant is applied with `execute_batch` and must be
//! idempotent (`IF NOT EXISTS`).

pub const TECHPATH_DB_NAME: &str = "techpath.db";

pub const USERS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        role TEXT NOT NULL CHECK (role IN ('STUDENT', 'MENTOR', 'ADMIN')),
        mentor_id TEXT REFERENCES users(id) ON DELETE SET NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_users_mentor ON users(mentor_id);
    CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
";

pub const ASSESSMENT_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS assessment_results (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        scores_json TEXT NOT NULL,
        top_trait_code TEXT NOT NULL,
        blended_code TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_assessment_results_user ON assessment_results(user_id, created_at);
";

pub const CATALOG_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS career_paths (
        id TEXT PRIMARY KEY,
        trait_code TEXT NOT NULL UNIQUE CHECK (length(trait_code) BETWEEN 1 AND 2),
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        duration TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS milestones (
        id TEXT PRIMARY KEY,
        path_id TEXT NOT NULL REFERENCES career_paths(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        sort_order INTEGER NOT NULL DEFAULT 0,
        UNIQUE (path_id, title)
    );
    CREATE TABLE IF NOT EXISTS learning_resources (
        id TEXT PRIMARY KEY,
        milestone_id TEXT NOT NULL REFERENCES milestones(id) ON DELETE CASCADE,
        title TEXT NOT NULL,
        url TEXT NOT NULL,
        resource_type TEXT NOT NULL CHECK (resource_type IN ('VIDEO', 'DOC', 'COURSE')),
        category TEXT NOT NULL DEFAULT ''
    );
    CREATE INDEX IF NOT EXISTS idx_milestones_path ON milestones(path_id, sort_order);
    CREATE INDEX IF NOT EXISTS idx_resources_milestone ON learning_resources(milestone_id);
";

pub const PROGRESS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS user_progress (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        milestone_id TEXT NOT NULL REFERENCES milestones(id) ON DELETE CASCADE,
        status TEXT NOT NULL DEFAULT 'IN_PROGRESS'
            CHECK (status IN ('IN_PROGRESS', 'PENDING_REVIEW', 'COMPLETED', 'REJECTED')),
        submission_url TEXT,
        submission_notes TEXT,
        mentor_feedback TEXT,
        submitted_at TEXT,
        completed_at TEXT,
        updated_at TEXT NOT NULL,
        UNIQUE (user_id, milestone_id)
    );
    CREATE INDEX IF NOT EXISTS idx_progress_status ON user_progress(status);
";

pub const MENTORSHIP_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS mentorship_connections (
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        mentor_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        status TEXT NOT NULL DEFAULT 'PENDING'
            CHECK (status IN ('PENDING', 'ACCEPTED', 'DECLINED', 'BLOCKED')),
        message TEXT NOT NULL DEFAULT '',
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (student_id, mentor_id)
    );
    CREATE TABLE IF NOT EXISTS conversation_threads (
        id TEXT PRIMARY KEY,
        student_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        mentor_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at TEXT NOT NULL,
        UNIQUE (student_id, mentor_id)
    );
    CREATE INDEX IF NOT EXISTS idx_connections_mentor ON mentorship_connections(mentor_id, status);
";

pub const NOTIFICATIONS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS notifications (
        id TEXT PRIMARY KEY,
        recipient_id TEXT NOT NULL,
        message TEXT NOT NULL,
        is_read INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_notifications_recipient ON notifications(recipient_id, is_read);
";

pub const ACHIEVEMENTS_DB_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS achievements (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL UNIQUE,
        description TEXT NOT NULL DEFAULT '',
        badge_icon TEXT NOT NULL DEFAULT '',
        points INTEGER NOT NULL DEFAULT 0
    );
    CREATE TABLE IF NOT EXISTS user_achievements (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        achievement_id TEXT NOT NULL REFERENCES achievements(id) ON DELETE CASCADE,
        earned_at TEXT NOT NULL,
        is_notified INTEGER NOT NULL DEFAULT 0,
        UNIQUE (user_id, achievement_id)
    );
";
