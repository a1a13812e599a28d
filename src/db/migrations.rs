//! Database migrations module
//!
//! Code-based migrations for StoryShare. All migrations are embedded directly
//! in Rust code as SQL strings, supporting both SQLite and MySQL databases.
//!
//! # Usage
//!
//! ```ignore
//! use storyshare::db::{create_pool, migrations};
//!
//! let pool = create_pool(&config).await?;
//! migrations::run_migrations(&pool).await?;
//! ```
//!
//! # Architecture
//!
//! Each migration is defined as a `Migration` struct containing:
//! - `version`: Unique version number for ordering
//! - `name`: Human-readable migration name
//! - `up_sqlite`: SQL for SQLite database
//! - `up_mysql`: SQL for MySQL database
//!
//! Statements are split on `;`, so seed data must not contain semicolons.
//! Timestamps are always bound from Rust, except in seed rows.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;

use super::DynDatabasePool;
use crate::config::DatabaseDriver;
use crate::with_pool;

/// A database migration with SQL for both SQLite and MySQL
#[derive(Debug, Clone)]
pub struct Migration {
    /// Migration version number (must be unique and sequential)
    pub version: i32,
    /// Human-readable migration name
    pub name: &'static str,
    /// SQL statements for SQLite
    pub up_sqlite: &'static str,
    /// SQL statements for MySQL
    pub up_mysql: &'static str,
}

/// Migration record stored in the database
#[derive(Debug, Clone)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// All migrations, in application order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create_users",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username VARCHAR(32) NOT NULL UNIQUE,
                email VARCHAR(191) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                display_name VARCHAR(100),
                bio TEXT,
                role VARCHAR(20) NOT NULL DEFAULT 'member',
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                is_verified BOOLEAN NOT NULL DEFAULT 0,
                is_premium BOOLEAN NOT NULL DEFAULT 0,
                preferred_language VARCHAR(10),
                last_login_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_users_role ON users(role);
            CREATE INDEX IF NOT EXISTS idx_users_status ON users(status);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                username VARCHAR(32) NOT NULL UNIQUE,
                email VARCHAR(191) NOT NULL UNIQUE,
                password_hash VARCHAR(255) NOT NULL,
                display_name VARCHAR(100),
                bio TEXT,
                role VARCHAR(20) NOT NULL DEFAULT 'member',
                status VARCHAR(20) NOT NULL DEFAULT 'active',
                is_verified BOOLEAN NOT NULL DEFAULT FALSE,
                is_premium BOOLEAN NOT NULL DEFAULT FALSE,
                preferred_language VARCHAR(10),
                last_login_at DATETIME(6) NULL,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
            CREATE INDEX idx_users_role ON users(role);
            CREATE INDEX idx_users_status ON users(status);
        "#,
    },
    Migration {
        version: 2,
        name: "create_sessions",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(128) PRIMARY KEY,
                user_id INTEGER NOT NULL,
                csrf_token VARCHAR(128) NOT NULL,
                ip_address VARCHAR(64),
                user_agent VARCHAR(512),
                expires_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id VARCHAR(128) PRIMARY KEY,
                user_id BIGINT NOT NULL,
                csrf_token VARCHAR(128) NOT NULL,
                ip_address VARCHAR(64),
                user_agent VARCHAR(512),
                expires_at DATETIME(6) NOT NULL,
                created_at DATETIME(6) NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
            CREATE INDEX idx_sessions_user_id ON sessions(user_id);
            CREATE INDEX idx_sessions_expires_at ON sessions(expires_at);
        "#,
    },
    Migration {
        version: 3,
        name: "create_categories_and_tags",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug VARCHAR(100) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL,
                description TEXT,
                sort_order INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                slug VARCHAR(100) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            INSERT OR IGNORE INTO categories (slug, name, description, sort_order)
            VALUES ('living-with-ckd', 'Living with CKD', 'Everyday life with chronic kidney disease', 1);
            INSERT OR IGNORE INTO categories (slug, name, description, sort_order)
            VALUES ('dialysis', 'Dialysis', 'Experiences with haemodialysis and peritoneal dialysis', 2);
            INSERT OR IGNORE INTO categories (slug, name, description, sort_order)
            VALUES ('transplant', 'Transplant', 'Waiting lists, donors and life after transplant', 3);
            INSERT OR IGNORE INTO categories (slug, name, description, sort_order)
            VALUES ('caregivers', 'Caregivers', 'Stories from family members and carers', 4);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS categories (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                slug VARCHAR(100) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL,
                description TEXT,
                sort_order INT NOT NULL DEFAULT 0,
                created_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
            CREATE TABLE IF NOT EXISTS tags (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                slug VARCHAR(100) NOT NULL UNIQUE,
                name VARCHAR(100) NOT NULL,
                created_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
            INSERT IGNORE INTO categories (slug, name, description, sort_order)
            VALUES ('living-with-ckd', 'Living with CKD', 'Everyday life with chronic kidney disease', 1);
            INSERT IGNORE INTO categories (slug, name, description, sort_order)
            VALUES ('dialysis', 'Dialysis', 'Experiences with haemodialysis and peritoneal dialysis', 2);
            INSERT IGNORE INTO categories (slug, name, description, sort_order)
            VALUES ('transplant', 'Transplant', 'Waiting lists, donors and life after transplant', 3);
            INSERT IGNORE INTO categories (slug, name, description, sort_order)
            VALUES ('caregivers', 'Caregivers', 'Stories from family members and carers', 4);
        "#,
    },
    Migration {
        version: 4,
        name: "create_stories",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS stories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                author_id INTEGER NOT NULL,
                category_id INTEGER,
                slug VARCHAR(191) NOT NULL UNIQUE,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                access_level VARCHAR(20) NOT NULL DEFAULT 'public',
                original_language VARCHAR(10) NOT NULL,
                is_featured BOOLEAN NOT NULL DEFAULT 0,
                view_count INTEGER NOT NULL DEFAULT 0,
                moderation_note TEXT,
                moderated_by INTEGER,
                moderated_at TIMESTAMP,
                published_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (author_id) REFERENCES users(id),
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE SET NULL,
                FOREIGN KEY (moderated_by) REFERENCES users(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_stories_status ON stories(status);
            CREATE INDEX IF NOT EXISTS idx_stories_author_id ON stories(author_id);
            CREATE INDEX IF NOT EXISTS idx_stories_published_at ON stories(published_at);
            CREATE TABLE IF NOT EXISTS story_contents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                story_id INTEGER NOT NULL,
                language VARCHAR(10) NOT NULL,
                title VARCHAR(255) NOT NULL,
                summary TEXT,
                body TEXT NOT NULL,
                body_html TEXT NOT NULL,
                translator_id INTEGER,
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                UNIQUE (story_id, language),
                FOREIGN KEY (story_id) REFERENCES stories(id) ON DELETE CASCADE,
                FOREIGN KEY (translator_id) REFERENCES users(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_story_contents_language ON story_contents(language);
            CREATE TABLE IF NOT EXISTS story_tags (
                story_id INTEGER NOT NULL,
                tag_id INTEGER NOT NULL,
                PRIMARY KEY (story_id, tag_id),
                FOREIGN KEY (story_id) REFERENCES stories(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            );
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS stories (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                author_id BIGINT NOT NULL,
                category_id BIGINT NULL,
                slug VARCHAR(191) NOT NULL UNIQUE,
                status VARCHAR(20) NOT NULL DEFAULT 'draft',
                access_level VARCHAR(20) NOT NULL DEFAULT 'public',
                original_language VARCHAR(10) NOT NULL,
                is_featured BOOLEAN NOT NULL DEFAULT FALSE,
                view_count BIGINT NOT NULL DEFAULT 0,
                moderation_note TEXT,
                moderated_by BIGINT NULL,
                moderated_at DATETIME(6) NULL,
                published_at DATETIME(6) NULL,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                FOREIGN KEY (author_id) REFERENCES users(id),
                FOREIGN KEY (category_id) REFERENCES categories(id) ON DELETE SET NULL,
                FOREIGN KEY (moderated_by) REFERENCES users(id) ON DELETE SET NULL
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
            CREATE INDEX idx_stories_status ON stories(status);
            CREATE INDEX idx_stories_published_at ON stories(published_at);
            CREATE TABLE IF NOT EXISTS story_contents (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                story_id BIGINT NOT NULL,
                language VARCHAR(10) NOT NULL,
                title VARCHAR(255) NOT NULL,
                summary TEXT,
                body MEDIUMTEXT NOT NULL,
                body_html MEDIUMTEXT NOT NULL,
                translator_id BIGINT NULL,
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                UNIQUE KEY uq_story_contents_story_language (story_id, language),
                FOREIGN KEY (story_id) REFERENCES stories(id) ON DELETE CASCADE,
                FOREIGN KEY (translator_id) REFERENCES users(id) ON DELETE SET NULL
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
            CREATE INDEX idx_story_contents_language ON story_contents(language);
            CREATE TABLE IF NOT EXISTS story_tags (
                story_id BIGINT NOT NULL,
                tag_id BIGINT NOT NULL,
                PRIMARY KEY (story_id, tag_id),
                FOREIGN KEY (story_id) REFERENCES stories(id) ON DELETE CASCADE,
                FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
        "#,
    },
    Migration {
        version: 5,
        name: "create_comments",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS comments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                story_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                parent_id INTEGER,
                content TEXT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                created_at TIMESTAMP NOT NULL,
                updated_at TIMESTAMP NOT NULL,
                FOREIGN KEY (story_id) REFERENCES stories(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_id) REFERENCES comments(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_comments_story_id ON comments(story_id);
            CREATE INDEX IF NOT EXISTS idx_comments_status ON comments(status);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS comments (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                story_id BIGINT NOT NULL,
                user_id BIGINT NOT NULL,
                parent_id BIGINT NULL,
                content TEXT NOT NULL,
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                created_at DATETIME(6) NOT NULL,
                updated_at DATETIME(6) NOT NULL,
                FOREIGN KEY (story_id) REFERENCES stories(id) ON DELETE CASCADE,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (parent_id) REFERENCES comments(id) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
            CREATE INDEX idx_comments_status ON comments(status);
        "#,
    },
    Migration {
        version: 6,
        name: "create_notifications",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                kind VARCHAR(40) NOT NULL,
                title VARCHAR(255) NOT NULL,
                message TEXT NOT NULL,
                link VARCHAR(512),
                is_read BOOLEAN NOT NULL DEFAULT 0,
                read_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_notifications_user_read ON notifications(user_id, is_read);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                user_id BIGINT NOT NULL,
                kind VARCHAR(40) NOT NULL,
                title VARCHAR(255) NOT NULL,
                message TEXT NOT NULL,
                link VARCHAR(512),
                is_read BOOLEAN NOT NULL DEFAULT FALSE,
                read_at DATETIME(6) NULL,
                created_at DATETIME(6) NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
            CREATE INDEX idx_notifications_user_read ON notifications(user_id, is_read);
        "#,
    },
    Migration {
        version: 7,
        name: "create_translations",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS translations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                msg_key VARCHAR(150) NOT NULL,
                language VARCHAR(10) NOT NULL,
                value TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (msg_key, language)
            );
            CREATE INDEX IF NOT EXISTS idx_translations_language ON translations(language);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS translations (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                msg_key VARCHAR(150) NOT NULL,
                language VARCHAR(10) NOT NULL,
                value TEXT NOT NULL,
                updated_at DATETIME(6) NOT NULL DEFAULT CURRENT_TIMESTAMP(6),
                UNIQUE KEY uq_translations_key_language (msg_key, language)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
            CREATE INDEX idx_translations_language ON translations(language);
        "#,
    },
    Migration {
        version: 8,
        name: "create_settings",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS settings (
                setting_key VARCHAR(100) PRIMARY KEY,
                setting_value TEXT NOT NULL
            );
            INSERT OR IGNORE INTO settings (setting_key, setting_value) VALUES ('site_description', 'Stories of hope from people living with kidney disease');
            INSERT OR IGNORE INTO settings (setting_key, setting_value) VALUES ('registration_open', 'true');
            INSERT OR IGNORE INTO settings (setting_key, setting_value) VALUES ('comment_moderation', 'false');
            INSERT OR IGNORE INTO settings (setting_key, setting_value) VALUES ('smtp_host', '');
            INSERT OR IGNORE INTO settings (setting_key, setting_value) VALUES ('smtp_port', '587');
            INSERT OR IGNORE INTO settings (setting_key, setting_value) VALUES ('smtp_username', '');
            INSERT OR IGNORE INTO settings (setting_key, setting_value) VALUES ('smtp_password', '');
            INSERT OR IGNORE INTO settings (setting_key, setting_value) VALUES ('smtp_from', '');
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS settings (
                setting_key VARCHAR(100) PRIMARY KEY,
                setting_value TEXT NOT NULL
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
            INSERT IGNORE INTO settings (setting_key, setting_value) VALUES ('site_description', 'Stories of hope from people living with kidney disease');
            INSERT IGNORE INTO settings (setting_key, setting_value) VALUES ('registration_open', 'true');
            INSERT IGNORE INTO settings (setting_key, setting_value) VALUES ('comment_moderation', 'false');
            INSERT IGNORE INTO settings (setting_key, setting_value) VALUES ('smtp_host', '');
            INSERT IGNORE INTO settings (setting_key, setting_value) VALUES ('smtp_port', '587');
            INSERT IGNORE INTO settings (setting_key, setting_value) VALUES ('smtp_username', '');
            INSERT IGNORE INTO settings (setting_key, setting_value) VALUES ('smtp_password', '');
            INSERT IGNORE INTO settings (setting_key, setting_value) VALUES ('smtp_from', '');
        "#,
    },
    Migration {
        version: 9,
        name: "create_login_logs",
        up_sqlite: r#"
            CREATE TABLE IF NOT EXISTS login_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER,
                username VARCHAR(255) NOT NULL,
                ip_address VARCHAR(64),
                user_agent VARCHAR(512),
                success BOOLEAN NOT NULL,
                failure_reason VARCHAR(100),
                created_at TIMESTAMP NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE SET NULL
            );
            CREATE INDEX IF NOT EXISTS idx_login_logs_created_at ON login_logs(created_at);
        "#,
        up_mysql: r#"
            CREATE TABLE IF NOT EXISTS login_logs (
                id BIGINT PRIMARY KEY AUTO_INCREMENT,
                user_id BIGINT NULL,
                username VARCHAR(255) NOT NULL,
                ip_address VARCHAR(64),
                user_agent VARCHAR(512),
                success BOOLEAN NOT NULL,
                failure_reason VARCHAR(100),
                created_at DATETIME(6) NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE SET NULL
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4;
            CREATE INDEX idx_login_logs_created_at ON login_logs(created_at);
        "#,
    },
    Migration {
        version: 10,
        name: "seed_spanish_interface",
        up_sqlite: r#"
            INSERT OR IGNORE INTO translations (msg_key, language, value) VALUES ('nav.home', 'es', 'Inicio');
            INSERT OR IGNORE INTO translations (msg_key, language, value) VALUES ('nav.write', 'es', 'Escribir');
            INSERT OR IGNORE INTO translations (msg_key, language, value) VALUES ('nav.login', 'es', 'Entrar');
            INSERT OR IGNORE INTO translations (msg_key, language, value) VALUES ('nav.register', 'es', 'Registrarse');
            INSERT OR IGNORE INTO translations (msg_key, language, value) VALUES ('nav.logout', 'es', 'Salir');
            INSERT OR IGNORE INTO translations (msg_key, language, value) VALUES ('nav.my_stories', 'es', 'Mis historias');
            INSERT OR IGNORE INTO translations (msg_key, language, value) VALUES ('nav.notifications', 'es', 'Avisos');
            INSERT OR IGNORE INTO translations (msg_key, language, value) VALUES ('nav.moderation', 'es', 'Moderación');
            INSERT OR IGNORE INTO translations (msg_key, language, value) VALUES ('story.read_more', 'es', 'Leer más');
            INSERT OR IGNORE INTO translations (msg_key, language, value) VALUES ('story.comments', 'es', 'Comentarios');
            INSERT OR IGNORE INTO translations (msg_key, language, value) VALUES ('story.translate', 'es', 'Traducir esta historia');
            INSERT OR IGNORE INTO translations (msg_key, language, value) VALUES ('home.title', 'es', 'Historias de nuestra comunidad');
        "#,
        up_mysql: r#"
            INSERT IGNORE INTO translations (msg_key, language, value) VALUES ('nav.home', 'es', 'Inicio');
            INSERT IGNORE INTO translations (msg_key, language, value) VALUES ('nav.write', 'es', 'Escribir');
            INSERT IGNORE INTO translations (msg_key, language, value) VALUES ('nav.login', 'es', 'Entrar');
            INSERT IGNORE INTO translations (msg_key, language, value) VALUES ('nav.register', 'es', 'Registrarse');
            INSERT IGNORE INTO translations (msg_key, language, value) VALUES ('nav.logout', 'es', 'Salir');
            INSERT IGNORE INTO translations (msg_key, language, value) VALUES ('nav.my_stories', 'es', 'Mis historias');
            INSERT IGNORE INTO translations (msg_key, language, value) VALUES ('nav.notifications', 'es', 'Avisos');
            INSERT IGNORE INTO translations (msg_key, language, value) VALUES ('nav.moderation', 'es', 'Moderación');
            INSERT IGNORE INTO translations (msg_key, language, value) VALUES ('story.read_more', 'es', 'Leer más');
            INSERT IGNORE INTO translations (msg_key, language, value) VALUES ('story.comments', 'es', 'Comentarios');
            INSERT IGNORE INTO translations (msg_key, language, value) VALUES ('story.translate', 'es', 'Traducir esta historia');
            INSERT IGNORE INTO translations (msg_key, language, value) VALUES ('home.title', 'es', 'Historias de nuestra comunidad');
        "#,
    },
];

/// Run all pending database migrations
///
/// Returns the number of migrations applied.
pub async fn run_migrations(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;

    let applied = get_applied_migrations(pool).await?;
    let applied_versions: Vec<i32> = applied.iter().map(|m| m.version as i32).collect();

    let mut count = 0;

    for migration in MIGRATIONS {
        if !applied_versions.contains(&migration.version) {
            tracing::info!(
                "Applying migration {}: {}",
                migration.version,
                migration.name
            );
            apply_migration(pool, migration)
                .await
                .with_context(|| format!("Failed to apply migration: {}", migration.name))?;
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Applied {} migration(s)", count);
    } else {
        tracing::debug!("No pending migrations");
    }

    Ok(count)
}

/// Create the migrations tracking table if it doesn't exist
async fn create_migrations_table(pool: &DynDatabasePool) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                name VARCHAR(255) NOT NULL UNIQUE,
                applied_at TIMESTAMP NOT NULL
            )
            "#
        }
        DatabaseDriver::Mysql => {
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                version INT PRIMARY KEY,
                name VARCHAR(191) NOT NULL UNIQUE,
                applied_at DATETIME(6) NOT NULL
            )
            "#
        }
    };

    pool.execute(sql).await?;
    Ok(())
}

/// Get list of already applied migrations
async fn get_applied_migrations(pool: &DynDatabasePool) -> Result<Vec<MigrationRecord>> {
    let records = with_pool!(pool, db => {
        let rows = sqlx::query("SELECT version, name, applied_at FROM _migrations ORDER BY version")
            .fetch_all(db)
            .await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(MigrationRecord {
                version: row.try_get::<i64, _>("version")?,
                name: row.try_get("name")?,
                applied_at: row.try_get("applied_at")?,
            });
        }
        records
    });
    Ok(records)
}

/// Apply a single migration, statement by statement
async fn apply_migration(pool: &DynDatabasePool, migration: &Migration) -> Result<()> {
    let sql = match pool.driver() {
        DatabaseDriver::Sqlite => migration.up_sqlite,
        DatabaseDriver::Mysql => migration.up_mysql,
    };

    with_pool!(pool, db => {
        for statement in split_sql_statements(sql) {
            sqlx::query(statement)
                .execute(db)
                .await
                .with_context(|| format!("Failed to execute: {}", truncate_sql(statement)))?;
        }

        sqlx::query("INSERT INTO _migrations (version, name, applied_at) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(migration.name)
            .bind(Utc::now())
            .execute(db)
            .await?;
    });

    Ok(())
}

/// Truncate SQL for error messages
fn truncate_sql(sql: &str) -> String {
    match sql.char_indices().nth(100) {
        Some((idx, _)) => format!("{}...", &sql[..idx]),
        None => sql.to_string(),
    }
}

/// Split SQL into individual statements, handling comments properly
fn split_sql_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut current_start = 0;
    let mut in_statement = false;

    for (i, c) in sql.char_indices() {
        match c {
            ';' => {
                if in_statement {
                    let stmt = sql[current_start..i].trim();
                    if !stmt.is_empty() && !is_comment_only(stmt) {
                        statements.push(stmt);
                    }
                    in_statement = false;
                }
                current_start = i + 1;
            }
            _ if !c.is_whitespace() && !in_statement => {
                current_start = i;
                in_statement = true;
            }
            _ => {}
        }
    }

    if in_statement {
        let stmt = sql[current_start..].trim();
        if !stmt.is_empty() && !is_comment_only(stmt) {
            statements.push(stmt);
        }
    }

    statements
}

/// Check if a string contains only SQL comments
fn is_comment_only(s: &str) -> bool {
    s.lines()
        .map(str::trim)
        .all(|line| line.is_empty() || line.starts_with("--"))
}

/// Check if migrations are up to date
pub async fn is_up_to_date(pool: &DynDatabasePool) -> Result<bool> {
    create_migrations_table(pool).await?;
    let applied = get_applied_migrations(pool).await?;
    Ok(applied.len() == MIGRATIONS.len())
}

/// Get pending migrations count
pub async fn pending_count(pool: &DynDatabasePool) -> Result<usize> {
    create_migrations_table(pool).await?;
    let applied = get_applied_migrations(pool).await?;
    Ok(MIGRATIONS.len().saturating_sub(applied.len()))
}

/// Get the total number of migrations defined
pub fn total_migrations() -> usize {
    MIGRATIONS.len()
}

/// Get migration by version
pub fn get_migration(version: i32) -> Option<&'static Migration> {
    MIGRATIONS.iter().find(|m| m.version == version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    #[tokio::test]
    async fn test_run_migrations() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, MIGRATIONS.len());

        let count = run_migrations(&pool).await.expect("Failed to run migrations");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_is_up_to_date_and_pending_count() {
        let pool = create_test_pool().await.expect("Failed to create test pool");

        assert!(!is_up_to_date(&pool).await.unwrap());
        assert_eq!(pending_count(&pool).await.unwrap(), MIGRATIONS.len());

        run_migrations(&pool).await.expect("Failed to run migrations");

        assert!(is_up_to_date(&pool).await.unwrap());
        assert_eq!(pending_count(&pool).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_seed_data_present() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        let db = pool.as_sqlite().unwrap();

        let categories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM categories")
            .fetch_one(db)
            .await
            .unwrap();
        assert_eq!(categories, 4);

        let value: String = sqlx::query_scalar(
            "SELECT setting_value FROM settings WHERE setting_key = 'registration_open'",
        )
        .fetch_one(db)
        .await
        .unwrap();
        assert_eq!(value, "true");

        let home: String = sqlx::query_scalar(
            "SELECT value FROM translations WHERE msg_key = 'nav.home' AND language = 'es'",
        )
        .fetch_one(db)
        .await
        .unwrap();
        assert_eq!(home, "Inicio");
    }

    #[tokio::test]
    async fn test_story_content_language_unique() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        let db = pool.as_sqlite().unwrap();
        let now = Utc::now();

        sqlx::query(
            "INSERT INTO users (username, email, password_hash, created_at, updated_at) VALUES ('ana', 'ana@example.com', 'x', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(db)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO stories (author_id, slug, original_language, created_at, updated_at) VALUES (1, 'first', 'en', ?, ?)",
        )
        .bind(now)
        .bind(now)
        .execute(db)
        .await
        .unwrap();

        let insert = "INSERT INTO story_contents (story_id, language, title, body, body_html, created_at, updated_at) VALUES (1, 'en', 't', 'b', '<p>b</p>', ?, ?)";
        sqlx::query(insert).bind(now).bind(now).execute(db).await.unwrap();
        let duplicate = sqlx::query(insert).bind(now).bind(now).execute(db).await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_foreign_key_constraints() {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        run_migrations(&pool).await.expect("Failed to run migrations");
        let db = pool.as_sqlite().unwrap();

        let result = sqlx::query(
            "INSERT INTO sessions (id, user_id, csrf_token, expires_at, created_at) VALUES ('s', 999, 'c', ?, ?)",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(db)
        .await;

        assert!(result.is_err());
    }

    #[test]
    fn test_get_migration() {
        assert_eq!(get_migration(1).map(|m| m.name), Some("create_users"));
        assert!(get_migration(999).is_none());
        assert_eq!(total_migrations(), 10);
    }

    #[test]
    fn test_versions_are_sequential() {
        for (idx, migration) in MIGRATIONS.iter().enumerate() {
            assert_eq!(migration.version as usize, idx + 1);
        }
    }

    #[test]
    fn test_split_sql_statements() {
        let sql = "CREATE TABLE a (id INT); CREATE TABLE b (id INT);";
        assert_eq!(split_sql_statements(sql).len(), 2);

        let sql_with_comments = "-- Comment\nCREATE TABLE a (id INT);";
        assert_eq!(split_sql_statements(sql_with_comments).len(), 1);

        for migration in MIGRATIONS {
            assert!(!split_sql_statements(migration.up_sqlite).is_empty());
            assert_eq!(
                split_sql_statements(migration.up_sqlite).len(),
                split_sql_statements(migration.up_mysql).len() + extra_sqlite_indexes(migration.version),
                "statement count differs for migration {}",
                migration.name
            );
        }
    }

    /// SQLite indexes foreign-key columns that MySQL InnoDB indexes implicitly
    fn extra_sqlite_indexes(version: i32) -> usize {
        match version {
            4 | 5 => 1,
            _ => 0,
        }
    }

    #[test]
    fn test_is_comment_only() {
        assert!(is_comment_only("-- This is a comment"));
        assert!(is_comment_only("-- Line 1\n-- Line 2"));
        assert!(!is_comment_only("CREATE TABLE test"));
        assert!(!is_comment_only("-- Comment\nCREATE TABLE test"));
    }
}
