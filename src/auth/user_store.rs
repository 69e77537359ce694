//! Credential store: users and role assignments with SQLite.
//!
//! Owns password hashes; they never leave this module except as opaque
//! strings inside `User`, which refuses to serialize them.

use std::time::Duration;

use anyhow::{Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use rusqlite::{params, Connection};
use tracing::info;
use uuid::Uuid;

use crate::auth::models::{normalize_email, now_rfc3339, Role, RoleInfo, User, ALL_ROLES};

pub struct UserStore {
    db_path: String,
}

impl UserStore {
    /// Create a new store and initialize the schema, seeding the role catalog.
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        // Writers from concurrent requests share this file.
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT UNIQUE NOT NULL,
                password_hash TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS roles (
                name TEXT PRIMARY KEY,
                description TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS user_roles (
                user_id TEXT NOT NULL,
                role TEXT NOT NULL,
                PRIMARY KEY (user_id, role),
                FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
                FOREIGN KEY (role) REFERENCES roles(name)
            )",
            [],
        )?;

        // Immutable role catalog, seeded once.
        for role in ALL_ROLES {
            conn.execute(
                "INSERT OR IGNORE INTO roles (name, description) VALUES (?1, ?2)",
                params![role.as_str(), role.description()],
            )?;
        }

        Ok(())
    }

    /// Create a new user with the given roles. The email is normalized before
    /// the uniqueness check.
    pub fn create_user(&self, email: &str, password: &str, roles: &[Role]) -> Result<User> {
        let password_hash = hash(password, DEFAULT_COST).context("Failed to hash password")?;
        let now = now_rfc3339();

        let user = User {
            id: Uuid::new_v4(),
            email: normalize_email(email),
            password_hash,
            active: true,
            roles: roles.to_vec(),
            created_at: now.clone(),
            updated_at: now,
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, email, password_hash, active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                user.id.to_string(),
                user.email,
                user.password_hash,
                user.active as i64,
                user.created_at,
                user.updated_at,
            ],
        )
        .context("Failed to insert user")?;

        for role in &user.roles {
            conn.execute(
                "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
                params![user.id.to_string(), role.as_str()],
            )?;
        }

        info!("✅ Created user: {} ({:?})", user.email, user.roles);

        Ok(user)
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let conn = self.conn()?;
        self.query_user(
            &conn,
            "SELECT id, email, password_hash, active, created_at, updated_at
             FROM users WHERE email = ?1",
            &normalize_email(email),
        )
    }

    pub fn get_user_by_id(&self, user_id: &Uuid) -> Result<Option<User>> {
        let conn = self.conn()?;
        self.query_user(
            &conn,
            "SELECT id, email, password_hash, active, created_at, updated_at
             FROM users WHERE id = ?1",
            &user_id.to_string(),
        )
    }

    fn query_user(&self, conn: &Connection, sql: &str, key: &str) -> Result<Option<User>> {
        let mut stmt = conn.prepare(sql)?;
        let user_result = stmt.query_row(params![key], |row| {
            Ok(User {
                id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
                email: row.get(1)?,
                password_hash: row.get(2)?,
                active: row.get::<_, i64>(3)? != 0,
                roles: Vec::new(),
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        });

        match user_result {
            Ok(mut user) => {
                user.roles = self.roles_for(conn, &user.id)?;
                Ok(Some(user))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn roles_for(&self, conn: &Connection, user_id: &Uuid) -> Result<Vec<Role>> {
        let mut stmt =
            conn.prepare("SELECT role FROM user_roles WHERE user_id = ?1 ORDER BY role")?;
        let roles = stmt
            .query_map(params![user_id.to_string()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|name| Role::from_str(&name))
            .collect();
        Ok(roles)
    }

    /// Verify email and password. Returns false for unknown accounts so the
    /// caller can respond identically to wrong-password and no-such-user.
    pub fn verify_password(&self, email: &str, password: &str) -> Result<bool> {
        match self.get_user_by_email(email)? {
            Some(user) => {
                let valid =
                    verify(password, &user.password_hash).context("Failed to verify password")?;
                Ok(valid)
            }
            None => Ok(false),
        }
    }

    /// Replace a user's role set. Delete and re-insert run in one
    /// transaction; a failure mid-way cannot strip the user's roles.
    pub fn assign_roles(&self, user_id: &Uuid, roles: &[Role]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM user_roles WHERE user_id = ?1",
            params![user_id.to_string()],
        )?;
        for role in roles {
            tx.execute(
                "INSERT OR IGNORE INTO user_roles (user_id, role) VALUES (?1, ?2)",
                params![user_id.to_string(), role.as_str()],
            )?;
        }
        tx.execute(
            "UPDATE users SET updated_at = ?1 WHERE id = ?2",
            params![now_rfc3339(), user_id.to_string()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Toggle account activation.
    pub fn set_active(&self, user_id: &Uuid, active: bool) -> Result<()> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE users SET active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active as i64, now_rfc3339(), user_id.to_string()],
        )?;
        if rows == 0 {
            anyhow::bail!("User not found");
        }
        Ok(())
    }

    pub fn list_users(&self) -> Result<Vec<User>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(
            "SELECT id, email, password_hash, active, created_at, updated_at
             FROM users ORDER BY created_at DESC",
        )?;
        let mut users = stmt
            .query_map([], |row| {
                Ok(User {
                    id: Uuid::parse_str(&row.get::<_, String>(0)?).unwrap_or_default(),
                    email: row.get(1)?,
                    password_hash: row.get(2)?,
                    active: row.get::<_, i64>(3)? != 0,
                    roles: Vec::new(),
                    created_at: row.get(4)?,
                    updated_at: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for user in &mut users {
            user.roles = self.roles_for(&conn, &user.id)?;
        }

        Ok(users)
    }

    pub fn list_roles(&self) -> Result<Vec<RoleInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT name, description FROM roles ORDER BY name ASC")?;
        let roles = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .filter_map(|(name, description)| {
                Role::from_str(&name).map(|role| RoleInfo {
                    name: role,
                    description,
                })
            })
            .collect();
        Ok(roles)
    }
}
