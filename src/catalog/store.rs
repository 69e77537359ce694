//! Catalog persistence: teachers, courses, and reviews with SQLite.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Teacher {
    pub id: i64,
    pub name: String,
    pub department: Option<String>,
    pub created_at: String,
}

/// Teacher listing entry with the aggregate the UI shows: a simple mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeacherWithStats {
    pub id: i64,
    pub name: String,
    pub department: Option<String>,
    pub created_at: String,
    pub average_rating: Option<f64>,
    pub review_count: i64,
    pub courses: Vec<Course>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub teacher_id: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub teacher_id: i64,
    pub course_id: i64,
    pub rating: i64,
    pub description: String,
    pub created_at: String,
}

pub struct CatalogStore {
    db_path: String,
}

impl CatalogStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_string(),
        };
        store.init_db()?;
        Ok(store)
    }

    fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn init_db(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS teachers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                department TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS courses (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                teacher_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (teacher_id) REFERENCES teachers(id) ON DELETE CASCADE
            );
            CREATE TABLE IF NOT EXISTS reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                teacher_id INTEGER NOT NULL,
                course_id INTEGER NOT NULL,
                rating INTEGER NOT NULL,
                description TEXT NOT NULL,
                created_at TEXT NOT NULL,
                FOREIGN KEY (teacher_id) REFERENCES teachers(id) ON DELETE CASCADE,
                FOREIGN KEY (course_id) REFERENCES courses(id) ON DELETE CASCADE
            );",
        )?;
        Ok(())
    }

    // ===== Teachers =====

    pub fn create_teacher(&self, name: &str, department: Option<&str>) -> Result<Teacher> {
        let conn = self.conn()?;
        let created_at = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO teachers (name, department, created_at) VALUES (?1, ?2, ?3)",
            params![name, department, created_at],
        )?;
        let id = conn.last_insert_rowid();
        info!("Created teacher {id}: {name}");
        Ok(Teacher {
            id,
            name: name.to_string(),
            department: department.map(str::to_string),
            created_at,
        })
    }

    pub fn get_teacher(&self, id: i64) -> Result<Option<Teacher>> {
        let conn = self.conn()?;
        let teacher = conn
            .query_row(
                "SELECT id, name, department, created_at FROM teachers WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Teacher {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        department: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(teacher)
    }

    pub fn list_teachers(&self) -> Result<Vec<TeacherWithStats>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.id, t.name, t.department, t.created_at,
                    AVG(r.rating), COUNT(r.id)
             FROM teachers t
             LEFT JOIN reviews r ON r.teacher_id = t.id
             GROUP BY t.id ORDER BY t.id",
        )?;
        let mut teachers = stmt
            .query_map([], |row| {
                Ok(TeacherWithStats {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    department: row.get(2)?,
                    created_at: row.get(3)?,
                    average_rating: row.get(4)?,
                    review_count: row.get(5)?,
                    courses: Vec::new(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        for teacher in &mut teachers {
            teacher.courses = self.courses_for(&conn, teacher.id)?;
        }
        Ok(teachers)
    }

    pub fn update_teacher(
        &self,
        id: i64,
        name: &str,
        department: Option<&str>,
    ) -> Result<Option<Teacher>> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE teachers SET name = ?1, department = ?2 WHERE id = ?3",
            params![name, department, id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        self.get_teacher(id)
    }

    pub fn delete_teacher(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        // Cascade by hand; rusqlite does not enable foreign_keys by default.
        conn.execute("DELETE FROM reviews WHERE teacher_id = ?1", params![id])?;
        conn.execute("DELETE FROM courses WHERE teacher_id = ?1", params![id])?;
        let rows = conn.execute("DELETE FROM teachers WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // ===== Courses =====

    fn courses_for(&self, conn: &Connection, teacher_id: i64) -> Result<Vec<Course>> {
        let mut stmt = conn.prepare(
            "SELECT id, name, teacher_id, created_at FROM courses WHERE teacher_id = ?1 ORDER BY id",
        )?;
        let courses = stmt
            .query_map(params![teacher_id], |row| {
                Ok(Course {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    teacher_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(courses)
    }

    pub fn create_course(&self, name: &str, teacher_id: i64) -> Result<Course> {
        let conn = self.conn()?;
        let created_at = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO courses (name, teacher_id, created_at) VALUES (?1, ?2, ?3)",
            params![name, teacher_id, created_at],
        )?;
        Ok(Course {
            id: conn.last_insert_rowid(),
            name: name.to_string(),
            teacher_id,
            created_at,
        })
    }

    pub fn get_course(&self, id: i64) -> Result<Option<Course>> {
        let conn = self.conn()?;
        let course = conn
            .query_row(
                "SELECT id, name, teacher_id, created_at FROM courses WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Course {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        teacher_id: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(course)
    }

    pub fn list_courses(&self) -> Result<Vec<Course>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name, teacher_id, created_at FROM courses ORDER BY id")?;
        let courses = stmt
            .query_map([], |row| {
                Ok(Course {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    teacher_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(courses)
    }

    pub fn update_course(&self, id: i64, name: &str) -> Result<Option<Course>> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE courses SET name = ?1 WHERE id = ?2",
            params![name, id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        self.get_course(id)
    }

    pub fn delete_course(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM reviews WHERE course_id = ?1", params![id])?;
        let rows = conn.execute("DELETE FROM courses WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // ===== Reviews =====

    pub fn create_review(
        &self,
        teacher_id: i64,
        course_id: i64,
        rating: i64,
        description: &str,
    ) -> Result<Review> {
        let conn = self.conn()?;
        let created_at = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO reviews (teacher_id, course_id, rating, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![teacher_id, course_id, rating, description, created_at],
        )?;
        Ok(Review {
            id: conn.last_insert_rowid(),
            teacher_id,
            course_id,
            rating,
            description: description.to_string(),
            created_at,
        })
    }

    pub fn get_review(&self, id: i64) -> Result<Option<Review>> {
        let conn = self.conn()?;
        let review = conn
            .query_row(
                "SELECT id, teacher_id, course_id, rating, description, created_at
                 FROM reviews WHERE id = ?1",
                params![id],
                Self::review_from_row,
            )
            .optional()?;
        Ok(review)
    }

    pub fn list_reviews(&self) -> Result<Vec<Review>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, teacher_id, course_id, rating, description, created_at
             FROM reviews ORDER BY id",
        )?;
        let reviews = stmt
            .query_map([], Self::review_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reviews)
    }

    pub fn list_reviews_for_teacher(&self, teacher_id: i64) -> Result<Vec<Review>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, teacher_id, course_id, rating, description, created_at
             FROM reviews WHERE teacher_id = ?1 ORDER BY id",
        )?;
        let reviews = stmt
            .query_map(params![teacher_id], Self::review_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(reviews)
    }

    pub fn update_review(
        &self,
        id: i64,
        rating: i64,
        description: &str,
    ) -> Result<Option<Review>> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE reviews SET rating = ?1, description = ?2 WHERE id = ?3",
            params![rating, description, id],
        )?;
        if rows == 0 {
            return Ok(None);
        }
        self.get_review(id)
    }

    pub fn delete_review(&self, id: i64) -> Result<bool> {
        let conn = self.conn()?;
        let rows = conn.execute("DELETE FROM reviews WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn review_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Review> {
        Ok(Review {
            id: row.get(0)?,
            teacher_id: row.get(1)?,
            course_id: row.get(2)?,
            rating: row.get(3)?,
            description: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}
