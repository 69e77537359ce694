//! Catalog endpoints: teachers, courses, reviews.
//!
//! Reads are public. Mutations pass the role gate first, then payload
//! validation, then (for review submissions) the moderation oracle, and only
//! then touch the store.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::middleware::{require, ADMIN_ONLY, ANY_ROLE, EDITORIAL};
use crate::auth::models::Claims;
use crate::catalog::store::{CatalogStore, Course, Review, Teacher, TeacherWithStats};
use crate::errors::ApiError;
use crate::moderation::{ModerationClient, ModerationVerdict};

/// Reviews shorter than this are rejected before moderation or persistence.
pub const MIN_DESCRIPTION_LEN: usize = 10;

#[derive(Clone)]
pub struct CatalogState {
    pub store: Arc<CatalogStore>,
    pub moderation: Arc<dyn ModerationClient>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TeacherPayload {
    pub name: String,
    #[serde(default)]
    pub department: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CoursePayload {
    pub name: String,
    pub teacher_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReviewPayload {
    pub teacher_id: i64,
    pub course_id: i64,
    pub rating: i64,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModerateRequest {
    pub teacher_id: i64,
    pub course_id: i64,
    pub text: String,
    pub rating: i64,
}

fn validate_review(rating: i64, description: &str) -> Result<(), ApiError> {
    if !(1..=5).contains(&rating) {
        return Err(ApiError::Validation(
            "Rating must be between 1 and 5".to_string(),
        ));
    }
    // Characters, not bytes: accented text must not slip under the minimum.
    if description.trim().chars().count() < MIN_DESCRIPTION_LEN {
        return Err(ApiError::Validation(format!(
            "Description must be at least {MIN_DESCRIPTION_LEN} characters"
        )));
    }
    Ok(())
}

/// Resolve the teacher/course pair a review targets, ensuring both exist and
/// the course belongs to the teacher.
fn resolve_subject(
    store: &CatalogStore,
    teacher_id: i64,
    course_id: i64,
) -> Result<(Teacher, Course), ApiError> {
    let teacher = store
        .get_teacher(teacher_id)?
        .ok_or(ApiError::NotFound("Teacher"))?;
    let course = store
        .get_course(course_id)?
        .ok_or(ApiError::NotFound("Course"))?;
    if course.teacher_id != teacher.id {
        return Err(ApiError::Validation(
            "Course does not belong to this teacher".to_string(),
        ));
    }
    Ok((teacher, course))
}

// ===== Teachers =====

pub async fn list_teachers(
    State(state): State<CatalogState>,
) -> Result<Json<Vec<TeacherWithStats>>, ApiError> {
    Ok(Json(state.store.list_teachers()?))
}

pub async fn get_teacher(
    State(state): State<CatalogState>,
    Path(id): Path<i64>,
) -> Result<Json<Teacher>, ApiError> {
    let teacher = state
        .store
        .get_teacher(id)?
        .ok_or(ApiError::NotFound("Teacher"))?;
    Ok(Json(teacher))
}

pub async fn create_teacher(
    State(state): State<CatalogState>,
    claims: Option<Extension<Claims>>,
    Json(payload): Json<TeacherPayload>,
) -> Result<(StatusCode, Json<Teacher>), ApiError> {
    require(claims.as_deref(), EDITORIAL)?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::Validation("Teacher name is required".to_string()));
    }
    let teacher = state
        .store
        .create_teacher(payload.name.trim(), payload.department.as_deref())?;
    Ok((StatusCode::CREATED, Json(teacher)))
}

pub async fn update_teacher(
    State(state): State<CatalogState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<i64>,
    Json(payload): Json<TeacherPayload>,
) -> Result<Json<Teacher>, ApiError> {
    require(claims.as_deref(), EDITORIAL)?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::Validation("Teacher name is required".to_string()));
    }
    let teacher = state
        .store
        .update_teacher(id, payload.name.trim(), payload.department.as_deref())?
        .ok_or(ApiError::NotFound("Teacher"))?;
    Ok(Json(teacher))
}

pub async fn delete_teacher(
    State(state): State<CatalogState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    require(claims.as_deref(), ADMIN_ONLY)?;
    if !state.store.delete_teacher(id)? {
        return Err(ApiError::NotFound("Teacher"));
    }
    info!("🗑️  Teacher {id} deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_teacher_reviews(
    State(state): State<CatalogState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<Review>>, ApiError> {
    state
        .store
        .get_teacher(id)?
        .ok_or(ApiError::NotFound("Teacher"))?;
    Ok(Json(state.store.list_reviews_for_teacher(id)?))
}

// ===== Courses =====

pub async fn list_courses(
    State(state): State<CatalogState>,
) -> Result<Json<Vec<Course>>, ApiError> {
    Ok(Json(state.store.list_courses()?))
}

pub async fn get_course(
    State(state): State<CatalogState>,
    Path(id): Path<i64>,
) -> Result<Json<Course>, ApiError> {
    let course = state
        .store
        .get_course(id)?
        .ok_or(ApiError::NotFound("Course"))?;
    Ok(Json(course))
}

pub async fn create_course(
    State(state): State<CatalogState>,
    claims: Option<Extension<Claims>>,
    Json(payload): Json<CoursePayload>,
) -> Result<(StatusCode, Json<Course>), ApiError> {
    require(claims.as_deref(), EDITORIAL)?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::Validation("Course name is required".to_string()));
    }
    state
        .store
        .get_teacher(payload.teacher_id)?
        .ok_or(ApiError::NotFound("Teacher"))?;
    let course = state
        .store
        .create_course(payload.name.trim(), payload.teacher_id)?;
    Ok((StatusCode::CREATED, Json(course)))
}

pub async fn update_course(
    State(state): State<CatalogState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<i64>,
    Json(payload): Json<CoursePayload>,
) -> Result<Json<Course>, ApiError> {
    require(claims.as_deref(), EDITORIAL)?;
    if payload.name.trim().is_empty() {
        return Err(ApiError::Validation("Course name is required".to_string()));
    }
    let course = state
        .store
        .update_course(id, payload.name.trim())?
        .ok_or(ApiError::NotFound("Course"))?;
    Ok(Json(course))
}

pub async fn delete_course(
    State(state): State<CatalogState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    require(claims.as_deref(), ADMIN_ONLY)?;
    if !state.store.delete_course(id)? {
        return Err(ApiError::NotFound("Course"));
    }
    Ok(StatusCode::NO_CONTENT)
}

// ===== Reviews =====

pub async fn list_reviews(
    State(state): State<CatalogState>,
) -> Result<Json<Vec<Review>>, ApiError> {
    Ok(Json(state.store.list_reviews()?))
}

/// Submit a review. Order matters: gate, validation, moderation, persistence.
/// A length-9 description never reaches the moderation oracle; a blocked
/// review never reaches the store.
pub async fn create_review(
    State(state): State<CatalogState>,
    claims: Option<Extension<Claims>>,
    Json(payload): Json<ReviewPayload>,
) -> Result<(StatusCode, Json<Review>), ApiError> {
    require(claims.as_deref(), ANY_ROLE)?;
    validate_review(payload.rating, &payload.description)?;

    let (teacher, course) = resolve_subject(&state.store, payload.teacher_id, payload.course_id)?;

    let verdict = state
        .moderation
        .evaluate(&payload.description, &teacher.name, &course.name)
        .await;
    if !verdict.allowed {
        info!(
            "🛑 Review for teacher {} blocked: {:?}",
            teacher.id, verdict.blocked_reasons
        );
        return Err(ApiError::ModerationBlocked(verdict));
    }

    let review = state.store.create_review(
        teacher.id,
        course.id,
        payload.rating,
        payload.description.trim(),
    )?;
    Ok((StatusCode::CREATED, Json(review)))
}

/// Dry-run moderation - POST /api/reviews/moderate. Returns the verdict with
/// 200 when allowed and 422 when blocked, without ever persisting anything.
pub async fn moderate_review(
    State(state): State<CatalogState>,
    claims: Option<Extension<Claims>>,
    Json(payload): Json<ModerateRequest>,
) -> Result<Json<ModerationVerdict>, ApiError> {
    require(claims.as_deref(), ANY_ROLE)?;
    validate_review(payload.rating, &payload.text)?;

    let (teacher, course) = resolve_subject(&state.store, payload.teacher_id, payload.course_id)?;

    let verdict = state
        .moderation
        .evaluate(&payload.text, &teacher.name, &course.name)
        .await;
    if !verdict.allowed {
        return Err(ApiError::ModerationBlocked(verdict));
    }
    Ok(Json(verdict))
}

pub async fn update_review(
    State(state): State<CatalogState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<i64>,
    Json(payload): Json<ReviewPayload>,
) -> Result<Json<Review>, ApiError> {
    require(claims.as_deref(), EDITORIAL)?;
    validate_review(payload.rating, &payload.description)?;
    let review = state
        .store
        .update_review(id, payload.rating, payload.description.trim())?
        .ok_or(ApiError::NotFound("Review"))?;
    Ok(Json(review))
}

pub async fn delete_review(
    State(state): State<CatalogState>,
    claims: Option<Extension<Claims>>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    require(claims.as_deref(), ADMIN_ONLY)?;
    if !state.store.delete_review(id)? {
        return Err(ApiError::NotFound("Review"));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_length_threshold() {
        // 9 characters rejected, 10 accepted.
        assert!(validate_review(3, "123456789").is_err());
        assert!(validate_review(3, "1234567890").is_ok());
    }

    #[test]
    fn test_rating_bounds() {
        assert!(validate_review(0, "long enough text").is_err());
        assert!(validate_review(6, "long enough text").is_err());
        assert!(validate_review(1, "long enough text").is_ok());
        assert!(validate_review(5, "long enough text").is_ok());
    }

    #[test]
    fn test_whitespace_does_not_count_toward_length() {
        assert!(validate_review(3, "   short    ").is_err());
    }

    #[test]
    fn test_length_counts_characters_not_bytes() {
        // 9 characters but 11 UTF-8 bytes: still too short.
        assert!(validate_review(3, "caffè più").is_err());
        // One more character crosses the threshold.
        assert!(validate_review(3, "caffè piùx").is_ok());
    }
}
