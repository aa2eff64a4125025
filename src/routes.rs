use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::error::{validate_payload, AppError};
use crate::generation::GenerationClient;
use crate::models::{
    CharacterRef, CreateProjectRequest, GenerateCharacterRequest, GenerateStoryboardRequest,
    Project, ProjectPatch, ProjectStatus,
};
use crate::store::ProjectStore;
use crate::wizard::{self, WizardStep};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProjectStore>,
    pub generator: Arc<GenerationClient>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/current", get(current_project))
        .route("/api/projects/:id", get(get_project).put(update_project))
        .route("/api/projects/:id/character", post(generate_character))
        .route("/api/projects/:id/storyboard", post(generate_storyboard))
        .route("/api/projects/:id/scenes/:scene_id/animate", post(animate_scene))
        .route("/api/projects/:id/export", post(export_video))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Resume payload: the active project (if any) and the stage to display.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumePayload {
    pub project: Option<Project>,
    pub step: WizardStep,
}

async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<Project>>, AppError> {
    Ok(Json(state.store.list().await?))
}

async fn create_project(
    State(state): State<AppState>,
    Json(body): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), AppError> {
    validate_payload(&body)?;
    if body.status == Some(ProjectStatus::Completed) {
        return Err(AppError::validation("status", "new projects start as draft"));
    }
    let project = state.store.create(&body.name).await?;
    tracing::info!(project_id = project.id, name = %project.name, "project created");
    Ok((StatusCode::CREATED, Json(project)))
}

async fn current_project(State(state): State<AppState>) -> Result<Json<ResumePayload>, AppError> {
    let project = state.store.get().await?;
    let step = wizard::resume_step(project.as_ref());
    Ok(Json(ResumePayload { project, step }))
}

async fn get_project(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Project>, AppError> {
    Ok(Json(state.store.get_by_id(id).await?))
}

async fn update_project(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(patch): Json<ProjectPatch>,
) -> Result<Json<Project>, AppError> {
    patch.validate()?;
    Ok(Json(state.store.update(id, patch).await?))
}

/// Stage 1: generate candidate character images. Nothing is persisted
/// here; the caller confirms a selection with a `PUT` carrying
/// `characterRef` once the user has picked one.
async fn generate_character(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<GenerateCharacterRequest>,
) -> Result<Json<CharacterRef>, AppError> {
    validate_payload(&body)?;
    body.decoded_references()?;
    state.store.get_by_id(id).await?;

    tracing::info!(project_id = id, "generating character candidates");
    let images = state
        .generator
        .generate_character(id, &body.prompt, &body.reference_images)
        .await?;
    Ok(Json(CharacterRef {
        prompt: body.prompt,
        images,
    }))
}

/// Stage 2: break the story into scenes and persist the storyboard.
async fn generate_storyboard(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(body): Json<GenerateStoryboardRequest>,
) -> Result<Json<Project>, AppError> {
    validate_payload(&body)?;
    let project = state.store.get_by_id(id).await?;
    if !wizard::can_advance(&project, WizardStep::Character) {
        return Err(AppError::validation(
            "characterRef",
            "select and save a character before generating a storyboard",
        ));
    }
    let character_image = project
        .character_ref
        .as_ref()
        .and_then(|c| c.images.first())
        .cloned()
        .unwrap_or_default();

    tracing::info!(project_id = id, "generating storyboard");
    let storyboard = state
        .generator
        .generate_storyboard(id, &body.story, &character_image)
        .await?;
    let patch = ProjectPatch {
        storyboard: Some(Some(storyboard)),
        ..Default::default()
    };
    Ok(Json(state.store.update(id, patch).await?))
}

/// Stage 3: animate one scene and merge the clip URL into that scene
/// only. Already-animated scenes are an idempotent no-op.
async fn animate_scene(
    Path((id, scene_id)): Path<(i64, String)>,
    State(state): State<AppState>,
) -> Result<Json<Project>, AppError> {
    let project = state.store.get_by_id(id).await?;
    let storyboard = project
        .storyboard
        .as_ref()
        .ok_or_else(|| AppError::validation("storyboard", "generate a storyboard first"))?;
    let scene = storyboard
        .scenes
        .iter()
        .find(|s| s.id == scene_id)
        .ok_or_else(|| AppError::not_found("scene", &scene_id))?;
    if scene.video_url.is_some() {
        tracing::debug!(project_id = id, scene_id, "scene already animated");
        return Ok(Json(project));
    }

    tracing::info!(project_id = id, scene_id, "animating scene");
    let animation = state.generator.animate_scene(&scene_id).await?;

    // Re-read before writing: sibling animations may have completed while
    // this one was in flight, and their URLs must survive the merge.
    let fresh = state.store.get_by_id(id).await?;
    let mut storyboard = fresh
        .storyboard
        .ok_or_else(|| AppError::validation("storyboard", "generate a storyboard first"))?;
    let scene = storyboard
        .scenes
        .iter_mut()
        .find(|s| s.id == scene_id)
        .ok_or_else(|| AppError::not_found("scene", &scene_id))?;
    if scene.video_url.is_none() {
        scene.video_url = Some(animation.video_url);
    }
    let patch = ProjectPatch {
        storyboard: Some(Some(storyboard)),
        ..Default::default()
    };
    Ok(Json(state.store.update(id, patch).await?))
}

/// Stage 4: compile the final video, mark the project completed.
async fn export_video(
    Path(id): Path<i64>,
    State(state): State<AppState>,
) -> Result<Json<Project>, AppError> {
    let project = state.store.get_by_id(id).await?;
    if !wizard::can_advance(&project, WizardStep::Animation) {
        return Err(AppError::validation(
            "storyboard.scenes[].videoUrl",
            "every scene must be animated before export",
        ));
    }

    tracing::info!(project_id = id, "compiling final video");
    let final_video = state.generator.compile_final_video(id).await?;
    let patch = ProjectPatch {
        status: Some(ProjectStatus::Completed),
        final_video: Some(Some(final_video)),
        ..Default::default()
    };
    let updated = state.store.update(id, patch).await?;
    tracing::info!(project_id = id, "project completed");
    Ok(Json(updated))
}
