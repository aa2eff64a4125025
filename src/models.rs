use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::AppError;

/// The single unit of persisted state. Wire names are camelCase to match
/// the stored JSON document shape.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub character_ref: Option<CharacterRef>,
    pub storyboard: Option<Storyboard>,
    pub final_video: Option<FinalVideo>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Draft,
    Completed,
}

/// The confirmed character selection: the prompt plus the full generated
/// candidate batch, persisted once the user picks one.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CharacterRef {
    pub prompt: String,
    pub images: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Storyboard {
    pub story: String,
    pub scenes: Vec<Scene>,
}

/// One storyboard beat. `video_url` stays unset until the scene is
/// individually animated.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    pub id: String,
    pub description: String,
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    /// Reserved for per-scene retry flows; stored but never incremented.
    #[serde(default)]
    pub regenerations: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FinalVideo {
    pub video_url: String,
    pub transitions: String,
}

impl Project {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Project {
            id,
            name: name.into(),
            status: ProjectStatus::Draft,
            created_at: Utc::now(),
            character_ref: None,
            storyboard: None,
            final_video: None,
        }
    }

    /// Shallow-merges a partial update into this record: top-level fields
    /// absent from the patch are preserved untouched. Enforces the record
    /// invariants along the way:
    /// - `status` never transitions back from completed to draft;
    /// - a scene's `videoUrl`, once set, is never cleared by a later write
    ///   (so two in-flight animations merging stale storyboard reads cannot
    ///   erase each other's result);
    /// - `finalVideo` requires a non-empty scene list.
    pub fn merged(&self, patch: ProjectPatch) -> Result<Project, AppError> {
        let mut next = self.clone();

        if let Some(name) = patch.name {
            next.name = name;
        }
        if let Some(status) = patch.status {
            if self.status == ProjectStatus::Completed && status == ProjectStatus::Draft {
                return Err(AppError::validation(
                    "status",
                    "a completed project cannot return to draft",
                ));
            }
            next.status = status;
        }
        if let Some(character_ref) = patch.character_ref {
            next.character_ref = character_ref;
        }
        if let Some(storyboard) = patch.storyboard {
            next.storyboard = match (self.storyboard.as_ref(), storyboard) {
                (Some(existing), Some(mut incoming)) => {
                    keep_animated_scenes(existing, &mut incoming);
                    Some(incoming)
                }
                (_, incoming) => incoming,
            };
        }
        if let Some(final_video) = patch.final_video {
            next.final_video = final_video;
        }

        if next.final_video.is_some()
            && !next
                .storyboard
                .as_ref()
                .is_some_and(|s| !s.scenes.is_empty())
        {
            return Err(AppError::validation(
                "finalVideo",
                "finalVideo requires a storyboard with at least one scene",
            ));
        }

        Ok(next)
    }
}

/// Animation is monotonic per scene: an incoming storyboard write that
/// lacks a `videoUrl` for a scene the store already animated keeps the
/// stored URL.
fn keep_animated_scenes(existing: &Storyboard, incoming: &mut Storyboard) {
    for scene in &mut incoming.scenes {
        if scene.video_url.is_none() {
            scene.video_url = existing
                .scenes
                .iter()
                .find(|s| s.id == scene.id)
                .and_then(|s| s.video_url.clone());
        }
    }
}

/// Partial update over a project. For the optional sections the double
/// option distinguishes "field absent, leave it alone" (outer `None`) from
/// "field explicitly null, clear it" (`Some(None)`).
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProjectPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ProjectStatus>,
    #[serde(
        default,
        with = "serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub character_ref: Option<Option<CharacterRef>>,
    #[serde(
        default,
        with = "serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub storyboard: Option<Option<Storyboard>>,
    #[serde(
        default,
        with = "serde_with::rust::double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub final_video: Option<Option<FinalVideo>>,
}

impl ProjectPatch {
    /// Shape checks that run before the patch touches the store. The merge
    /// itself enforces the cross-field invariants.
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(name) = &self.name {
            if name.is_empty() || name.len() > 120 {
                return Err(AppError::validation("name", "name must be 1-120 characters"));
            }
        }
        if let Some(Some(character_ref)) = &self.character_ref {
            if character_ref.images.iter().all(|url| url.is_empty()) {
                return Err(AppError::validation(
                    "characterRef.images",
                    "characterRef requires at least one image",
                ));
            }
        }
        if let Some(Some(final_video)) = &self.final_video {
            if final_video.video_url.is_empty() {
                return Err(AppError::validation(
                    "finalVideo.videoUrl",
                    "finalVideo requires a video URL",
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    #[validate(length(min = 1, max = 120, message = "name must be 1-120 characters"))]
    pub name: String,
    #[serde(default)]
    pub status: Option<ProjectStatus>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateCharacterRequest {
    #[validate(length(min = 1, max = 500, message = "prompt must be 1-500 characters"))]
    pub prompt: String,
    /// Optional reference images, inline as base64.
    #[serde(default)]
    #[validate(length(max = 3, message = "at most 3 reference images"))]
    pub reference_images: Vec<String>,
}

impl GenerateCharacterRequest {
    /// Decodes the inline reference images, rejecting anything that is not
    /// valid base64 before it reaches the provider.
    pub fn decoded_references(&self) -> Result<Vec<Vec<u8>>, AppError> {
        use base64::Engine;
        self.reference_images
            .iter()
            .map(|image| {
                base64::engine::general_purpose::STANDARD
                    .decode(image)
                    .map_err(|_| {
                        AppError::validation(
                            "reference_images",
                            "reference images must be base64-encoded",
                        )
                    })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct GenerateStoryboardRequest {
    #[validate(length(min = 1, max = 2000, message = "story must be 1-2000 characters"))]
    pub story: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scene(id: &str, video_url: Option<&str>) -> Scene {
        Scene {
            id: id.to_string(),
            description: format!("Scene {id}"),
            image_url: format!("https://img.example/{id}.png"),
            video_url: video_url.map(str::to_string),
            regenerations: 0,
        }
    }

    fn project_with_storyboard() -> Project {
        let mut project = Project::new(1, "Demo");
        project.storyboard = Some(Storyboard {
            story: "epic quest".into(),
            scenes: vec![scene("a", Some("https://vid.example/a.mp4")), scene("b", None)],
        });
        project
    }

    #[test]
    fn empty_patch_is_a_no_op() {
        let project = project_with_storyboard();
        let merged = project.merged(ProjectPatch::default()).unwrap();
        assert_eq!(merged, project);
    }

    #[test]
    fn merge_preserves_unspecified_fields() {
        let mut project = project_with_storyboard();
        project.character_ref = Some(CharacterRef {
            prompt: "knight".into(),
            images: vec!["https://img.example/k.png".into()],
        });

        let patch = ProjectPatch {
            name: Some("Renamed".into()),
            ..Default::default()
        };
        let merged = project.merged(patch).unwrap();

        assert_eq!(merged.name, "Renamed");
        assert_eq!(merged.character_ref, project.character_ref);
        assert_eq!(merged.storyboard, project.storyboard);
        assert_eq!(merged.status, ProjectStatus::Draft);
        assert_eq!(merged.created_at, project.created_at);
    }

    #[test]
    fn explicit_null_clears_an_optional_section() {
        let project = project_with_storyboard();
        let patch: ProjectPatch = serde_json::from_str(r#"{"storyboard": null}"#).unwrap();
        let merged = project.merged(patch).unwrap();
        assert_eq!(merged.storyboard, None);
    }

    #[test]
    fn absent_field_deserializes_as_leave_alone() {
        let patch: ProjectPatch = serde_json::from_str(r#"{"name": "x"}"#).unwrap();
        assert!(patch.storyboard.is_none());
        assert!(patch.character_ref.is_none());
    }

    #[test]
    fn status_never_returns_to_draft() {
        let mut project = Project::new(1, "Demo");
        project.status = ProjectStatus::Completed;
        let patch = ProjectPatch {
            status: Some(ProjectStatus::Draft),
            ..Default::default()
        };
        let err = project.merged(patch).unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "status"));
    }

    #[test]
    fn scene_video_url_survives_a_stale_storyboard_write() {
        let project = project_with_storyboard();

        // A concurrent animation finished for scene "a" before this writer
        // read the record, so its storyboard copy lacks the URL.
        let stale = Storyboard {
            story: "epic quest".into(),
            scenes: vec![scene("a", None), scene("b", Some("https://vid.example/b.mp4"))],
        };
        let patch = ProjectPatch {
            storyboard: Some(Some(stale)),
            ..Default::default()
        };
        let merged = project.merged(patch).unwrap();
        let scenes = merged.storyboard.unwrap().scenes;
        assert_eq!(scenes[0].video_url.as_deref(), Some("https://vid.example/a.mp4"));
        assert_eq!(scenes[1].video_url.as_deref(), Some("https://vid.example/b.mp4"));
    }

    #[test]
    fn final_video_requires_scenes() {
        let project = Project::new(1, "Demo");
        let patch = ProjectPatch {
            final_video: Some(Some(FinalVideo {
                video_url: "https://vid.example/final.mp4".into(),
                transitions: "Crossfade".into(),
            })),
            ..Default::default()
        };
        let err = project.merged(patch).unwrap_err();
        assert!(matches!(err, AppError::Validation { ref field, .. } if field == "finalVideo"));
    }

    #[test]
    fn wire_shape_uses_camel_case() {
        let mut project = Project::new(42, "Demo");
        project.storyboard = Some(Storyboard {
            story: "s".into(),
            scenes: vec![scene("scene-1-0", None)],
        });
        let value = serde_json::to_value(&project).unwrap();
        assert_eq!(value["status"], "draft");
        assert!(value.get("createdAt").is_some());
        assert!(value.get("characterRef").is_some());
        let scene = &value["storyboard"]["scenes"][0];
        assert!(scene.get("imageUrl").is_some());
        assert!(scene.get("videoUrl").is_none());
        assert_eq!(scene["regenerations"], 0);
    }
}
