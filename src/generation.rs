use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use crate::error::AppError;
use crate::models::{FinalVideo, Scene, Storyboard};

pub const CHARACTER_BATCH_SIZE: usize = 8;
pub const SCENE_BATCH_SIZE: usize = 6;

// Simulated provider latency per operation in demo mode.
const CHARACTER_LATENCY: Duration = Duration::from_millis(2500);
const STORYBOARD_LATENCY: Duration = Duration::from_millis(3000);
const ANIMATE_LATENCY: Duration = Duration::from_millis(4000);
const COMPILE_LATENCY: Duration = Duration::from_millis(5000);

const DEMO_IMAGES: [&str; CHARACTER_BATCH_SIZE] = [
    "https://images.unsplash.com/photo-1607604276583-eef5f0b7ac58?w=400&h=400&fit=crop",
    "https://images.unsplash.com/photo-1599508704512-2f19efd1e35f?w=400&h=400&fit=crop",
    "https://images.unsplash.com/photo-1587573089734-09cb69c0f2b4?w=400&h=400&fit=crop",
    "https://images.unsplash.com/photo-1612404730960-5c71579fca11?w=400&h=400&fit=crop",
    "https://images.unsplash.com/photo-1594322436404-5a0526db4d13?w=400&h=400&fit=crop",
    "https://images.unsplash.com/photo-1542751371-adc38448a05e?w=400&h=400&fit=crop",
    "https://images.unsplash.com/photo-1627856013091-fedf7bb0615b?w=400&h=400&fit=crop",
    "https://images.unsplash.com/photo-1550745165-9bc0b252726f?w=400&h=400&fit=crop",
];
const DEMO_SCENE_CLIP: &str =
    "https://cdn.coverr.co/videos/coverr-minecraft-style-blocks-5244/1080p.mp4";
const DEMO_FINAL_MOVIE: &str =
    "https://commondatastorage.googleapis.com/gtv-videos-bucket/sample/BigBuckBunny.mp4";
const DEMO_TRANSITIONS: &str = "Crossfade";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneAnimation {
    pub scene_id: String,
    pub video_url: String,
}

/// Client for the external image/video generation provider. One outbound
/// POST per wizard action. Without a configured webhook URL the client
/// runs in demo mode: it waits out a realistic latency and returns stock
/// asset URLs, so the whole wizard works offline.
pub struct GenerationClient {
    client: Client,
    webhook_url: Option<String>,
    api_key: Option<String>,
}

impl GenerationClient {
    pub fn new(
        webhook_url: Option<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        // A response exceeding the threshold is treated as a generation
        // failure for the operation; nothing waits forever.
        let client = Client::builder().timeout(timeout).build()?;
        Ok(GenerationClient {
            client,
            webhook_url,
            api_key,
        })
    }

    pub fn demo() -> Self {
        GenerationClient {
            client: Client::new(),
            webhook_url: None,
            api_key: None,
        }
    }

    pub fn is_demo(&self) -> bool {
        self.webhook_url.is_none()
    }

    /// Generates a batch of candidate character images for the prompt.
    /// The provider's response shape is unstable; see
    /// [`normalize_image_response`] for the accepted forms.
    pub async fn generate_character(
        &self,
        project_id: i64,
        prompt: &str,
        reference_images: &[String],
    ) -> Result<Vec<String>, AppError> {
        const OP: &str = "generateCharacter";
        let Some(url) = self.webhook_url.as_deref() else {
            tokio::time::sleep(CHARACTER_LATENCY).await;
            let mut images: Vec<String> = DEMO_IMAGES.iter().map(|s| s.to_string()).collect();
            images.shuffle(&mut rand::thread_rng());
            info!(project_id, "demo character batch of {} generated", images.len());
            return Ok(images);
        };

        let body = json!({
            "prompt": prompt,
            "images": reference_images,
            "timestamp": Utc::now().to_rfc3339(),
            "project_id": project_id,
        });
        let response = self.post(OP, &format!("{url}/character"), &body).await?;
        let images = normalize_image_response(&response);
        if images.is_empty() {
            return Err(AppError::generation(OP, "provider returned no images"));
        }
        info!(project_id, "character batch of {} generated", images.len());
        Ok(images)
    }

    /// Breaks a story into a fixed-size batch of scenes, each with a still
    /// frame and a fresh id that stays stable for the project's lifetime.
    pub async fn generate_storyboard(
        &self,
        project_id: i64,
        story: &str,
        character_image: &str,
    ) -> Result<Storyboard, AppError> {
        const OP: &str = "generateStoryboard";
        let Some(url) = self.webhook_url.as_deref() else {
            tokio::time::sleep(STORYBOARD_LATENCY).await;
            let scenes = (0..SCENE_BATCH_SIZE)
                .zip(scene_ids(SCENE_BATCH_SIZE))
                .map(|(i, id)| Scene {
                    id,
                    description: format!(
                        "Scene {}: Based on the story \"{}...\"",
                        i + 1,
                        story.chars().take(20).collect::<String>()
                    ),
                    image_url: DEMO_IMAGES[i % DEMO_IMAGES.len()].to_string(),
                    video_url: None,
                    regenerations: 0,
                })
                .collect();
            info!(project_id, "demo storyboard generated");
            return Ok(Storyboard {
                story: story.to_string(),
                scenes,
            });
        };

        let body = json!({
            "prompt": story,
            "images": [character_image],
            "timestamp": Utc::now().to_rfc3339(),
            "project_id": project_id,
        });
        let response = self.post(OP, &format!("{url}/storyboard"), &body).await?;
        let parsed: ProviderStoryboard = serde_json::from_value(response)
            .map_err(|e| AppError::generation(OP, format!("unusable provider response: {e}")))?;
        if parsed.scenes.is_empty() {
            return Err(AppError::generation(OP, "provider returned no scenes"));
        }

        let ids = scene_ids(parsed.scenes.len());
        let scenes = parsed
            .scenes
            .into_iter()
            .zip(ids)
            .enumerate()
            .map(|(i, (scene, id))| Scene {
                id,
                description: scene
                    .description
                    .unwrap_or_else(|| format!("Scene {}", i + 1)),
                image_url: scene.image_url,
                video_url: None,
                regenerations: 0,
            })
            .collect();
        info!(project_id, "storyboard generated");
        Ok(Storyboard {
            story: parsed.story.unwrap_or_else(|| story.to_string()),
            scenes,
        })
    }

    /// Produces a clip for one scene. Skipping already-animated scenes is
    /// the caller's check; the store additionally never clears a set URL.
    pub async fn animate_scene(&self, scene_id: &str) -> Result<SceneAnimation, AppError> {
        const OP: &str = "animateScene";
        let Some(url) = self.webhook_url.as_deref() else {
            tokio::time::sleep(ANIMATE_LATENCY).await;
            return Ok(SceneAnimation {
                scene_id: scene_id.to_string(),
                video_url: DEMO_SCENE_CLIP.to_string(),
            });
        };

        let body = json!({
            "scene_id": scene_id,
            "timestamp": Utc::now().to_rfc3339(),
        });
        let response = self.post(OP, &format!("{url}/animate"), &body).await?;
        let parsed: ProviderVideo = serde_json::from_value(response)
            .map_err(|e| AppError::generation(OP, format!("unusable provider response: {e}")))?;
        if parsed.video_url.is_empty() {
            return Err(AppError::generation(OP, "provider returned no video URL"));
        }
        Ok(SceneAnimation {
            scene_id: scene_id.to_string(),
            video_url: parsed.video_url,
        })
    }

    /// Compiles the full storyboard into one video. The longest operation;
    /// callers should show indeterminate progress.
    pub async fn compile_final_video(&self, project_id: i64) -> Result<FinalVideo, AppError> {
        const OP: &str = "compileFinalVideo";
        let Some(url) = self.webhook_url.as_deref() else {
            tokio::time::sleep(COMPILE_LATENCY).await;
            info!(project_id, "demo final video compiled");
            return Ok(FinalVideo {
                video_url: DEMO_FINAL_MOVIE.to_string(),
                transitions: DEMO_TRANSITIONS.to_string(),
            });
        };

        let body = json!({
            "timestamp": Utc::now().to_rfc3339(),
            "project_id": project_id,
        });
        let response = self.post(OP, &format!("{url}/compile"), &body).await?;
        let parsed: ProviderVideo = serde_json::from_value(response)
            .map_err(|e| AppError::generation(OP, format!("unusable provider response: {e}")))?;
        if parsed.video_url.is_empty() {
            return Err(AppError::generation(OP, "provider returned no video URL"));
        }
        info!(project_id, "final video compiled");
        Ok(FinalVideo {
            video_url: parsed.video_url,
            transitions: parsed.transitions.unwrap_or_else(|| DEMO_TRANSITIONS.to_string()),
        })
    }

    async fn post(
        &self,
        operation: &'static str,
        url: &str,
        body: &Value,
    ) -> Result<Value, AppError> {
        info!(operation, %url, "calling generation provider");
        let mut request = self.client.post(url).json(body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AppError::generation(operation, e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AppError::generation(operation, e.to_string()))?;

        if !status.is_success() {
            error!(operation, %status, "provider call failed: {}", text);
            return Err(AppError::generation(
                operation,
                format!("status={status} body={text}"),
            ));
        }
        serde_json::from_str(&text)
            .map_err(|e| AppError::generation(operation, format!("invalid provider JSON: {e}")))
    }
}

/// Fresh scene ids for one batch: a shared time component plus the index,
/// so ids never collide even when the whole batch is minted in the same
/// millisecond.
fn scene_ids(count: usize) -> impl Iterator<Item = String> {
    let millis = Utc::now().timestamp_millis();
    (0..count).map(move |i| format!("scene-{millis}-{i}"))
}

#[derive(Debug, Deserialize)]
struct ProviderStoryboard {
    #[serde(default)]
    story: Option<String>,
    #[serde(default)]
    scenes: Vec<ProviderScene>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderScene {
    #[serde(default)]
    description: Option<String>,
    #[serde(alias = "image", alias = "image_url")]
    image_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProviderVideo {
    #[serde(alias = "video_url", alias = "url")]
    video_url: String,
    #[serde(default)]
    transitions: Option<String>,
}

/// Flattens the provider's image response into one ordered URL sequence.
/// Provider formats are unstable, so all observed shapes go through this
/// single function:
/// - a bare URL string;
/// - an object with an `image` field, an `images` array, or both
///   (`image` contributing before `images`);
/// - an array of any of the above, nested arbitrarily.
/// Empty strings and non-string leaves are dropped. Anything else
/// normalizes to an empty sequence, which callers reject.
pub fn normalize_image_response(value: &Value) -> Vec<String> {
    let mut urls = Vec::new();
    collect_images(value, &mut urls);
    urls
}

fn collect_images(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if !s.is_empty() => out.push(s.clone()),
        Value::Array(items) => {
            for item in items {
                collect_images(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(image) = map.get("image") {
                collect_images(image, out);
            }
            if let Some(images) = map.get("images") {
                collect_images(images, out);
            }
        }
        _ => {}
    }
}
