use serde::{Deserialize, Serialize};

use crate::models::{Project, ProjectStatus};

/// The four ordered wizard stages. Forward movement is gated by
/// [`can_advance`]; backward movement is always allowed and touches no
/// persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WizardStep {
    Character,
    Storyboard,
    Animation,
    Export,
}

impl WizardStep {
    pub fn next(self) -> Option<WizardStep> {
        match self {
            WizardStep::Character => Some(WizardStep::Storyboard),
            WizardStep::Storyboard => Some(WizardStep::Animation),
            WizardStep::Animation => Some(WizardStep::Export),
            WizardStep::Export => None,
        }
    }

    pub fn back(self) -> Option<WizardStep> {
        match self {
            WizardStep::Character => None,
            WizardStep::Storyboard => Some(WizardStep::Character),
            WizardStep::Animation => Some(WizardStep::Storyboard),
            WizardStep::Export => Some(WizardStep::Animation),
        }
    }
}

/// Which stage to show when re-entering the wizard with (possibly) partial
/// progress. Total over every project shape; the first matching rule wins.
pub fn resume_step(project: Option<&Project>) -> WizardStep {
    match project {
        Some(p) if p.status == ProjectStatus::Completed => WizardStep::Export,
        Some(p) if p.storyboard.is_some() => WizardStep::Animation,
        Some(p) if p.character_ref.is_some() => WizardStep::Storyboard,
        _ => WizardStep::Character,
    }
}

/// Forward-gate predicate: may the wizard leave `from` for the next stage?
pub fn can_advance(project: &Project, from: WizardStep) -> bool {
    match from {
        WizardStep::Character => project
            .character_ref
            .as_ref()
            .is_some_and(|c| !c.images.is_empty()),
        WizardStep::Storyboard => project
            .storyboard
            .as_ref()
            .is_some_and(|s| !s.scenes.is_empty()),
        WizardStep::Animation => project.storyboard.as_ref().is_some_and(|s| {
            !s.scenes.is_empty()
                && s.scenes
                    .iter()
                    .all(|scene| scene.video_url.as_deref().is_some_and(|v| !v.is_empty()))
        }),
        // Terminal stage.
        WizardStep::Export => false,
    }
}
