//! Startup configuration: the static scene and item layout. Loaded once from
//! `WorldConfig.json` via `serde_json`, the same "hot-reloadable JSON with a
//! hardcoded fallback" shape as the teacher's game-entry config, except the
//! loaded value is never mutated again afterward — the simulation treats the
//! scene and items purely as inputs.

use crate::world::{ItemKind, Scene, SCENE_SIZE};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ItemConfig {
    kind: String,
    x: f32,
    y: f32,
}

#[derive(Debug, Deserialize)]
struct WorldConfigFile {
    scene: [[bool; SCENE_SIZE]; SCENE_SIZE],
    items: Vec<ItemConfig>,
}

/// The immutable world the simulation runs against for the lifetime of the
/// process.
pub struct WorldConfig {
    pub scene: Scene,
    pub items: Vec<(ItemKind, f32, f32)>,
}

impl WorldConfig {
    /// Loads `WorldConfig.json` from the working directory. Falls back to
    /// the six-item starting scenario on first boot (no such file yet).
    pub async fn load() -> Self {
        match tokio::fs::read_to_string("WorldConfig.json").await {
            Ok(contents) => match serde_json::from_str::<WorldConfigFile>(&contents) {
                Ok(parsed) => return Self::from_file(parsed),
                Err(e) => {
                    tracing::warn!(error = %e, "WorldConfig.json is malformed, using fallback scene");
                }
            },
            Err(e) => {
                tracing::info!(error = %e, "WorldConfig.json not found, using fallback scene");
            }
        }
        Self::fallback()
    }

    fn from_file(file: WorldConfigFile) -> Self {
        let items = file
            .items
            .into_iter()
            .filter_map(|item| {
                let kind = match item.kind.as_str() {
                    "KEY" => ItemKind::Key,
                    "BOMB" => ItemKind::Bomb,
                    other => {
                        tracing::warn!(kind = other, "unknown item kind in WorldConfig.json, skipping");
                        return None;
                    }
                };
                Some((kind, item.x, item.y))
            })
            .collect();
        Self {
            scene: Scene::new(file.scene),
            items,
        }
    }

    fn fallback() -> Self {
        Self {
            scene: Scene::new([[false; SCENE_SIZE]; SCENE_SIZE]),
            items: vec![
                (ItemKind::Bomb, 1.5, 3.5),
                (ItemKind::Key, 2.5, 1.5),
                (ItemKind::Key, 3.0, 1.5),
                (ItemKind::Key, 3.5, 1.5),
                (ItemKind::Key, 4.0, 1.5),
                (ItemKind::Key, 4.5, 1.5),
            ],
        }
    }
}
