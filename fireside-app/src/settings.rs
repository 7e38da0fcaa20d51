//! Persistent application settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_SYSTEM_PROMPT: &str = "You are a wise and warm storyteller for young children. \
Your stories are gentle adventures filled with wonder and friendly characters, and they \
quietly teach kindness, curiosity, and honesty. Always be encouraging and weave the \
children's ideas into the narrative. Start with a simple story opening and invite ideas \
with \"What happens next?\" or \"What if...\". When you describe a new scene, be very visual.";

const DEFAULT_VOICE: &str = "Aoede";

/// One child listening to the story.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerProfile {
    pub name: String,
    pub age_years: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Storyteller prompt template; audience and level text are appended.
    pub system_prompt: String,
    /// Prebuilt synthesis voice name.
    pub voice: String,
    /// Story complexity, 1 (toddler) to 10 (independent reader).
    pub story_level: u8,
    /// Who is listening; drives audience text and illustration characters.
    pub listeners: Vec<ListenerProfile>,
    /// Grace period after the storyteller asks a question, seconds.
    pub response_window_secs: u64,
    /// Microphone to prefer when starting capture.
    pub preferred_input_device: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
            voice: DEFAULT_VOICE.into(),
            story_level: 3,
            listeners: vec![ListenerProfile {
                name: "Robin".into(),
                age_years: 4.0,
            }],
            response_window_secs: 10,
            preferred_input_device: None,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        if self.system_prompt.trim().is_empty() {
            self.system_prompt = DEFAULT_SYSTEM_PROMPT.into();
        }
        self.voice = {
            let trimmed = self.voice.trim();
            if trimmed.is_empty() {
                DEFAULT_VOICE.into()
            } else {
                trimmed.to_string()
            }
        };
        self.story_level = self.story_level.clamp(1, 10);
        self.response_window_secs = self.response_window_secs.clamp(3, 120);
        self.listeners.retain_mut(|listener| {
            listener.name = listener.name.trim().to_string();
            listener.age_years = listener.age_years.clamp(1.0, 14.0);
            !listener.name.is_empty()
        });
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Fireside")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("fireside")
            .join("settings.json")
    }
}

/// Sibling directory for saved illustrations.
pub fn illustrations_dir() -> PathBuf {
    default_settings_path()
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("illustrations")
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
