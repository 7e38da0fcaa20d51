//! Session configuration, serialized to the live API connect shape.

use serde::{Deserialize, Serialize};

use crate::error::{FiresideError, Result};

/// Response modality requested from the remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
}

/// `speechConfig.voiceConfig.prebuiltVoiceConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

/// Presence requests transcription; the object itself carries no options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptionConfig {}

/// Connect-time configuration for one live session.
///
/// `responseModalities` and `systemInstruction` are mandatory; everything
/// else has sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub response_modalities: Vec<Modality>,
    pub speech_config: SpeechConfig,
    pub input_audio_transcription: TranscriptionConfig,
    pub output_audio_transcription: TranscriptionConfig,
    pub system_instruction: String,
    pub tools: Vec<serde_json::Value>,
}

impl SessionConfig {
    /// Audio-out session with bidirectional transcription — the storytelling
    /// default.
    pub fn for_voice(voice_name: &str, system_instruction: &str) -> Self {
        Self {
            response_modalities: vec![Modality::Audio],
            speech_config: SpeechConfig {
                voice_config: VoiceConfig {
                    prebuilt_voice_config: PrebuiltVoiceConfig {
                        voice_name: voice_name.to_string(),
                    },
                },
            },
            input_audio_transcription: TranscriptionConfig::default(),
            output_audio_transcription: TranscriptionConfig::default(),
            system_instruction: system_instruction.to_string(),
            tools: Vec::new(),
        }
    }

    /// Connect precondition check, performed before any I/O.
    ///
    /// # Errors
    /// `FiresideError::Precondition` naming the missing field.
    pub fn validate(&self) -> Result<()> {
        if self.response_modalities.is_empty() {
            return Err(FiresideError::Precondition(
                "responseModalities must not be empty".into(),
            ));
        }
        if self.system_instruction.trim().is_empty() {
            return Err(FiresideError::Precondition(
                "systemInstruction is required".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_the_connect_wire_shape() {
        let config = SessionConfig::for_voice("Aoede", "You are a storyteller.");
        let json = serde_json::to_value(&config).expect("serialize session config");

        assert_eq!(json["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Aoede"
        );
        assert_eq!(json["inputAudioTranscription"], serde_json::json!({}));
        assert_eq!(json["outputAudioTranscription"], serde_json::json!({}));
        assert_eq!(json["systemInstruction"], "You are a storyteller.");
        assert_eq!(json["tools"], serde_json::json!([]));
    }

    #[test]
    fn validate_accepts_a_complete_config() {
        assert!(SessionConfig::for_voice("Aoede", "prompt").validate().is_ok());
    }

    #[test]
    fn validate_rejects_missing_system_instruction() {
        let config = SessionConfig::for_voice("Aoede", "   ");
        let err = config.validate().expect_err("must fail");
        assert!(matches!(err, FiresideError::Precondition(_)));
    }

    #[test]
    fn validate_rejects_empty_modalities() {
        let mut config = SessionConfig::for_voice("Aoede", "prompt");
        config.response_modalities.clear();
        let err = config.validate().expect_err("must fail");
        assert!(matches!(err, FiresideError::Precondition(_)));
    }
}
