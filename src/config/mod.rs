//! Configuration reading and data directory paths.

pub mod paths;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use paths::get_data_dir;

use crate::audio::{
    CaptureSettings, DEFAULT_CAPTURE_RATE, DEFAULT_FFT_SIZE, DEFAULT_FRAME_SIZE,
    DEFAULT_PLAYBACK_RATE,
};
use crate::session::SessionSettings;
use crate::transport::gemini::DEFAULT_ENDPOINT;
use crate::transport::SessionSetup;

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";
pub const DEFAULT_VOICE: &str = "Kore";
const DEFAULT_SYSTEM_INSTRUCTION: &str = "\
You are Le-ARC AI, a sophisticated Executive Solution Architect.
You were designed as a high-end AI assistant by Naveen.

PERSONALITY & TONE:
1. **Hyper-Natural**: Your voice should sound like a colleague, not a machine. Use natural breathiness, varying intonation, and a warm, professional cadence.
2. **Concise Brilliance**: You are an expert in AI agents, automation workflows, SaaS, and system design. Speak with confidence but stay approachable.
3. **Multilingual Fluidity**: Effortlessly switch between English, Hindi, and Telugu while maintaining your sophisticated architect persona.
4. **Identity**: You are Le-ARC. When you introduce yourself, mention you are an AI Solution Architect designed by Naveen.

SPEECH GUIDELINES:
- Avoid robotic or scripted phrases.
- Use human-like conversational fillers (e.g., \"Alright,\" \"Hmm,\" \"Let's see\") to feel more real.
- Greet users warmly and professionally, as if you are ready to collaborate on their next big project.";
const DEFAULT_GREETING: &str = "A user has joined. Introduce yourself naturally as Le-ARC, \
their personal AI architect designed by Naveen. Greet them warmly and ask how you can help \
them with their technical solutions or automations today.";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Environment variables consulted for the API key, in order.
const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

/// live_config.json shape. Every field is optional on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LiveConfig {
    pub endpoint: String,
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,
    /// Text sent once the session opens so the assistant speaks first.
    pub greeting: String,
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub frame_size: usize,
    pub analyser_fft_size: usize,
    pub connect_timeout_secs: u64,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            voice_name: DEFAULT_VOICE.to_string(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            input_sample_rate: DEFAULT_CAPTURE_RATE,
            output_sample_rate: DEFAULT_PLAYBACK_RATE,
            frame_size: DEFAULT_FRAME_SIZE,
            analyser_fft_size: DEFAULT_FFT_SIZE,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            input_device: None,
            output_device: None,
        }
    }
}

impl LiveConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    /// Replace values that would make a session impossible with defaults.
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        if self.input_sample_rate == 0 {
            warn!("inputSampleRate must be positive, using {}", defaults.input_sample_rate);
            self.input_sample_rate = defaults.input_sample_rate;
        }
        if self.output_sample_rate == 0 {
            warn!("outputSampleRate must be positive, using {}", defaults.output_sample_rate);
            self.output_sample_rate = defaults.output_sample_rate;
        }
        if self.frame_size == 0 {
            warn!("frameSize must be positive, using {}", defaults.frame_size);
            self.frame_size = defaults.frame_size;
        }
        if !self.analyser_fft_size.is_power_of_two() || self.analyser_fft_size < 32 {
            warn!(
                "analyserFftSize must be a power of two >= 32, using {}",
                defaults.analyser_fft_size
            );
            self.analyser_fft_size = defaults.analyser_fft_size;
        }
        if self.endpoint.trim().is_empty() {
            self.endpoint = defaults.endpoint;
        }
        if self.model.trim().is_empty() {
            self.model = defaults.model;
        }
        self
    }

    /// What the controller opens each session with.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            setup: SessionSetup {
                model: self.model.clone(),
                voice_name: self.voice_name.clone(),
                system_instruction: self.system_instruction.clone(),
                transcribe_input: true,
                transcribe_output: true,
            },
            greeting: self.greeting.clone(),
            capture: CaptureSettings {
                device: self.input_device.clone(),
                sample_rate: self.input_sample_rate,
                frame_size: self.frame_size,
            },
            output_sample_rate: self.output_sample_rate,
            analyser_fft_size: self.analyser_fft_size,
        }
    }
}

/// Read live_config.json from the data directory, falling back to defaults.
pub fn read_live_config() -> LiveConfig {
    let path = get_config_path();
    read_json_file::<LiveConfig>(&path)
        .unwrap_or_default()
        .sanitized()
}

/// Path to live_config.json.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("live_config.json")
}

/// API key from the environment. Never stored in the config file.
pub fn api_key_from_env() -> Option<String> {
    api_key_from(|name| std::env::var(name).ok())
}

fn api_key_from(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}

/// Generic helper: read a JSON file and deserialize it.
fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(val) => Some(val),
            Err(e) => {
                warn!("Failed to parse {}: {}", path.display(), e);
                None
            }
        },
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to read {}: {}", path.display(), e);
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: LiveConfig =
            serde_json::from_str(r#"{"voiceName":"Puck","connectTimeoutSecs":5}"#).unwrap();
        assert_eq!(cfg.voice_name, "Puck");
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.output_sample_rate, 24_000);
        assert_eq!(cfg.frame_size, 4096);
    }

    #[test]
    fn serializes_camel_case_without_key() {
        let value = serde_json::to_value(LiveConfig::default()).unwrap();
        assert_eq!(value["voiceName"], "Kore");
        assert_eq!(value["analyserFftSize"], 512);
        assert!(value.get("apiKey").is_none());
    }

    #[test]
    fn defaults_carry_the_assistant_persona() {
        let cfg = LiveConfig::default();
        assert!(cfg.system_instruction.starts_with("You are Le-ARC AI"));
        assert!(cfg.system_instruction.contains("SPEECH GUIDELINES:\n- Avoid"));
        assert!(cfg.greeting.contains("as Le-ARC, their personal AI architect"));
        assert!(!cfg.greeting.contains('\n'));

        let settings = cfg.session_settings();
        assert_eq!(settings.setup.system_instruction, cfg.system_instruction);
        assert_eq!(settings.greeting, cfg.greeting);
    }

    #[test]
    fn sanitize_repairs_bad_values() {
        let cfg = LiveConfig {
            input_sample_rate: 0,
            frame_size: 0,
            analyser_fft_size: 300,
            model: "  ".into(),
            ..Default::default()
        }
        .sanitized();
        assert_eq!(cfg.input_sample_rate, 16_000);
        assert_eq!(cfg.frame_size, 4096);
        assert_eq!(cfg.analyser_fft_size, 512);
        assert_eq!(cfg.model, DEFAULT_MODEL);
    }

    #[test]
    fn settings_carry_devices_and_rates() {
        let cfg = LiveConfig {
            input_device: Some("USB Mic".into()),
            greeting: "hi".into(),
            ..Default::default()
        };
        let settings = cfg.session_settings();
        assert_eq!(settings.capture.device.as_deref(), Some("USB Mic"));
        assert_eq!(settings.capture.sample_rate, 16_000);
        assert_eq!(settings.output_sample_rate, 24_000);
        assert_eq!(settings.greeting, "hi");
        assert!(settings.setup.transcribe_input && settings.setup.transcribe_output);
    }

    #[test]
    fn api_key_prefers_gemini_variable() {
        let key = api_key_from(|name| match name {
            "GEMINI_API_KEY" => Some("g".into()),
            "API_KEY" => Some("a".into()),
            _ => None,
        });
        assert_eq!(key.as_deref(), Some("g"));

        let key = api_key_from(|name| match name {
            "GEMINI_API_KEY" => Some("  ".into()),
            "API_KEY" => Some("a".into()),
            _ => None,
        });
        assert_eq!(key.as_deref(), Some("a"));

        assert!(api_key_from(|_| None).is_none());
    }

    #[test]
    fn missing_file_reads_as_none() {
        let path = std::env::temp_dir().join("live-voice-missing-config.json");
        assert!(read_json_file::<LiveConfig>(&path).is_none());
    }
}
