//! Named reference voices backed by per-speaker files.
//!
//! Layout under the root directory: `{name}.json` holds the profile and
//! `{name}.wav` the reference audio. A profile whose audio file is missing
//! is treated as absent and never cached.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tracing::{debug, info, warn};
use tts_core::{SpeakerProfile, TtsError, TtsResult};

/// Reference audio supplied with an update.
#[derive(Debug, Clone)]
pub struct SpeakerAudio {
    /// Client-side file name; must end in `.wav`.
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Partial update of a speaker profile. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct SpeakerUpdate {
    pub audio: Option<SpeakerAudio>,
    pub prompt_lang: Option<String>,
    pub prompt_text: Option<String>,
}

/// Write-through cache over the speaker directory.
#[derive(Debug)]
pub struct SpeakerRegistry {
    root: PathBuf,
    cache: DashMap<String, SpeakerProfile>,
}

impl SpeakerRegistry {
    /// Create a registry rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: DashMap::new(),
        }
    }

    /// Speaker directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reference audio path for `name`.
    pub fn audio_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.wav"))
    }

    fn profile_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.json"))
    }

    /// Look up a profile, loading it from disk on a cache miss.
    ///
    /// # Returns
    /// `None` if there is no profile or its audio file is missing.
    pub fn get(&self, name: &str) -> TtsResult<Option<SpeakerProfile>> {
        check_name(name)?;
        if let Some(profile) = self.cache.get(name) {
            return Ok(Some(profile.clone()));
        }

        let path = self.profile_path(name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(speaker = name, "speaker not found");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let profile: SpeakerProfile = serde_json::from_str(&text).map_err(|e| {
            TtsError::serialization(format!("invalid speaker file {}: {e}", path.display()))
        })?;

        if !self.audio_path(name).exists() {
            warn!(speaker = name, "speaker found without audio file");
            return Ok(None);
        }

        self.cache.insert(name.to_string(), profile.clone());
        Ok(Some(profile))
    }

    /// Like [`get`](Self::get), but a missing profile is an error.
    pub fn resolve(&self, name: &str) -> TtsResult<SpeakerProfile> {
        self.get(name)?
            .ok_or_else(|| TtsError::not_found(format!("speaker {name} not found")))
    }

    /// Create or update a profile and persist it.
    ///
    /// Audio, when given, must be a WAV file; it replaces the stored audio.
    /// Concurrent updates of one name are last-writer-wins.
    pub fn update(&self, name: &str, update: SpeakerUpdate) -> TtsResult<SpeakerProfile> {
        check_name(name)?;
        let mut profile = self
            .get(name)?
            .unwrap_or_else(|| SpeakerProfile::new(name));

        std::fs::create_dir_all(&self.root)?;

        if let Some(audio) = &update.audio {
            let named_wav = audio.file_name.to_lowercase().ends_with(".wav");
            if !named_wav || !audio_pack::wav::is_wav(&audio.bytes) {
                return Err(TtsError::invalid_input("audio must be a wav file"));
            }
            write_atomic(&self.audio_path(name), &audio.bytes)?;
        } else if !self.audio_path(name).exists() {
            return Err(TtsError::invalid_input(format!(
                "speaker {name} has no audio; upload a wav file"
            )));
        }

        if let Some(lang) = update.prompt_lang {
            profile.prompt_lang = Some(lang);
        }
        if let Some(text) = update.prompt_text {
            profile.prompt_text = Some(text);
        }

        let json = serde_json::to_vec(&profile)
            .map_err(|e| TtsError::serialization(format!("speaker {name}: {e}")))?;
        write_atomic(&self.profile_path(name), &json)?;

        self.cache.insert(name.to_string(), profile.clone());
        info!(
            speaker = name,
            audio_replaced = update.audio.is_some(),
            "speaker updated"
        );
        Ok(profile)
    }

    /// All valid profiles: cached ones plus any new files on disk.
    pub fn list(&self) -> TtsResult<BTreeMap<String, SpeakerProfile>> {
        match std::fs::read_dir(&self.root) {
            Ok(entries) => {
                for entry in entries {
                    let path = entry?.path();
                    if !path.extension().is_some_and(|ext| ext == "json") {
                        continue;
                    }
                    let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    if let Err(e) = self.get(name) {
                        warn!(speaker = name, error = %e, "skipping unreadable speaker");
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        Ok(self
            .cache
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }
}

/// Names address files directly, so they must stay inside the root.
fn check_name(name: &str) -> TtsResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(TtsError::invalid_input(format!("invalid speaker name: {name:?}")));
    }
    Ok(())
}

/// Write via a sibling temp file and rename, so readers never see a partial file.
fn write_atomic(path: &Path, bytes: &[u8]) -> TtsResult<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
