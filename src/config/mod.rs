//! Process settings (SPEC_FULL.md §A.3): CLI-overridable behavior for the
//! compositor binary itself, distinct from `display_config`'s persisted
//! output layout.

pub mod display_config;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Process-level settings, loaded from `$HOME/.videocomposerrc` and then
/// overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Path to the display configuration JSON; relative to the settings
    /// file's directory if not absolute.
    pub display_config_path: String,

    /// `env_logger`/`tracing-subscriber` filter string, e.g. "info" or
    /// "framesync_compositor=debug".
    pub log_level: String,

    /// Forces per-output rendering instead of the shared virtual canvas;
    /// mirrors the `VIDEOCOMPOSER_NO_VIRTUAL_CANVAS` env var.
    pub no_virtual_canvas: bool,

    /// Default frame-pacing FPS used when no sync source is attached.
    pub default_fps: u32,

    /// Bind address for the OSC command transport.
    pub osc_bind_address: String,

    /// Enables the stdin text command transport, useful for local
    /// debugging without an OSC client.
    pub stdin_commands: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_config_path: "display.json".to_string(),
            log_level: "info".to_string(),
            no_virtual_canvas: false,
            default_fps: 30,
            osc_bind_address: "0.0.0.0:9000".to_string(),
            stdin_commands: false,
        }
    }
}

impl Settings {
    fn default_file_path() -> Option<PathBuf> {
        dirs::home_dir().map(|p| p.join(".videocomposerrc"))
    }

    pub fn load(path_override: Option<&Path>) -> Result<Self> {
        let path = match path_override {
            Some(p) => p.to_path_buf(),
            None => Self::default_file_path().context("could not determine home directory")?,
        };

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        let mut settings: Settings = serde_json::from_str(&content)
            .with_context(|| format!("parsing settings file {}", path.display()))?;

        // Environment overrides the file, matching the original's
        // precedence of environment over persisted config.
        if std::env::var_os("VIDEOCOMPOSER_NO_VIRTUAL_CANVAS").is_some() {
            settings.no_virtual_canvas = true;
        }

        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating settings directory {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("serializing settings")?;
        std::fs::write(path, content).with_context(|| format!("writing settings file {}", path.display()))
    }

    /// Applies typed CLI overrides on top of a loaded/default `Settings`,
    /// in place of the original's stringly-typed key/value override map.
    pub fn apply_cli_overrides(&mut self, args: &CliOverrides) {
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        if let Some(fps) = args.default_fps {
            self.default_fps = fps;
        }
        if args.headless {
            self.no_virtual_canvas = false;
        }
        if let Some(path) = &args.display_config_path {
            self.display_config_path = path.clone();
        }
    }
}

/// Parsed CLI flags. Hand-rolled over `std::env::args()`, matching the
/// teacher's lightweight CLI handling rather than pulling in `clap` for a
/// handful of flags.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub display_config_path: Option<String>,
    pub log_level: Option<String>,
    pub default_fps: Option<u32>,
    pub headless: bool,
    pub show_help: bool,
    pub show_version: bool,
}

impl CliOverrides {
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Self {
        let mut overrides = CliOverrides::default();
        let mut iter = args.into_iter().peekable();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--config" => overrides.config_path = iter.next().map(PathBuf::from),
                "--display-config" => overrides.display_config_path = iter.next(),
                "--log-level" => overrides.log_level = iter.next(),
                "--fps" => overrides.default_fps = iter.next().and_then(|s| s.parse().ok()),
                "--headless" => overrides.headless = true,
                "--help" => overrides.show_help = true,
                "--version" => overrides.show_version = true,
                other => log::warn!("unrecognized argument: {other}"),
            }
        }
        overrides
    }
}

pub const USAGE: &str = "\
framesync-compositor [OPTIONS]

  --config <path>           settings file to load instead of ~/.videocomposerrc
  --display-config <path>   display configuration JSON to load
  --log-level <level>       env_logger filter string (default: info)
  --fps <n>                 default frame-pacing fps when no sync source is attached
  --headless                disable the virtual canvas, presenting nothing
  --help                    print this message
  --version                 print the version and exit
";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_roundtrip_through_json() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let parsed: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.default_fps, settings.default_fps);
    }

    #[test]
    fn unknown_json_keys_are_ignored() {
        let json = r#"{"default_fps": 60, "totally_unknown_field": true}"#;
        let parsed: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.default_fps, 60);
    }

    #[test]
    fn cli_overrides_apply_only_provided_fields() {
        let mut settings = Settings::default();
        let overrides = CliOverrides::parse(vec!["--fps".to_string(), "60".to_string()]);
        settings.apply_cli_overrides(&overrides);
        assert_eq!(settings.default_fps, 60);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn parse_recognizes_headless_flag() {
        let overrides = CliOverrides::parse(vec!["--headless".to_string()]);
        assert!(overrides.headless);
    }
}
