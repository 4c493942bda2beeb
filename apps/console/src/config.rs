use std::{fs, path::Path};

use serde::Deserialize;

/// Console settings, layered lowest to highest: built-in defaults, then the
/// TOML file, then `SIM_*` environment variables. Command-line flags are
/// applied on top by the caller.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server_url: String,
    pub auth_token: Option<String>,
    pub scenario: String,
    pub intensity: String,
    pub duration_minutes: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8000".into(),
            auth_token: None,
            scenario: "Ransomware".into(),
            intensity: "Medium".into(),
            duration_minutes: 30,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    server_url: Option<String>,
    auth_token: Option<String>,
    scenario: Option<String>,
    intensity: Option<String>,
    duration_minutes: Option<u32>,
}

pub fn load_settings(path: &Path) -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string(path) {
        if let Ok(file_cfg) = toml::from_str::<FileSettings>(&raw) {
            if let Some(v) = file_cfg.server_url {
                settings.server_url = v;
            }
            if let Some(v) = file_cfg.auth_token {
                settings.auth_token = Some(v);
            }
            if let Some(v) = file_cfg.scenario {
                settings.scenario = v;
            }
            if let Some(v) = file_cfg.intensity {
                settings.intensity = v;
            }
            if let Some(v) = file_cfg.duration_minutes {
                settings.duration_minutes = v;
            }
        }
    }

    if let Ok(v) = std::env::var("SIM_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("SIM_AUTH_TOKEN") {
        settings.auth_token = Some(v);
    }
    if let Ok(v) = std::env::var("SIM_SCENARIO") {
        settings.scenario = v;
    }
    if let Ok(v) = std::env::var("SIM_INTENSITY") {
        settings.intensity = v;
    }
    if let Ok(v) = std::env::var("SIM_DURATION_MINUTES") {
        if let Ok(parsed) = v.parse::<u32>() {
            settings.duration_minutes = parsed;
        }
    }

    settings
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        time::{SystemTime, UNIX_EPOCH},
    };

    use super::*;

    fn temp_settings_file(contents: &str) -> std::path::PathBuf {
        let suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        let path = env::temp_dir().join(format!("sim_console_test_{suffix}.toml"));
        fs::write(&path, contents).expect("write settings");
        path
    }

    #[test]
    fn file_overrides_only_named_fields() {
        let path = temp_settings_file(
            "server_url = \"https://sim.example.org\"\nduration_minutes = 45\n",
        );
        let settings = load_settings(&path);
        fs::remove_file(&path).expect("cleanup");

        assert_eq!(settings.server_url, "https://sim.example.org");
        assert_eq!(settings.duration_minutes, 45);
        assert_eq!(settings.scenario, Settings::default().scenario);
        assert!(settings.auth_token.is_none());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings(Path::new("/definitely/not/here/console.toml"));
        assert_eq!(settings.server_url, Settings::default().server_url);
        assert_eq!(settings.intensity, "Medium");
    }

    #[test]
    fn unparseable_file_is_ignored() {
        let path = temp_settings_file("not toml {{{");
        let settings = load_settings(&path);
        fs::remove_file(&path).expect("cleanup");

        assert_eq!(settings.duration_minutes, Settings::default().duration_minutes);
    }
}
