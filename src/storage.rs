use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::auth::Session;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThemePreference {
    #[default]
    Terminal,
    Light,
    Dark,
}

impl ThemePreference {
    pub fn next(self) -> Self {
        match self {
            ThemePreference::Terminal => ThemePreference::Dark,
            ThemePreference::Dark => ThemePreference::Light,
            ThemePreference::Light => ThemePreference::Terminal,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct FileConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supabase_anon_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<ThemePreference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
struct SessionFile {
    version: u32,
    session: Session,
}

const SESSION_FILE_VERSION: u32 = 1;

pub fn config_path() -> Option<PathBuf> {
    let mut path = dirs::home_dir()?;
    path.push(".clienttime.json");
    Some(path)
}

pub fn session_path() -> Option<PathBuf> {
    let mut path = dirs::home_dir()?;
    path.push(".clienttime-session.json");
    Some(path)
}

pub fn data_dir() -> Option<PathBuf> {
    let mut path = dirs::data_local_dir().or_else(dirs::home_dir)?;
    path.push("clienttime");
    Some(path)
}

/// Where exports land: the configured directory, else Downloads, else the
/// working directory.
pub fn export_dir() -> PathBuf {
    read_config()
        .and_then(|config| config.export_dir)
        .or_else(dirs::download_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn read_config() -> Option<FileConfig> {
    read_config_from(&config_path()?)
}

pub fn read_config_from(path: &Path) -> Option<FileConfig> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

pub fn read_theme() -> ThemePreference {
    read_config()
        .and_then(|config| config.theme)
        .unwrap_or_default()
}

pub fn write_theme(theme: ThemePreference) -> Result<(), io::Error> {
    let path = config_path()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Home directory not found"))?;
    let mut config = read_config_from(&path).unwrap_or_default();
    config.theme = Some(theme);
    write_json(&path, &config)
}

pub fn read_session(path: &Path) -> Option<Session> {
    let contents = fs::read_to_string(path).ok()?;
    let file: SessionFile = serde_json::from_str(&contents).ok()?;
    if file.version != SESSION_FILE_VERSION {
        return None;
    }
    Some(file.session)
}

pub fn write_session(path: &Path, session: &Session) -> Result<(), io::Error> {
    let file = SessionFile {
        version: SESSION_FILE_VERSION,
        session: session.clone(),
    };
    write_json(path, &file)?;
    restrict_permissions(path)
}

pub fn clear_session(path: &Path) -> Result<(), io::Error> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
    fs::write(path, json)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<(), io::Error> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<(), io::Error> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::User;

    fn session() -> Session {
        Session {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Some(1_800_000_000),
            user: User {
                id: "8f14e45f-ceea-467f-a0e6-ee0a1a1b7d11".to_string(),
                email: Some("ada@example.com".to_string()),
                full_name: Some("Ada".to_string()),
            },
        }
    }

    #[test]
    fn session_survives_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        write_session(&path, &session()).unwrap();

        let restored = read_session(&path).unwrap();
        assert_eq!(restored.refresh_token, "refresh");
        assert_eq!(restored.user.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn clear_session_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        write_session(&path, &session()).unwrap();
        clear_session(&path).unwrap();
        clear_session(&path).unwrap();
        assert!(read_session(&path).is_none());
    }

    #[test]
    fn session_with_unknown_version_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, r#"{"version": 9, "session": {}}"#).unwrap();
        assert!(read_session(&path).is_none());
    }

    #[test]
    fn config_file_fields_are_optional() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"supabase_url": "https://demo.supabase.co", "theme": "dark"}"#)
            .unwrap();

        let config = read_config_from(&path).unwrap();
        assert_eq!(config.supabase_url.as_deref(), Some("https://demo.supabase.co"));
        assert_eq!(config.supabase_anon_key, None);
        assert_eq!(config.theme, Some(ThemePreference::Dark));
    }

    #[test]
    fn theme_cycles_through_all_variants() {
        let start = ThemePreference::Terminal;
        assert_eq!(start.next().next().next(), start);
    }
}
