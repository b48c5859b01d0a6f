// ABOUTME: Persistence hooks for learned commands and joined-room markers
// ABOUTME: FileStore keeps one file per command and one marker per site/room

use crate::error::ChatResult;
use crate::site::Site;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const COMMAND_FILE_EXT: &str = "txt";

/// Load-all-on-start plus write/delete-on-change hooks
pub trait BotStore: Send + Sync {
    fn load_commands(&self) -> ChatResult<Vec<(String, String)>>;
    fn save_command(&self, name: &str, template: &str) -> ChatResult<()>;
    fn delete_command(&self, name: &str) -> ChatResult<()>;

    fn load_rooms(&self, site: Site) -> ChatResult<Vec<u64>>;
    fn save_room(&self, site: Site, room_id: u64) -> ChatResult<()>;
    fn delete_room(&self, site: Site, room_id: u64) -> ChatResult<()>;
}

/// URL-safe file stem for a command name
pub fn encode_command_name(name: &str) -> String {
    urlencoding::encode(&name.trim().to_lowercase()).into_owned()
}

pub fn decode_command_name(stem: &str) -> Option<String> {
    urlencoding::decode(stem).ok().map(|s| s.to_lowercase())
}

/// Filesystem store rooted at a data directory:
/// `commands/<encoded name>.txt` and `rooms/<SITE>/<room id>`
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> ChatResult<Self> {
        let root = root.into();
        std::fs::create_dir_all(root.join("commands"))?;
        std::fs::create_dir_all(root.join("rooms"))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn command_path(&self, name: &str) -> PathBuf {
        self.root
            .join("commands")
            .join(format!("{}.{}", encode_command_name(name), COMMAND_FILE_EXT))
    }

    fn room_dir(&self, site: Site) -> PathBuf {
        self.root.join("rooms").join(site.key())
    }
}

impl BotStore for FileStore {
    fn load_commands(&self) -> ChatResult<Vec<(String, String)>> {
        let mut commands = Vec::new();
        for entry in std::fs::read_dir(self.root.join("commands"))? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(name) = decode_command_name(stem) else {
                tracing::warn!(path = %path.display(), "Skipping undecodable command file");
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(template) => {
                    tracing::debug!(command = %name, "Loaded learned command");
                    commands.push((name, template));
                }
                Err(e) => {
                    tracing::warn!(command = %name, error = %e, "Failed to load command");
                }
            }
        }
        commands.sort();
        Ok(commands)
    }

    fn save_command(&self, name: &str, template: &str) -> ChatResult<()> {
        std::fs::write(self.command_path(name), template)?;
        Ok(())
    }

    fn delete_command(&self, name: &str) -> ChatResult<()> {
        let path = self.command_path(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    fn load_rooms(&self, site: Site) -> ChatResult<Vec<u64>> {
        let dir = self.room_dir(site);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut rooms: Vec<u64> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().to_str().and_then(|s| s.parse().ok()))
            .collect();
        rooms.sort_unstable();
        Ok(rooms)
    }

    fn save_room(&self, site: Site, room_id: u64) -> ChatResult<()> {
        let dir = self.room_dir(site);
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(room_id.to_string()), b"")?;
        Ok(())
    }

    fn delete_room(&self, site: Site, room_id: u64) -> ChatResult<()> {
        let path = self.room_dir(site).join(room_id.to_string());
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// In-memory store for tests and for running without persistence
#[derive(Debug, Default)]
pub struct MemoryStore {
    commands: Mutex<BTreeMap<String, String>>,
    rooms: Mutex<BTreeSet<(Site, u64)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commands<I, N, T>(commands: I) -> Self
    where
        I: IntoIterator<Item = (N, T)>,
        N: Into<String>,
        T: Into<String>,
    {
        let store = Self::default();
        if let Ok(mut map) = store.commands.lock() {
            map.extend(commands.into_iter().map(|(n, t)| (n.into(), t.into())));
        }
        store
    }

    pub fn command(&self, name: &str) -> Option<String> {
        self.commands.lock().ok()?.get(name).cloned()
    }

    pub fn has_room(&self, site: Site, room_id: u64) -> bool {
        self.rooms
            .lock()
            .map(|rooms| rooms.contains(&(site, room_id)))
            .unwrap_or(false)
    }
}

impl BotStore for MemoryStore {
    fn load_commands(&self) -> ChatResult<Vec<(String, String)>> {
        Ok(self
            .commands
            .lock()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn save_command(&self, name: &str, template: &str) -> ChatResult<()> {
        if let Ok(mut map) = self.commands.lock() {
            map.insert(name.to_string(), template.to_string());
        }
        Ok(())
    }

    fn delete_command(&self, name: &str) -> ChatResult<()> {
        if let Ok(mut map) = self.commands.lock() {
            map.remove(name);
        }
        Ok(())
    }

    fn load_rooms(&self, site: Site) -> ChatResult<Vec<u64>> {
        Ok(self
            .rooms
            .lock()
            .map(|rooms| {
                rooms
                    .iter()
                    .filter(|(s, _)| *s == site)
                    .map(|(_, id)| *id)
                    .collect()
            })
            .unwrap_or_default())
    }

    fn save_room(&self, site: Site, room_id: u64) -> ChatResult<()> {
        if let Ok(mut rooms) = self.rooms.lock() {
            rooms.insert((site, room_id));
        }
        Ok(())
    }

    fn delete_room(&self, site: Site, room_id: u64) -> ChatResult<()> {
        if let Ok(mut rooms) = self.rooms.lock() {
            rooms.remove(&(site, room_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_name_encoding() {
        assert_eq!(encode_command_name(" Hello "), "hello");
        assert_eq!(encode_command_name("a/b c"), "a%2Fb%20c");
        assert_eq!(decode_command_name("a%2Fb%20c").as_deref(), Some("a/b c"));
    }

    #[test]
    fn test_file_store_commands() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        store.save_command("greet", "Hello $0!").unwrap();
        store.save_command("a/b", "slash").unwrap();
        let loaded = store.load_commands().unwrap();
        assert_eq!(
            loaded,
            vec![
                ("a/b".to_string(), "slash".to_string()),
                ("greet".to_string(), "Hello $0!".to_string()),
            ]
        );

        store.delete_command("greet").unwrap();
        store.delete_command("missing").unwrap();
        assert_eq!(store.load_commands().unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_rooms() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        assert!(store.load_rooms(Site::StackOverflow).unwrap().is_empty());
        store.save_room(Site::StackOverflow, 17).unwrap();
        store.save_room(Site::StackOverflow, 1).unwrap();
        store.save_room(Site::StackExchange, 11).unwrap();

        assert_eq!(store.load_rooms(Site::StackOverflow).unwrap(), vec![1, 17]);
        assert_eq!(store.load_rooms(Site::StackExchange).unwrap(), vec![11]);

        store.delete_room(Site::StackOverflow, 17).unwrap();
        assert_eq!(store.load_rooms(Site::StackOverflow).unwrap(), vec![1]);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::with_commands([("x", "y")]);
        assert_eq!(store.command("x").as_deref(), Some("y"));
        store.save_room(Site::StackExchange, 3).unwrap();
        assert!(store.has_room(Site::StackExchange, 3));
        assert!(!store.has_room(Site::StackOverflow, 3));
    }
}
