//! On-disk state: the build-string store, the talent-tree cache and the character roster.
//!
//! All files are rewritten in full. Writes are not atomic and not locked; a crash during
//! a write can leave a truncated file behind, and concurrent writers race with the last
//! rewrite winning.

use crate::model::Character;
use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::protocol::BuildEntry;

/// Prefix reserved for documentation/example keys inside the build store.
pub const METADATA_PREFIX: char = '_';

pub const BUILDS_FILE: &str = "talent_builds.json";
pub const TREE_CACHE_DIR: &str = "talent_cache";
pub const ROSTER_FILE: &str = "characters.json";

const CLASS_NODES: &str = "class_nodes";
const SPEC_NODES: &str = "spec_nodes";

pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("companion-host")
}

fn write_pretty(path: &Path, value: &impl serde::Serialize) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
    }
    let data = serde_json::to_string_pretty(value)?;
    fs::write(path, data).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

/// class -> spec -> build kind -> build string, persisted as one JSON document.
#[derive(Debug, Clone)]
pub struct BuildStore {
    path: PathBuf,
}

impl BuildStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The stored document including metadata keys. A missing file is an empty store.
    pub fn load_raw(&self) -> Result<Map<String, Value>> {
        let data = match fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(e).with_context(|| format!("read {}", self.path.display())),
        };
        if data.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str::<Value>(&data)
            .with_context(|| format!("parse {}", self.path.display()))?
        {
            Value::Object(map) => Ok(map),
            other => bail!(
                "{} holds a JSON {} instead of an object",
                self.path.display(),
                json_kind(&other)
            ),
        }
    }

    /// The store as shown to the display layer, with metadata keys removed.
    pub fn load_for_display(&self) -> Result<Value> {
        let mut value = Value::Object(self.load_raw()?);
        strip_metadata(&mut value);
        Ok(value)
    }

    /// Merge one entry into the store and rewrite the whole file.
    ///
    /// Intermediate levels are created on demand. An existing value for the same
    /// (class, spec, kind) triple is overwritten; everything else is left as is.
    pub fn save(&self, entry: &BuildEntry) -> Result<()> {
        let mut root = self.load_raw()?;
        let mut class_map = take_object(&mut root, &entry.class);
        let mut spec_map = take_object(&mut class_map, &entry.spec);
        spec_map.insert(entry.build_type.clone(), Value::String(entry.build.clone()));
        class_map.insert(entry.spec.clone(), Value::Object(spec_map));
        root.insert(entry.class.clone(), Value::Object(class_map));
        write_pretty(&self.path, &root)?;
        debug!(
            class = %entry.class,
            spec = %entry.spec,
            build_type = %entry.build_type,
            path = %self.path.display(),
            "build string saved"
        );
        Ok(())
    }
}

/// Remove `key` from `map` as an object; a missing or non-object entry yields an empty one.
fn take_object(map: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match map.remove(key) {
        Some(Value::Object(m)) => m,
        Some(other) => {
            warn!(key, found = json_kind(&other), "replacing non-object build store entry");
            Map::new()
        }
        None => Map::new(),
    }
}

fn strip_metadata(value: &mut Value) {
    if let Value::Object(map) = value {
        map.retain(|k, _| !k.starts_with(METADATA_PREFIX));
        for child in map.values_mut() {
            strip_metadata(child);
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A cached talent tree for one class/spec pair.
#[derive(Debug, Clone)]
pub struct TalentTree {
    pub class: String,
    pub spec: String,
    pub tree: Value,
}

/// Directory of `<class>_<spec>.json` talent-tree documents.
#[derive(Debug, Clone)]
pub struct TalentTreeCache {
    dir: PathBuf,
}

impl TalentTreeCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Load every well-formed tree in filename order. Bad files are skipped with a warning.
    pub fn scan(&self) -> Vec<TalentTree> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "no talent tree cache");
                return Vec::new();
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        paths
            .iter()
            .filter_map(|p| match load_tree(p) {
                Ok(tree) => Some(tree),
                Err(e) => {
                    warn!(path = %p.display(), "skipping talent tree: {e:#}");
                    None
                }
            })
            .collect()
    }
}

fn load_tree(path: &Path) -> Result<TalentTree> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .context("file name is not valid UTF-8")?;
    let Some((class, spec)) = stem.split_once('_') else {
        bail!("file name is not <class>_<spec>.json");
    };
    if class.is_empty() || spec.is_empty() {
        bail!("file name is not <class>_<spec>.json");
    }

    let data = fs::read_to_string(path).context("read")?;
    let tree: Value = serde_json::from_str(&data).context("parse")?;
    for field in [CLASS_NODES, SPEC_NODES] {
        if !tree.get(field).is_some_and(Value::is_array) {
            bail!("missing `{field}` array");
        }
    }

    Ok(TalentTree {
        class: class.to_string(),
        spec: spec.to_string(),
        tree,
    })
}

/// Load the roster. Missing, empty or unreadable files are treated as an empty roster.
pub fn load_roster(path: &Path) -> Vec<Character> {
    let data = match fs::read_to_string(path) {
        Ok(d) => d,
        Err(_) => return Vec::new(),
    };
    if data.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str(&data) {
        Ok(chars) => chars,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "roster unreadable, starting empty");
            Vec::new()
        }
    }
}

pub fn save_roster(path: &Path, characters: &[Character]) -> Result<()> {
    write_pretty(path, &characters)
}
