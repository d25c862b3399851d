use crate::error::{Result, ServiceError};
use crate::settings::Settings;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

#[cfg(feature = "web")]
use crate::{karp::KarpClient, settings::ModeProfile};

/// Published subtypes per mode, one name per line in the mode's `subtypes` file.
///
/// Every read and rewrite of a mode's file holds that mode's lock, so concurrent
/// publish/unpublish calls cannot lose each other's updates. Modes never share a
/// lock.
pub struct SubtypeStore {
    settings: Arc<Settings>,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SubtypeStore {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn path(&self, mode: &str) -> Result<PathBuf> {
        match self.settings.profile(mode) {
            Ok(profile) => Ok(profile.subtypes_path.clone()),
            // Operators may still manage the list of a mode that cannot be searched yet.
            Err(_) => self.settings.resolve_str("subtypes", mode).map(PathBuf::from),
        }
    }

    /// Published subtypes of `mode`, in file order.
    pub fn list(&self, mode: &str) -> Result<Vec<String>> {
        let path = self.path(mode)?;
        let lock = self.lock_for(mode);
        let _guard = lock.lock();
        ensure_file(&path)?;
        read_subtypes(&path)
    }

    pub fn publish(&self, mode: &str, subtype: &str) -> Result<Vec<String>> {
        let subtype = validate_name(subtype)?;
        self.update(mode, |published| published.insert(subtype.to_string()))
    }

    pub fn unpublish(&self, mode: &str, subtype: &str) -> Result<Vec<String>> {
        let subtype = validate_name(subtype)?;
        self.update(mode, |published| published.remove(subtype))
    }

    /// The requested subtypes that are published, or every published one when
    /// nothing was requested.
    pub fn filter_public(&self, requested: &[String], mode: &str) -> Result<Vec<String>> {
        let published = self.list(mode)?;
        if requested.is_empty() {
            return Ok(published);
        }
        debug!(?published, ?requested, "intersecting subtypes");
        Ok(published
            .into_iter()
            .filter(|subtype| requested.iter().any(|wanted| wanted == subtype))
            .collect())
    }

    /// Every subtype Karp knows for the mode, published or not.
    #[cfg(feature = "web")]
    pub async fn known_remote(
        &self,
        karp: &KarpClient,
        profile: &ModeProfile,
    ) -> Result<BTreeSet<String>> {
        karp.subtype_buckets(profile).await
    }

    /// Subtypes known to Karp that are not published, sorted.
    #[cfg(feature = "web")]
    pub async fn unpublished(
        &self,
        karp: &KarpClient,
        profile: &ModeProfile,
        published: &[String],
    ) -> Result<Vec<String>> {
        let known = self.known_remote(karp, profile).await?;
        Ok(known
            .into_iter()
            .filter(|subtype| !published.contains(subtype))
            .collect())
    }

    fn update<F>(&self, mode: &str, change: F) -> Result<Vec<String>>
    where
        F: FnOnce(&mut BTreeSet<String>) -> bool,
    {
        let path = self.path(mode)?;
        let lock = self.lock_for(mode);
        let _guard = lock.lock();
        ensure_file(&path)?;
        let mut published: BTreeSet<String> = read_subtypes(&path)?.into_iter().collect();
        if change(&mut published) {
            write_subtypes(&path, &published)?;
            info!(%mode, path = %path.display(), count = published.len(), "published subtypes rewritten");
        }
        read_subtypes(&path)
    }

    fn lock_for(&self, mode: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(mode.to_string())
            .or_default()
            .clone()
    }
}

fn validate_name(subtype: &str) -> Result<&str> {
    let subtype = subtype.trim();
    if subtype.is_empty() || subtype.contains(['\n', '\r']) {
        return Err(ServiceError::Query(format!(
            "Invalid subtype name {subtype:?}"
        )));
    }
    Ok(subtype)
}

/// Creates the file, and its directory one level deep, when missing.
fn ensure_file(path: &Path) -> Result<()> {
    if path.is_file() {
        return Ok(());
    }
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        if !dir.is_dir() {
            match fs::create_dir(dir) {
                Ok(()) => info!(dir = %dir.display(), "created subtype directory"),
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    return Err(ServiceError::Configuration {
                        message: format!(
                            "Subtype path {} is more than one directory away from an existing one",
                            path.display()
                        ),
                        status: 500,
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }
        }
    }
    fs::write(path, "")?;
    info!(path = %path.display(), "created empty subtype file");
    Ok(())
}

fn read_subtypes(path: &Path) -> Result<Vec<String>> {
    let raw = fs::read_to_string(path)?;
    let mut seen = BTreeSet::new();
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect())
}

fn write_subtypes(path: &Path, published: &BTreeSet<String>) -> Result<()> {
    let body = published
        .iter()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join("\n");
    fs::write(path, body)?;
    Ok(())
}
