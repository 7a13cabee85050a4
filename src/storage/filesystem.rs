// ABOUTME: Directory-backed storage with one directory per context id
// ABOUTME: Writes go to a temp file and are renamed into place so readers never see partial data

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::error::{Result, StorageError};
use super::{validate_property, StoragePolicy, StorageService, WriteMode};
use crate::discriminator::ContextId;

/// Holds append-mode versions: `<root>/<context>/.append/<property>/<n>`
const APPEND_DIR: &str = ".append";
const TEMP_PREFIX: &str = ".tmp-";
/// Exclusive owner marker of a context; never listed as a property
const CLAIM_FILE: &str = ".claim";

#[derive(Debug, Clone)]
pub struct FileSystemStorage {
    root: PathBuf,
    policy: StoragePolicy,
}

impl FileSystemStorage {
    /// Open (and create if needed) a storage rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_policy(root, StoragePolicy::default()).await
    }

    pub async fn open_with_policy(root: impl Into<PathBuf>, policy: StoragePolicy) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        debug!("Opened file system storage at {}", root.display());
        Ok(Self { root, policy })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn context_dir(&self, context_id: &ContextId) -> PathBuf {
        self.root.join(context_id.as_str())
    }

    fn property_path(&self, context_id: &ContextId, property: &str) -> PathBuf {
        self.context_dir(context_id).join(property)
    }

    fn claim_path(&self, context_id: &ContextId) -> PathBuf {
        self.context_dir(context_id).join(CLAIM_FILE)
    }

    fn versions_dir(&self, context_id: &ContextId, property: &str) -> PathBuf {
        self.context_dir(context_id).join(APPEND_DIR).join(property)
    }

    fn not_found(context_id: &ContextId, property: &str) -> StorageError {
        StorageError::NotFound {
            context_id: context_id.to_string(),
            property: property.to_string(),
        }
    }

    /// Write `data` into a fresh temp file inside `dir` and return its path
    async fn write_temp(dir: &Path, data: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(dir).await?;
        let temp_path = dir.join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;

        Ok(temp_path)
    }

    async fn overwrite(&self, context_id: &ContextId, property: &str, data: &[u8]) -> Result<()> {
        let target = self.property_path(context_id, property);
        let temp_path = Self::write_temp(&self.context_dir(context_id), data).await?;

        if let Err(e) = fs::rename(&temp_path, &target).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn append(&self, context_id: &ContextId, property: &str, data: &[u8]) -> Result<()> {
        let dir = self.versions_dir(context_id, property);
        let temp_path = Self::write_temp(&dir, data).await?;

        // hard_link fails if the version exists, so concurrent appenders
        // (even from other processes) never clobber each other
        let mut next = Self::version_numbers(&dir).await?.last().copied().unwrap_or(0) + 1;
        loop {
            let target = dir.join(format!("{:010}", next));
            match fs::hard_link(&temp_path, &target).await {
                Ok(()) => break,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => next += 1,
                Err(e) => {
                    let _ = fs::remove_file(&temp_path).await;
                    return Err(e.into());
                }
            }
        }

        fs::remove_file(&temp_path).await?;
        Ok(())
    }

    async fn version_numbers(dir: &Path) -> Result<Vec<u64>> {
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut numbers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(n) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<u64>().ok())
            {
                numbers.push(n);
            }
        }

        numbers.sort_unstable();
        Ok(numbers)
    }

    async fn read_file(path: &Path, context_id: &ContextId, property: &str) -> Result<Vec<u8>> {
        match fs::read(path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Self::not_found(context_id, property)),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StorageService for FileSystemStorage {
    async fn store(&self, context_id: &ContextId, property: &str, data: &[u8]) -> Result<()> {
        validate_property(property)?;

        match self.policy.write_mode(property) {
            WriteMode::Overwrite => self.overwrite(context_id, property, data).await,
            WriteMode::Append => self.append(context_id, property, data).await,
        }
    }

    async fn retrieve(&self, context_id: &ContextId, property: &str) -> Result<Vec<u8>> {
        validate_property(property)?;

        match self.policy.write_mode(property) {
            WriteMode::Overwrite => {
                let path = self.property_path(context_id, property);
                Self::read_file(&path, context_id, property).await
            }
            WriteMode::Append => {
                let dir = self.versions_dir(context_id, property);
                let latest = Self::version_numbers(&dir)
                    .await?
                    .last()
                    .copied()
                    .ok_or_else(|| Self::not_found(context_id, property))?;
                Self::read_file(&dir.join(format!("{:010}", latest)), context_id, property).await
            }
        }
    }

    async fn retrieve_all(&self, context_id: &ContextId, property: &str) -> Result<Vec<Vec<u8>>> {
        validate_property(property)?;

        match self.policy.write_mode(property) {
            WriteMode::Overwrite => Ok(vec![self.retrieve(context_id, property).await?]),
            WriteMode::Append => {
                let dir = self.versions_dir(context_id, property);
                let numbers = Self::version_numbers(&dir).await?;
                if numbers.is_empty() {
                    return Err(Self::not_found(context_id, property));
                }

                let mut versions = Vec::with_capacity(numbers.len());
                for n in numbers {
                    let path = dir.join(format!("{:010}", n));
                    versions.push(Self::read_file(&path, context_id, property).await?);
                }
                Ok(versions)
            }
        }
    }

    async fn exists(&self, context_id: &ContextId, property: &str) -> Result<bool> {
        validate_property(property)?;

        match self.policy.write_mode(property) {
            WriteMode::Overwrite => Ok(fs::try_exists(self.property_path(context_id, property)).await?),
            WriteMode::Append => {
                let dir = self.versions_dir(context_id, property);
                Ok(!Self::version_numbers(&dir).await?.is_empty())
            }
        }
    }

    async fn delete(&self, context_id: &ContextId) -> Result<()> {
        match fs::remove_dir_all(self.context_dir(context_id)).await {
            Ok(()) => {
                debug!("Deleted storage for context {}", context_id.short());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_contexts(&self) -> Result<Vec<ContextId>> {
        let mut entries = fs::read_dir(&self.root).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| ContextId::parse(name).ok())
            {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    async fn list_properties(&self, context_id: &ContextId) -> Result<Vec<String>> {
        let context_dir = self.context_dir(context_id);
        let mut entries = match fs::read_dir(&context_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut properties = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') && entry.file_type().await?.is_file() {
                    properties.push(name.to_string());
                }
            }
        }

        let append_dir = context_dir.join(APPEND_DIR);
        if let Ok(mut appended) = fs::read_dir(&append_dir).await {
            while let Some(entry) = appended.next_entry().await? {
                if let Some(name) = entry.file_name().to_str() {
                    properties.push(name.to_string());
                }
            }
        }

        properties.sort();
        properties.dedup();
        Ok(properties)
    }

    async fn try_claim(&self, context_id: &ContextId, claim: &[u8]) -> Result<bool> {
        let temp_path = Self::write_temp(&self.context_dir(context_id), claim).await?;

        // hard_link refuses to replace an existing claim, also across processes
        let claimed = match fs::hard_link(&temp_path, self.claim_path(context_id)).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => false,
            Err(e) => {
                let _ = fs::remove_file(&temp_path).await;
                return Err(e.into());
            }
        };

        fs::remove_file(&temp_path).await?;
        Ok(claimed)
    }

    async fn read_claim(&self, context_id: &ContextId) -> Result<Option<Vec<u8>>> {
        match fs::read(self.claim_path(context_id)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn release_claim(&self, context_id: &ContextId, expected: &[u8]) -> Result<bool> {
        let claim_path = self.claim_path(context_id);
        let released = self
            .context_dir(context_id)
            .join(format!("{}{}", TEMP_PREFIX, uuid::Uuid::new_v4()));

        // only one releaser can move the claim away
        match fs::rename(&claim_path, &released).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        let matches = fs::read(&released).await? == expected;
        if !matches {
            // someone else's claim: put it back unless a new one was taken meanwhile
            match fs::hard_link(&released, &claim_path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {}
                Err(e) => {
                    let _ = fs::remove_file(&released).await;
                    return Err(e.into());
                }
            }
        }

        fs::remove_file(&released).await?;
        Ok(matches)
    }

    fn write_mode(&self, property: &str) -> WriteMode {
        self.policy.write_mode(property)
    }
}
