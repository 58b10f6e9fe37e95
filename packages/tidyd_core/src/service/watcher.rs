//! Folder watcher. Polls a directory, sorts new files into category
//! folders, and renames them to an engine-suggested name when the engine
//! produces a usable one.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::service::engine::EngineHost;

pub const SCAN_INTERVAL: Duration = Duration::from_secs(2);

/// Longest stem a suggested name may keep.
const MAX_STEM_LEN: usize = 50;
/// Anything shorter is treated as the engine failing to produce a name.
const MIN_STEM_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    Images,
    Documents,
    Videos,
    Audio,
    Archives,
    Code,
    Other,
}

impl FileCategory {
    pub fn for_extension(extension: &str) -> FileCategory {
        match extension {
            "jpg" | "jpeg" | "png" | "gif" | "heic" | "webp" | "svg" | "bmp" | "tiff" => {
                FileCategory::Images
            }
            "pdf" | "doc" | "docx" | "txt" | "rtf" | "md" | "pages" | "key" | "numbers"
            | "xls" | "xlsx" | "ppt" | "pptx" | "csv" => FileCategory::Documents,
            "mp4" | "mov" | "avi" | "mkv" | "webm" => FileCategory::Videos,
            "mp3" | "wav" | "aac" | "flac" | "m4a" | "ogg" => FileCategory::Audio,
            "zip" | "rar" | "7z" | "tar" | "gz" | "bz2" | "xz" => FileCategory::Archives,
            "swift" | "py" | "js" | "ts" | "rs" | "go" | "java" | "c" | "cpp" | "h" | "html"
            | "css" | "sh" | "json" | "yaml" | "toml" => FileCategory::Code,
            _ => FileCategory::Other,
        }
    }

    pub fn folder_name(&self) -> &'static str {
        match self {
            FileCategory::Images => "Images",
            FileCategory::Documents => "Documents",
            FileCategory::Videos => "Videos",
            FileCategory::Audio => "Audio",
            FileCategory::Archives => "Archives",
            FileCategory::Code => "Code",
            FileCategory::Other => "Other",
        }
    }
}

/// Turn an engine reply into a usable file name, or nothing if the reply is
/// not salvageable. Strips characters that cannot appear in file names,
/// drops an echoed extension, and enforces the stem length bounds.
pub fn sanitized_file_name(raw: &str, extension: &str) -> Option<String> {
    const INVALID: &[char] = &[':', '/', '\\', '?', '%', '*', '|', '"', '<', '>'];

    let line = raw.lines().next().unwrap_or_default();
    let mut stem: String = line
        .chars()
        .filter(|c| !INVALID.contains(c) && !c.is_control())
        .collect();
    stem = stem.trim().trim_matches('.').trim().to_string();

    if !extension.is_empty() {
        let suffix = format!(".{}", extension);
        if stem.len() >= suffix.len()
            && stem.is_char_boundary(stem.len() - suffix.len())
            && stem[stem.len() - suffix.len()..].eq_ignore_ascii_case(&suffix)
        {
            stem.truncate(stem.len() - suffix.len());
            stem = stem.trim_end().to_string();
        }
    }

    if stem.chars().count() > MAX_STEM_LEN {
        stem = stem.chars().take(MAX_STEM_LEN).collect::<String>().trim_end().to_string();
    }
    if stem.chars().count() < MIN_STEM_LEN {
        return None;
    }

    if extension.is_empty() {
        Some(stem)
    } else {
        Some(format!("{}.{}", stem, extension))
    }
}

/// Timestamped name used when no usable suggestion exists.
pub fn fallback_file_name(extension: &str) -> String {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    if extension.is_empty() {
        format!("file_{}", stamp)
    } else {
        format!("file_{}.{}", stamp, extension)
    }
}

fn naming_prompt(file_name: &str) -> String {
    format!(
        "Suggest a short, descriptive file name for the file currently named \
         \"{}\". Reply with the name only, without an extension.",
        file_name
    )
}

/// Watches one directory. Each watcher owns its dedup state, so watching
/// the same directory twice organizes files once per watcher.
pub struct FolderWatcher {
    dir: PathBuf,
    engine: Arc<EngineHost>,
    seen: HashSet<PathBuf>,
    interval: Duration,
}

impl FolderWatcher {
    pub fn new(dir: PathBuf, engine: Arc<EngineHost>) -> Self {
        FolderWatcher {
            dir,
            engine,
            seen: HashSet::new(),
            interval: SCAN_INTERVAL,
        }
    }

    /// Poll until cancelled. The first sweep runs immediately, so files
    /// already present when the watcher starts get organized too.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(dir = %self.dir.display(), "watching folder");

        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(error) = self.sweep().await {
                        tracing::warn!(?error, dir = %self.dir.display(), "sweep failed");
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }

        tracing::info!(dir = %self.dir.display(), "watcher stopped");
    }

    async fn sweep(&mut self) -> std::io::Result<()> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();

            if name.starts_with('.') {
                continue;
            }
            if !entry.file_type().await?.is_file() {
                continue;
            }
            // Files stay claimed even if organizing them fails, so one bad
            // file cannot make every sweep retry it.
            if !self.seen.insert(path.clone()) {
                continue;
            }

            if let Err(error) = self.place(&path).await {
                tracing::warn!(?error, file = %name, "failed to organize file");
            }
        }
        Ok(())
    }

    async fn place(&self, path: &Path) -> std::io::Result<()> {
        let file_name = match path.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => return Ok(()),
        };
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        let category = FileCategory::for_extension(&extension);
        let target_dir = self.dir.join(category.folder_name());
        tokio::fs::create_dir_all(&target_dir).await?;

        let suggestion = match self.engine.suggest(&naming_prompt(&file_name)).await {
            Ok(reply) => sanitized_file_name(&reply, &extension),
            Err(error) => {
                tracing::warn!(%error, file = %file_name, "name suggestion failed");
                None
            }
        };
        let new_name = suggestion.unwrap_or_else(|| fallback_file_name(&extension));

        let mut destination = target_dir.join(&new_name);
        if tokio::fs::try_exists(&destination).await? {
            destination = target_dir.join(&file_name);
        }
        if tokio::fs::try_exists(&destination).await? {
            tracing::warn!(file = %file_name, "destination already occupied, leaving file in place");
            return Ok(());
        }

        tokio::fs::rename(path, &destination).await?;
        tracing::info!(from = %file_name, to = %destination.display(), "organized file");
        Ok(())
    }
}
