use std::io;
use std::path::{Path, PathBuf};

use data_agent_core::tool::Artifact;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Saves the artifacts shown to the user as files in a directory.
///
/// Figures are written as Plotly JSON documents, images as their encoded
/// bytes. File names are numbered in the order artifacts arrive, after the
/// highest number already in the directory, and existing files are never
/// overwritten.
#[derive(Debug)]
pub struct ArtifactStore {
    dir: PathBuf,
    /// The next number to use, `None` until the directory has been read.
    next_seq: Mutex<Option<usize>>,
}

impl ArtifactStore {
    /// Creates a store writing to `dir`, which is created on first use.
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self {
            dir: dir.into(),
            next_seq: Mutex::new(None),
        }
    }

    /// Returns the output directory.
    #[inline]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes `artifact` and returns the path of the new file.
    pub async fn save(&self, artifact: &Artifact) -> io::Result<PathBuf> {
        let (ext, contents) = match artifact {
            Artifact::Figure { figure, .. } => {
                ("json", serde_json::to_vec_pretty(figure)?)
            }
            Artifact::Image { mime, data, .. } => {
                (mime.subtype().as_str(), data.to_vec())
            }
        };
        let slug = slug(artifact.title());

        let mut next_seq = self.next_seq.lock().await;
        let mut seq = match *next_seq {
            Some(seq) => seq,
            None => {
                fs::create_dir_all(&self.dir).await?;
                last_seq(&self.dir).await? + 1
            }
        };

        let (path, mut file) = loop {
            let path = self.dir.join(format!("{seq:03}-{slug}.{ext}"));
            let opened = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(file) => break (path, file),
                // Another process took this number.
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    seq += 1;
                }
                Err(err) => return Err(err),
            }
        };
        *next_seq = Some(seq + 1);
        drop(next_seq);

        file.write_all(&contents).await?;
        file.flush().await?;
        debug!("artifact saved to {}", path.display());
        Ok(path)
    }
}

/// Returns the highest `NNN-` prefix among the files in `dir`, or `0`.
async fn last_seq(dir: &Path) -> io::Result<usize> {
    let mut entries = fs::read_dir(dir).await?;
    let mut last = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(seq) = name
            .to_str()
            .and_then(|name| name.split_once('-'))
            .and_then(|(prefix, _)| prefix.parse::<usize>().ok())
        else {
            continue;
        };
        last = last.max(seq);
    }
    Ok(last)
}

fn slug(title: &str) -> String {
    let mut slug = String::new();
    for c in title.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "chart".to_owned()
    } else {
        slug.to_owned()
    }
}
