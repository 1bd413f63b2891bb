//! Writing the legacy `docker load` layout and bundling it into one tar

use crate::{
    archive::chain::LayerChain,
    errors::PullError,
    image::ContentDigest,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};
use tar::HeaderMode;

pub const LAYER_VERSION: &str = "1.0";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const REPOSITORIES_FILE: &str = "repositories";

/// The single entry of the archive's `manifest.json`
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveManifestEntry {
    pub config: String,
    pub repo_tags: Vec<String>,
    pub layers: Vec<String>,
}

/// Everything that goes into one archive
#[derive(Debug)]
pub struct ArchiveContents {
    pub chain: LayerChain,
    pub config_digest: ContentDigest,
    /// Image config document, stored verbatim
    pub config: Vec<u8>,
    /// Repository name as it should appear after loading
    pub repository: String,
    pub tag: String,
    /// Uncompressed layer tar for each distinct blob digest
    pub layers: HashMap<ContentDigest, PathBuf>,
}

impl ArchiveContents {
    pub fn repo_tag(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }

    pub fn config_file_name(&self) -> String {
        format!("{}.json", self.config_digest.hex_str())
    }

    pub fn manifest(&self) -> Vec<ArchiveManifestEntry> {
        vec![ArchiveManifestEntry {
            config: self.config_file_name(),
            repo_tags: vec![self.repo_tag()],
            layers: self
                .chain
                .records()
                .iter()
                .map(|record| record.tar_path())
                .collect(),
        }]
    }

    pub fn repositories(&self) -> BTreeMap<String, BTreeMap<String, String>> {
        let mut tags = BTreeMap::new();
        tags.insert(self.tag.clone(), self.chain.final_id().to_owned());
        let mut repositories = BTreeMap::new();
        repositories.insert(self.repository.clone(), tags);
        repositories
    }
}

/// Builds an archive inside a layout directory it owns
pub struct ArchiveAssembler {
    layout_dir: PathBuf,
}

impl ArchiveAssembler {
    pub fn new(layout_dir: PathBuf) -> Self {
        ArchiveAssembler { layout_dir }
    }

    /// Lay out the image and write it to `output`
    ///
    /// The staged layer files are moved into the layout, so they are gone
    /// afterwards. The archive is written under a `.part` name and renamed
    /// once complete; on failure no file is left at either name.
    pub async fn assemble(
        &self,
        contents: ArchiveContents,
        output: PathBuf,
    ) -> Result<PathBuf, PullError> {
        let layout_dir = self.layout_dir.clone();
        tokio::task::spawn_blocking(move || {
            write_layout(&layout_dir, &contents)
                .and_then(|entries| write_archive(&layout_dir, &entries, &output))
                .map(|()| output)
                .map_err(PullError::AssemblyFailed)
        })
        .await?
    }
}

/// Create the layout directory, returning archive paths in the order they
/// should be written
fn write_layout(layout_dir: &Path, contents: &ArchiveContents) -> io::Result<Vec<String>> {
    fs::create_dir_all(layout_dir)?;
    let mut entries = vec![
        MANIFEST_FILE.to_owned(),
        REPOSITORIES_FILE.to_owned(),
        contents.config_file_name(),
    ];
    write_json(&layout_dir.join(MANIFEST_FILE), &contents.manifest())?;
    write_json(&layout_dir.join(REPOSITORIES_FILE), &contents.repositories())?;
    fs::write(layout_dir.join(contents.config_file_name()), &contents.config)?;

    let records = contents.chain.records();
    for (index, record) in records.iter().enumerate() {
        let staged = contents.layers.get(&record.digest).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no downloaded layer for {}", record.digest),
            )
        })?;
        let layer_dir = layout_dir.join(&record.id);
        fs::create_dir(&layer_dir)?;
        fs::write(layer_dir.join("VERSION"), LAYER_VERSION)?;
        fs::write(layer_dir.join("json"), record.metadata_json().map_err(io::Error::other)?)?;

        let reused_later = records[index + 1..]
            .iter()
            .any(|later| later.digest == record.digest);
        if reused_later {
            fs::copy(staged, layer_dir.join("layer.tar"))?;
        } else {
            fs::rename(staged, layer_dir.join("layer.tar"))?;
        }
        log::debug!("laid out layer {}", record.id);

        entries.push(format!("{}/", record.id));
        entries.push(format!("{}/VERSION", record.id));
        entries.push(format!("{}/json", record.id));
        entries.push(record.tar_path());
    }
    Ok(entries)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer(&mut writer, value).map_err(io::Error::other)?;
    writer.flush()
}

/// Temporary name for an archive being written, unique per call
fn unique_part_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_owned();
    name.push(format!(".{:016x}.part", rand::random::<u64>()));
    PathBuf::from(name)
}

fn write_archive(layout_dir: &Path, entries: &[String], output: &Path) -> io::Result<()> {
    let part = unique_part_path(output);
    let result = write_tar(layout_dir, entries, &part).and_then(|()| fs::rename(&part, output));
    if result.is_err() {
        let _ = fs::remove_file(&part);
    }
    result
}

fn write_tar(layout_dir: &Path, entries: &[String], part: &Path) -> io::Result<()> {
    let mut builder = tar::Builder::new(BufWriter::new(File::create(part)?));
    builder.mode(HeaderMode::Deterministic);
    builder.follow_symlinks(false);
    for name in entries {
        let path = layout_dir.join(name.trim_end_matches('/'));
        if name.ends_with('/') {
            builder.append_dir(name, &path)?;
        } else {
            builder.append_path_with_name(&path, name)?;
        }
    }
    let mut writer = builder.into_inner()?;
    writer.flush()?;
    writer.get_ref().sync_all()
}
