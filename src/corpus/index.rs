use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::cache::CacheStore;
use crate::config::SourceConfig;
use crate::corpus::balance::{balance_classes, cyclic_repeat, shuffle_in_lockstep};
use crate::error::{PipelineError, Result};

/// Cache key of the discovered (file, label) list.
pub const IMAGE_LIST_KEY: &str = "images.cache";

#[derive(Serialize, Deserialize)]
struct ImageList {
    files: Vec<PathBuf>,
    labels: Vec<usize>,
}

/// Class-labeled file list, balanced, shuffled and split into a held-out set
/// and a trainable pool of fixed-size batches.
#[derive(Debug, Clone)]
pub struct CorpusIndex {
    class_names: Vec<String>,
    train_files: Vec<PathBuf>,
    train_labels: Vec<usize>,
    held_out_files: Vec<PathBuf>,
    held_out_labels: Vec<usize>,
    batch_size: usize,
    test_set_size: usize,
    num_batches: usize,
}

impl CorpusIndex {
    /// Discovers the corpus under `config.directory` and partitions it.
    ///
    /// The raw file list is taken from `cache` when present, so a rebuild
    /// never re-walks the filesystem.
    pub fn build(config: &SourceConfig, cache: &CacheStore) -> Result<CorpusIndex> {
        let classes = discover_classes(config)?;
        let class_names: Vec<String> = classes.iter().map(|(name, _)| name.clone()).collect();

        let list = if cache.exists(IMAGE_LIST_KEY) {
            info!("loading cached image list");
            cache.get::<ImageList>(IMAGE_LIST_KEY)?
        } else {
            info!("finding image list");
            let paths: Vec<PathBuf> = classes.into_iter().map(|(_, path)| path).collect();
            let (files, labels) = find_images(&paths)?;
            let list = ImageList { files, labels };
            cache.put(IMAGE_LIST_KEY, &list)?;
            list
        };

        CorpusIndex::from_labeled(class_names, list.files, list.labels, config)
    }

    /// Balances, shuffles and partitions an already discovered file list.
    pub fn from_labeled(
        class_names: Vec<String>,
        mut files: Vec<PathBuf>,
        mut labels: Vec<usize>,
        config: &SourceConfig,
    ) -> Result<CorpusIndex> {
        if files.len() != labels.len() {
            return Err(PipelineError::config(format!(
                "{} files but {} labels",
                files.len(),
                labels.len()
            )));
        }
        let num_classes = class_names.len();
        if let Some(&label) = labels.iter().find(|&&l| l >= num_classes) {
            return Err(PipelineError::config(format!(
                "label {label} outside 0..{num_classes}"
            )));
        }

        if config.balance_classes {
            info!("balancing classes");
            let (f, l) = balance_classes(&files, &labels, num_classes, config.samples_per_class)?;
            files = f;
            labels = l;
        }

        info!("shuffling data");
        shuffle_in_lockstep(&mut files, &mut labels, config.shuffle_seed);

        let total = files.len();
        let (batch_size, requested_test) = match config.batch_size {
            Some(batch) => (batch, config.test_set_size.unwrap_or(batch)),
            None => {
                let test = config.test_set_size.unwrap_or(total / 8);
                (total.saturating_sub(test), test)
            }
        };
        if batch_size == 0 {
            return Err(PipelineError::config("batch size must be at least 1"));
        }

        let mut test_set_size = requested_test;
        if test_set_size > batch_size {
            warn!("test set size cannot be greater than batch size");
            warn!("test set size set to {batch_size}");
            test_set_size = batch_size;
        }
        let test_set_size = test_set_size.min(total);

        let train_files = files.split_off(test_set_size);
        let train_labels = labels.split_off(test_set_size);
        let num_batches = train_files.len() / batch_size;

        info!("num batches: {num_batches}");
        info!("batch size: {batch_size}");
        info!("test set size: {test_set_size}");

        Ok(CorpusIndex {
            class_names,
            train_files,
            train_labels,
            held_out_files: files,
            held_out_labels: labels,
            batch_size,
            test_set_size,
            num_batches,
        })
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn test_set_size(&self) -> usize {
        self.test_set_size
    }

    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    pub fn train_files(&self) -> &[PathBuf] {
        &self.train_files
    }

    pub fn train_labels(&self) -> &[usize] {
        &self.train_labels
    }

    pub fn held_out_files(&self) -> &[PathBuf] {
        &self.held_out_files
    }

    pub fn held_out_labels(&self) -> &[usize] {
        &self.held_out_labels
    }

    /// Every distinct file in the corpus, held-out set first, in index order.
    pub fn distinct_files(&self) -> Vec<PathBuf> {
        let mut seen = HashSet::new();
        self.held_out_files
            .iter()
            .chain(&self.train_files)
            .filter(|f| seen.insert(f.as_path()))
            .cloned()
            .collect()
    }

    /// Per-class counts over held-out and trainable entries together.
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.num_classes()];
        for &label in self.held_out_labels.iter().chain(&self.train_labels) {
            counts[label] += 1;
        }
        counts
    }

    /// Files and labels of trainable batch `index`.
    pub fn batch_entries(&self, index: usize) -> Result<(&[PathBuf], &[usize])> {
        if index >= self.num_batches {
            return Err(PipelineError::BatchOutOfRange {
                index,
                num_batches: self.num_batches,
            });
        }
        let range = index * self.batch_size..(index + 1) * self.batch_size;
        Ok((&self.train_files[range.clone()], &self.train_labels[range]))
    }

    /// Held-out entries cycled up to exactly one batch, with the true
    /// held-out count.
    pub fn test_entries(&self) -> Result<(usize, Vec<PathBuf>, Vec<usize>)> {
        if self.held_out_files.is_empty() {
            return Err(PipelineError::config("held-out set is empty"));
        }
        Ok((
            self.test_set_size,
            cyclic_repeat(&self.held_out_files, self.batch_size),
            cyclic_repeat(&self.held_out_labels, self.batch_size),
        ))
    }
}

/// Resolves class names to directories, in label order.
fn discover_classes(config: &SourceConfig) -> Result<Vec<(String, PathBuf)>> {
    let subdirectories = match &config.subdirectories {
        Some(list) => list.clone(),
        None => child_directories(&config.directory)?,
    };

    let mut seen = HashSet::new();
    if let Some(dup) = subdirectories.iter().find(|s| !seen.insert(s.as_str())) {
        return Err(PipelineError::config(format!(
            "duplicate class directory '{dup}' in {subdirectories:?}"
        )));
    }

    Ok(subdirectories
        .into_iter()
        .filter(|s| !config.exclude.contains(s))
        .map(|s| {
            let path = config.directory.join(&s);
            (s, path)
        })
        .collect())
}

fn child_directories(directory: &Path) -> Result<Vec<String>> {
    let entries = std::fs::read_dir(directory).map_err(|e| PipelineError::io(directory, e))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(directory, e))?;
        if entry.path().is_dir() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Recursively lists every file under each class directory; the label is the
/// directory's position in `class_paths`.
fn find_images(class_paths: &[PathBuf]) -> Result<(Vec<PathBuf>, Vec<usize>)> {
    let mut files = Vec::new();
    let mut labels = Vec::new();

    for (label, class_path) in class_paths.iter().enumerate() {
        let walker = WalkDir::new(class_path).follow_links(true).sort_by_file_name();
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| class_path.clone());
                PipelineError::io(path, e.into())
            })?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
                labels.push(label);
            }
        }
    }

    Ok((files, labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn labeled(counts: &[usize]) -> (Vec<String>, Vec<PathBuf>, Vec<usize>) {
        let mut names = Vec::new();
        let mut files = Vec::new();
        let mut labels = Vec::new();
        for (label, &n) in counts.iter().enumerate() {
            names.push(format!("class{label}"));
            for i in 0..n {
                files.push(PathBuf::from(format!("class{label}/{i}.png")));
                labels.push(label);
            }
        }
        (names, files, labels)
    }

    fn config(batch: Option<usize>, test: Option<usize>) -> SourceConfig {
        SourceConfig {
            batch_size: batch,
            test_set_size: test,
            ..Default::default()
        }
    }

    #[test]
    fn oversized_test_set_is_clamped_to_batch_size() {
        let (names, files, labels) = labeled(&[30, 30]);
        let index = CorpusIndex::from_labeled(names, files, labels, &config(Some(10), Some(25))).unwrap();
        assert_eq!(index.test_set_size(), 10);
        assert_eq!(index.num_batches(), 5);

        let (held_out, test_files, test_labels) = index.test_entries().unwrap();
        assert_eq!(held_out, 10);
        assert_eq!(test_files.len(), 10);
        assert_eq!(test_labels.len(), 10);
    }

    #[test]
    fn small_held_out_set_is_padded_to_a_full_batch() {
        let (names, files, labels) = labeled(&[10, 13]);
        let index = CorpusIndex::from_labeled(names, files, labels, &config(Some(8), Some(3))).unwrap();
        let (held_out, test_files, _) = index.test_entries().unwrap();
        assert_eq!(held_out, 3);
        assert_eq!(test_files.len(), 8);
        assert_eq!(&test_files[3..6], index.held_out_files());
        assert_eq!(index.num_batches(), 20 / 8);
    }

    #[test]
    fn no_batch_size_means_one_batch() {
        let (names, files, labels) = labeled(&[8, 8]);
        let index = CorpusIndex::from_labeled(names, files, labels, &config(None, None)).unwrap();
        assert_eq!(index.test_set_size(), 2);
        assert_eq!(index.batch_size(), 14);
        assert_eq!(index.num_batches(), 1);
    }

    #[test]
    fn batches_slice_the_trainable_pool() {
        let (names, files, labels) = labeled(&[6, 6]);
        let index = CorpusIndex::from_labeled(names, files, labels, &config(Some(3), Some(2))).unwrap();
        assert_eq!(index.num_batches(), 3);

        let (files1, labels1) = index.batch_entries(1).unwrap();
        assert_eq!(files1, &index.train_files()[3..6]);
        assert_eq!(labels1, &index.train_labels()[3..6]);
        assert!(matches!(
            index.batch_entries(3),
            Err(PipelineError::BatchOutOfRange { index: 3, num_batches: 3 })
        ));
    }

    #[test]
    fn balancing_scenario_three_and_seven() {
        let (names, files, labels) = labeled(&[3, 7]);
        let mut cfg = config(Some(14), Some(0));
        cfg.balance_classes = true;
        let index = CorpusIndex::from_labeled(names, files, labels, &cfg).unwrap();
        assert_eq!(index.train_files().len(), 14);
        assert_eq!(index.class_counts(), vec![7, 7]);
        assert_eq!(index.distinct_files().len(), 10);
    }

    #[test]
    fn equal_seeds_reproduce_the_same_pairing() {
        let (names, files, labels) = labeled(&[5, 9, 4]);
        let cfg = config(Some(4), Some(2));
        let a = CorpusIndex::from_labeled(names.clone(), files.clone(), labels.clone(), &cfg).unwrap();
        let b = CorpusIndex::from_labeled(names, files, labels, &cfg).unwrap();
        assert_eq!(a.train_files(), b.train_files());
        assert_eq!(a.train_labels(), b.train_labels());
        for (file, &label) in a.train_files().iter().zip(a.train_labels()) {
            assert!(file.starts_with(format!("class{label}")));
        }
    }

    #[test]
    fn duplicate_class_directories_are_rejected() {
        let mut cfg = config(Some(1), None);
        cfg.subdirectories = Some(vec!["cats".into(), "dogs".into(), "cats".into()]);
        let err = CorpusIndex::build(&cfg, &CacheStore::disabled()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn build_walks_directories_and_caches_the_list() {
        let root = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        for (class, n) in [("alpha", 2), ("beta", 3), ("skip", 4)] {
            let dir = root.path().join(class).join("nested");
            fs::create_dir_all(&dir).unwrap();
            for i in 0..n {
                fs::write(dir.join(format!("{i}.png")), b"x").unwrap();
            }
        }

        let mut cfg = SourceConfig::new(root.path());
        cfg.exclude = vec!["skip".into()];
        cfg.batch_size = Some(2);
        cfg.test_set_size = Some(1);
        let cache = CacheStore::new(cache_dir.path());

        let index = CorpusIndex::build(&cfg, &cache).unwrap();
        assert_eq!(index.class_names(), &["alpha".to_string(), "beta".to_string()]);
        assert_eq!(index.class_counts(), vec![2, 3]);
        assert!(cache.exists(IMAGE_LIST_KEY));

        // A rebuild must come from the cached list, not from the filesystem.
        fs::remove_dir_all(root.path().join("beta").join("nested")).unwrap();
        let again = CorpusIndex::build(&cfg, &cache).unwrap();
        assert_eq!(again.class_counts(), vec![2, 3]);
        assert_eq!(again.train_files(), index.train_files());
    }
}
