/// Level-of-detail manager: picks an alignment file of appropriate
/// coarseness for a query length, opening files lazily and falling back to
/// the finest level when DNA is required.
use crate::alignment::{open_alignment, AccessMode, Alignment, OpenOptions};
use crate::blob::is_url;
use crate::error::{HalError, Result};
use crate::types::Size;
use log::{debug, info};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

struct LodLevel {
    path: String,
    alignment: Option<Alignment>,
}

pub struct LodManager {
    levels: BTreeMap<Size, LodLevel>,
    options: OpenOptions,
    /// Largest min-length whose file is known to contain DNA; raised
    /// monotonically as levels are opened.
    coarsest_with_dna: Size,
}

impl std::fmt::Debug for LodManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LodManager")
            .field("levels", &self.levels.keys().collect::<Vec<_>>())
            .field("coarsest_with_dna", &self.coarsest_with_dna)
            .finish()
    }
}

impl LodManager {
    /// Load a text index: one `<minLen> <path>` entry per line, blank
    /// lines ignored. Relative paths resolve against the index file's
    /// directory; URLs pass through untouched.
    pub fn load(index_path: &str, options: &OpenOptions) -> Result<LodManager> {
        let text = fs::read_to_string(index_path)
            .map_err(|e| HalError::IoFailure(std::io::Error::new(e.kind(), format!("{index_path}: {e}"))))?;
        let mut levels = BTreeMap::new();
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let entry = (|| {
                let min_len: Size = fields.next()?.parse().ok()?;
                let path = fields.next()?;
                Some((min_len, path))
            })();
            let (min_len, path) = entry.ok_or_else(|| {
                HalError::BadFormat(format!(
                    "error parsing line {} of {index_path}",
                    lineno + 1
                ))
            })?;
            levels.insert(
                min_len,
                LodLevel {
                    path: resolve_path(index_path, path),
                    alignment: None,
                },
            );
        }
        let manager = LodManager {
            levels,
            options: *options,
            coarsest_with_dna: 0,
        };
        manager.check_levels(index_path)?;
        info!("loaded {} levels of detail from {index_path}", manager.levels.len());
        Ok(manager)
    }

    /// Wrap a single alignment file as a one-entry, finest-level map.
    pub fn load_single_level(hal_path: &str, options: &OpenOptions) -> Result<LodManager> {
        let mut levels = BTreeMap::new();
        levels.insert(
            0,
            LodLevel {
                path: hal_path.to_string(),
                alignment: None,
            },
        );
        Ok(LodManager {
            levels,
            options: *options,
            coarsest_with_dna: 0,
        })
    }

    fn check_levels(&self, index_path: &str) -> Result<()> {
        if self.levels.is_empty() {
            return Err(HalError::BadFormat(format!(
                "no entries were found in {index_path}"
            )));
        }
        if !self.levels.contains_key(&0) {
            return Err(HalError::BadFormat(format!(
                "no alignment with range value 0 found in {index_path}; a record of the form \
                 \"0 pathToFinestFile\" must be present"
            )));
        }
        Ok(())
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Pick the coarsest level whose minimum query length does not exceed
    /// `query_length`, opening it on first use. When `need_dna` is set and
    /// the chosen level is known to lack DNA, the finest level is returned
    /// instead.
    pub fn alignment_for(&mut self, query_length: Size, need_dna: bool) -> Result<Alignment> {
        let mut chosen = self.pick(query_length);
        self.ensure_open(chosen)?;
        if need_dna && self.coarsest_with_dna < chosen {
            chosen = 0;
            self.ensure_open(chosen)?;
        }
        Ok(self
            .levels
            .get(&chosen)
            .and_then(|l| l.alignment.clone())
            .expect("level opened above"))
    }

    fn pick(&self, query_length: Size) -> Size {
        *self
            .levels
            .range(..=query_length)
            .next_back()
            .expect("level 0 always present")
            .0
    }

    fn ensure_open(&mut self, min_len: Size) -> Result<()> {
        let level = self.levels.get_mut(&min_len).expect("picked level exists");
        if level.alignment.is_some() {
            return Ok(());
        }
        debug!("lazily opening level {min_len} ({})", level.path);
        let alignment = open_alignment(&level.path, &self.options, AccessMode::ReadOnly, None)?;
        let has_dna = Self::check_alignment(min_len, &level.path, &alignment)?;
        level.alignment = Some(alignment);
        if has_dna {
            self.coarsest_with_dna = self.coarsest_with_dna.max(min_len);
        }
        Ok(())
    }

    /// Sanity checks mirrored on every lazy open: a level must hold
    /// genomes, and the finest level must hold DNA. Returns whether any
    /// genome carries a DNA array (breadth-first walk from the root).
    fn check_alignment(min_len: Size, path: &str, alignment: &Alignment) -> Result<bool> {
        if alignment.num_genomes() == 0 {
            return Err(HalError::CorruptAlignment(format!(
                "no genomes found in alignment {path}"
            )));
        }
        let mut queue = std::collections::VecDeque::new();
        if let Some(root) = alignment.root_name() {
            queue.push_back(root);
        }
        let mut dna_found = false;
        while let Some(name) = queue.pop_front() {
            let genome = alignment.open_genome(&name)?;
            if genome.contains_dna_array() {
                dna_found = true;
                break;
            }
            for child in alignment.child_names(&name)? {
                queue.push_back(child);
            }
        }
        if !dna_found && min_len == 0 {
            return Err(HalError::BadFormat(format!(
                "alignment for the finest level of detail (0) in {path} must contain DNA \
                 sequence information"
            )));
        }
        Ok(dna_found)
    }
}

/// Absolute paths and URLs pass through; anything else resolves against
/// the index file's directory.
fn resolve_path(index_path: &str, hal_path: &str) -> String {
    if is_url(hal_path) || Path::new(hal_path).is_absolute() {
        return hal_path.to_string();
    }
    match Path::new(index_path).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            dir.join(hal_path).to_string_lossy().into_owned()
        }
        _ => hal_path.to_string(),
    }
}
