//! External process boundaries
//!
//! The whole-brain preprocessing container and the classifier run outside
//! this crate. Both sit behind traits ([`Preprocessor`], [`Scorer`]) so the
//! pipeline can be driven with fakes in tests.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::selection::Scorer;

/// Container image used for preprocessing
pub const FMRIPREP_IMAGE: &str = "nipreps/fmriprep:25.0.0";

/// Template space requested from the preprocessing step
pub const OUTPUT_SPACE: &str = "MNI152NLin2009cAsym";

/// A preprocessed BOLD run and its confound table
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreprocessedInputs {
    /// Preprocessed 4D BOLD volume
    pub bold: PathBuf,
    /// Matching confounds .tsv
    pub confounds: PathBuf,
}

/// Turns a raw BIDS dataset into preprocessed inputs
pub trait Preprocessor {
    /// Preprocess `bids_dir`, writing intermediate output under `work_dir`
    fn preprocess(&self, bids_dir: &Path, work_dir: &Path) -> Result<PreprocessedInputs>;
}

//=============================================================================
// File discovery
//=============================================================================

/// Shell-style match where `*` stands for any run of characters
fn wildcard_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }

    let (first, last) = (parts[0], parts[parts.len() - 1]);
    if !name.starts_with(first) || name.len() < first.len() + last.len() || !name.ends_with(last) {
        return false;
    }
    let mut rest = &name[first.len()..name.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}

/// Files directly inside `dir` whose name matches `pattern`, sorted
fn find_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?.flatten() {
        let path = entry.path();
        let matches = path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| wildcard_match(pattern, n));
        if matches && path.is_file() {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// Files anywhere below `root` whose name matches `pattern`, sorted
fn find_files_recursive(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in fs::read_dir(&dir).map_err(|e| PipelineError::io(&dir, e))?.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| wildcard_match(pattern, n))
            {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

/// Locate the BOLD volume and confound table inside a preprocessed directory
///
/// Picks the first (by name) `*preproc_bold.nii.gz` and
/// `*confounds_timeseries.tsv` directly inside `dir`.
pub fn locate_preprocessed(dir: &Path) -> Result<PreprocessedInputs> {
    if !dir.is_dir() {
        return Err(PipelineError::MissingInput { what: "preprocessed directory", path: dir.to_path_buf() });
    }
    let bold = find_files(dir, "*preproc_bold.nii.gz")?
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::MissingInput { what: "BOLD volume", path: dir.join("*preproc_bold.nii.gz") })?;
    let confounds = find_files(dir, "*confounds_timeseries.tsv")?
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::MissingInput {
            what: "confound table",
            path: dir.join("*confounds_timeseries.tsv"),
        })?;
    debug!("Preprocessed inputs: {} / {}", bold.display(), confounds.display());
    Ok(PreprocessedInputs { bold, confounds })
}

//=============================================================================
// fMRIPrep container
//=============================================================================

/// fMRIPrep run through `docker run`
#[derive(Clone, Debug)]
pub struct FmriprepDocker {
    /// Container runtime executable
    pub docker: String,
    /// Image tag
    pub image: String,
    /// FreeSurfer license file on the host
    pub license: PathBuf,
    /// BIDS participant label without the `sub-` prefix
    pub subject: String,
    /// Threads granted to the container
    pub nthreads: usize,
    /// Memory limit in MB
    pub mem_mb: usize,
}

impl FmriprepDocker {
    /// Default runtime settings for a license file and subject
    pub fn new(license: impl Into<PathBuf>, subject: impl Into<String>) -> Self {
        Self {
            docker: "docker".to_string(),
            image: FMRIPREP_IMAGE.to_string(),
            license: license.into(),
            subject: subject.into(),
            nthreads: 2,
            mem_mb: 10000,
        }
    }

    /// Arguments passed to the container runtime
    pub fn command_args(&self, bids_dir: &Path, out_dir: &Path) -> Vec<String> {
        let license_mount = "/opt/freesurfer/license.txt";
        vec![
            "run".into(), "--rm".into(),
            "--platform".into(), "linux/amd64".into(),
            "-e".into(), "KMP_AFFINITY=disabled".into(),
            "-v".into(), format!("{}:/data:ro", bids_dir.display()),
            "-v".into(), format!("{}:/out", out_dir.display()),
            "-v".into(), format!("{}:{}", self.license.display(), license_mount),
            self.image.clone(), "/data".into(), "/out".into(), "participant".into(),
            "--fs-license-file".into(), license_mount.into(),
            "--output-spaces".into(), OUTPUT_SPACE.into(),
            "--skip-bids-validation".into(),
            "--nthreads".into(), self.nthreads.to_string(),
            "--mem_mb".into(), self.mem_mb.to_string(),
        ]
    }

    /// Find the subject's outputs below the fMRIPrep output tree and copy
    /// them into `clean_dir`
    pub fn collect_outputs(&self, fmriprep_dir: &Path, clean_dir: &Path) -> Result<PreprocessedInputs> {
        fs::create_dir_all(clean_dir).map_err(|e| PipelineError::io(clean_dir, e))?;

        let patterns = [
            format!("sub-{}*_desc-confounds_timeseries.tsv", self.subject),
            format!("sub-{}*_space-{}_desc-preproc_bold.nii.gz", self.subject, OUTPUT_SPACE),
        ];
        for pattern in &patterns {
            let matches = if fmriprep_dir.is_dir() {
                find_files_recursive(fmriprep_dir, pattern)?
            } else {
                Vec::new()
            };
            if matches.is_empty() {
                return Err(PipelineError::Preprocessing(format!(
                    "no file matching '{}' in {}", pattern, fmriprep_dir.display()
                )));
            }
            for src in matches {
                if let Some(name) = src.file_name() {
                    let dst = clean_dir.join(name);
                    fs::copy(&src, &dst).map_err(|e| PipelineError::io(&dst, e))?;
                    debug!("Copied {}", dst.display());
                }
            }
        }

        locate_preprocessed(clean_dir)
    }
}

impl Preprocessor for FmriprepDocker {
    fn preprocess(&self, bids_dir: &Path, work_dir: &Path) -> Result<PreprocessedInputs> {
        if !bids_dir.is_dir() {
            return Err(PipelineError::MissingInput { what: "BIDS directory", path: bids_dir.to_path_buf() });
        }
        if !self.license.is_file() {
            return Err(PipelineError::MissingInput { what: "FreeSurfer license", path: self.license.clone() });
        }
        fs::create_dir_all(work_dir).map_err(|e| PipelineError::io(work_dir, e))?;

        let bids_dir = fs::canonicalize(bids_dir).map_err(|e| PipelineError::io(bids_dir, e))?;
        let work_dir = fs::canonicalize(work_dir).map_err(|e| PipelineError::io(work_dir, e))?;
        let args = self.command_args(&bids_dir, &work_dir);

        info!("Running {} for subject {}", self.image, self.subject);
        debug!("{} {}", self.docker, args.join(" "));
        let output = Command::new(&self.docker)
            .args(&args)
            .output()
            .map_err(|e| PipelineError::Preprocessing(format!("spawn {}: {}", self.docker, e)))?;

        if !output.status.success() {
            return Err(PipelineError::Preprocessing(format!(
                "{} exited with {}: {}",
                self.image,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!("Preprocessing finished");

        self.collect_outputs(&work_dir.join("fmriprep"), &work_dir.join("preproc_clean"))
    }
}

//=============================================================================
// Process scorer
//=============================================================================

/// Scorer backed by a child process speaking JSON over stdin/stdout
///
/// The prepared feature vector is written as a JSON array of numbers; the
/// child must print a JSON array of class probabilities.
#[derive(Clone, Debug)]
pub struct CommandScorer {
    /// Executable to run
    pub program: String,
    /// Arguments passed to it
    pub args: Vec<String>,
}

impl CommandScorer {
    /// Scorer running `program` with `args`
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self { program: program.into(), args }
    }
}

impl Scorer for CommandScorer {
    fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>> {
        let payload = serde_json::to_vec(features)
            .map_err(|e| PipelineError::Scorer(format!("encode features: {}", e)))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::Scorer(format!("spawn {}: {}", self.program, e)))?;

        let Some(mut stdin) = child.stdin.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(PipelineError::Scorer("scorer stdin unavailable".to_string()));
        };

        // Feed stdin from its own thread while stdout is drained here
        let writer = thread::spawn(move || stdin.write_all(&payload));
        let output = child.wait_with_output()
            .map_err(|e| PipelineError::Scorer(format!("wait for {}: {}", self.program, e)))?;
        let written = writer.join()
            .map_err(|_| PipelineError::Scorer("stdin writer panicked".to_string()))?;

        if !output.status.success() {
            return Err(PipelineError::Scorer(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        written.map_err(|e| PipelineError::Scorer(format!("write features: {}", e)))?;

        serde_json::from_slice(&output.stdout)
            .map_err(|e| PipelineError::Scorer(format!("parse scorer output: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*preproc_bold.nii.gz", "sub-01_task-rest_desc-preproc_bold.nii.gz"));
        assert!(wildcard_match("sub-01*_desc-confounds_timeseries.tsv", "sub-01_task-rest_desc-confounds_timeseries.tsv"));
        assert!(!wildcard_match("sub-01*_desc-confounds_timeseries.tsv", "sub-02_desc-confounds_timeseries.tsv"));
        assert!(wildcard_match("a*b*c", "axxbyyc"));
        assert!(!wildcard_match("a*b*c", "acb"));
        assert!(!wildcard_match("ab*ba", "aba"));
        assert!(wildcard_match("exact", "exact"));
    }

    #[test]
    fn test_docker_command_line() {
        let runner = FmriprepDocker::new("/lic/license.txt", "01");
        let args = runner.command_args(Path::new("/bids"), Path::new("/work"));
        assert_eq!(args[0], "run");
        assert!(args.contains(&"/bids:/data:ro".to_string()));
        assert!(args.contains(&"/lic/license.txt:/opt/freesurfer/license.txt".to_string()));
        let image = args.iter().position(|a| a == FMRIPREP_IMAGE).unwrap();
        assert_eq!(&args[image + 1..image + 4], &["/data", "/out", "participant"]);
        assert_eq!(args[args.len() - 1], "10000");
    }

    #[test]
    fn test_locate_and_collect() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("fmriprep").join("sub-01").join("func");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("sub-01_task-rest_desc-confounds_timeseries.tsv"), "X\n0\n").unwrap();
        fs::write(nested.join("sub-01_task-rest_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz"), b"").unwrap();
        fs::write(nested.join("sub-01_task-rest_space-T1w_desc-preproc_bold.nii.gz"), b"").unwrap();

        let runner = FmriprepDocker::new("/lic/license.txt", "01");
        let clean = dir.path().join("preproc_clean");
        let inputs = runner.collect_outputs(&dir.path().join("fmriprep"), &clean).unwrap();
        assert_eq!(inputs.bold, clean.join("sub-01_task-rest_space-MNI152NLin2009cAsym_desc-preproc_bold.nii.gz"));
        assert_eq!(inputs.confounds, clean.join("sub-01_task-rest_desc-confounds_timeseries.tsv"));

        let other = FmriprepDocker::new("/lic/license.txt", "02");
        let err = other.collect_outputs(&dir.path().join("fmriprep"), &dir.path().join("x"));
        assert!(matches!(err, Err(PipelineError::Preprocessing(_))));
    }

    #[test]
    fn test_locate_missing_volume() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("run_confounds_timeseries.tsv"), "X\n").unwrap();
        let err = locate_preprocessed(dir.path()).unwrap_err();
        assert!(matches!(err, PipelineError::MissingInput { what: "BOLD volume", .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_scorer_roundtrip() {
        // `cat` echoes the feature array back as "probabilities"
        let scorer = CommandScorer::new("cat", vec![]);
        assert_eq!(scorer.predict_proba(&[0.25, 0.75]).unwrap(), vec![0.25, 0.75]);

        let failing = CommandScorer::new("false", vec![]);
        assert!(matches!(failing.predict_proba(&[1.0]), Err(PipelineError::Scorer(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_scorer_large_output_before_reading() {
        // Child fills its stdout pipe before touching stdin
        let script = "head -c 262144 /dev/zero | tr '\\0' ' '; printf '[0.5]'; cat > /dev/null";
        let scorer = CommandScorer::new("sh", vec!["-c".to_string(), script.to_string()]);
        let features = vec![0.125; 100_000];
        assert_eq!(scorer.predict_proba(&features).unwrap(), vec![0.5]);
    }

    #[cfg(unix)]
    #[test]
    fn test_command_scorer_ignoring_stdin_fails_cleanly() {
        let scorer = CommandScorer::new("true", vec![]);
        let features = vec![1.0; 100_000];
        assert!(matches!(scorer.predict_proba(&features), Err(PipelineError::Scorer(_))));
    }
}
