use anyhow::Result;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Filename prefix reserved by the fault-injection runtime library. Every
/// file the instrumented target writes under this prefix is a statistics
/// artifact rather than program output.
pub const INSTRUMENT_PREFIX: &str = "faultline";

/// Per-run configuration file read by the runtime library at target startup.
pub const FI_CONFIG_FILE: &str = "faultline.config.fi.txt";

/// Profiling report produced by the prior profiling pass. Its first line
/// starting with 't' carries the total dynamic cycle count as `label=value`.
pub const PROFILE_STAT_FILE: &str = "faultline.stat.prof.txt";

/// Per-run injected-fault statistics file, one line per injected fault.
pub fn injected_faults_file(group: usize, run: u64) -> String {
    format!(
        "{}.stat.fi.injectedfaults.{}-{}.txt",
        INSTRUMENT_PREFIX, group, run
    )
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

pub fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

pub fn sha256_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(sha256_bytes(&bytes))
}

/// The six category directories every campaign artifact is filed under. The
/// root is the directory holding the instrumented executable; the run loop
/// guarantees that after every run each newly created file ends up in exactly
/// one of these directories.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    pub root: PathBuf,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub error_dir: PathBuf,
    pub std_dir: PathBuf,
    pub log_dir: PathBuf,
    pub stat_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: &Path) -> ArtifactLayout {
        ArtifactLayout {
            root: root.to_path_buf(),
            input_dir: root.join("prog_input"),
            output_dir: root.join("prog_output"),
            error_dir: root.join("error_output"),
            std_dir: root.join("std_output"),
            log_dir: root.join("log_output"),
            stat_dir: root.join("stat_output"),
        }
    }

    pub fn create(&self) -> Result<()> {
        ensure_dir(&self.input_dir)?;
        ensure_dir(&self.output_dir)?;
        ensure_dir(&self.error_dir)?;
        ensure_dir(&self.std_dir)?;
        ensure_dir(&self.log_dir)?;
        ensure_dir(&self.stat_dir)?;
        Ok(())
    }

    pub fn std_output_file(&self, run_id: &str) -> PathBuf {
        self.std_dir.join(format!("std_outputfile-run-{}", run_id))
    }

    pub fn error_file(&self, run_id: &str) -> PathBuf {
        self.error_dir.join(format!("errorfile-run-{}", run_id))
    }

    pub fn log_file(&self, run_id: &str) -> PathBuf {
        self.log_dir.join(format!("logfile-run-{}.txt", run_id))
    }

    pub fn summary_file(&self, group: usize) -> PathBuf {
        self.log_dir.join(format!("summaryfile-run-{}", group))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "faultline_core_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("temp dir");
        dir
    }

    #[test]
    fn injected_faults_file_carries_group_and_run() {
        assert_eq!(
            injected_faults_file(2, 17),
            "faultline.stat.fi.injectedfaults.2-17.txt"
        );
    }

    #[test]
    fn sha256_bytes_is_prefixed_and_stable() {
        let digest = sha256_bytes(b"abc");
        assert!(digest.starts_with("sha256:"));
        assert_eq!(digest, sha256_bytes(b"abc"));
        assert_ne!(digest, sha256_bytes(b"abd"));
    }

    #[test]
    fn atomic_write_replaces_content_and_leaves_no_temp() {
        let root = temp_root("atomic");
        let path = root.join("out.txt");
        atomic_write_bytes(&path, b"first").expect("write");
        atomic_write_bytes(&path, b"second").expect("rewrite");
        assert_eq!(fs::read(&path).expect("read"), b"second");
        let names: Vec<String> = fs::read_dir(&root)
            .expect("list")
            .map(|e| e.expect("entry").file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["out.txt".to_string()]);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn layout_creates_all_category_directories() {
        let root = temp_root("layout");
        let layout = ArtifactLayout::new(&root);
        layout.create().expect("create");
        for dir in [
            &layout.input_dir,
            &layout.output_dir,
            &layout.error_dir,
            &layout.std_dir,
            &layout.log_dir,
            &layout.stat_dir,
        ] {
            assert!(dir.is_dir(), "missing {}", dir.display());
        }
        assert_eq!(
            layout.error_file("0-3"),
            root.join("error_output").join("errorfile-run-0-3")
        );
        assert_eq!(
            layout.log_file("1-0"),
            root.join("log_output").join("logfile-run-1-0.txt")
        );
        assert_eq!(
            layout.summary_file(4),
            root.join("log_output").join("summaryfile-run-4")
        );
        let _ = fs::remove_dir_all(root);
    }
}
