//! Read-only scanners over a completed campaign's artifact directories.
//! Nothing here mutates the layout; every tool can be re-run at any time
//! after the run loop has finished.

use anyhow::{Context, Result};
use faultline_core::{injected_faults_file, ArtifactLayout, INSTRUMENT_PREFIX};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

fn parse_error_file_name(name: &str) -> Option<(usize, u64)> {
    let rest = name.strip_prefix("errorfile-run-")?;
    let (group, run) = rest.split_once('-')?;
    Some((group.parse().ok()?, run.parse().ok()?))
}

fn parse_stat_file_name(name: &str) -> Option<(usize, u64)> {
    let rest = name.strip_prefix(INSTRUMENT_PREFIX)?;
    let rest = rest.strip_prefix(".stat.fi.injectedfaults.")?;
    let rest = rest.strip_suffix(".txt")?;
    let (group, run) = rest.split_once('-')?;
    Some((group.parse().ok()?, run.parse().ok()?))
}

/// Trailing `return code <n>` of an error record's first line, if any. A
/// record without one is a hang.
fn extract_return_code(content: &str) -> Option<String> {
    let line = content.lines().next()?;
    let idx = line.rfind("return code ")?;
    let code = line[idx + "return code ".len()..].trim();
    code.parse::<i64>().ok().map(|c| c.to_string())
}

/// Derives per-group run counts from the statistics directory filenames:
/// the highest run index seen for a group, adjusted for zero-indexing.
pub fn group_run_counts(root: &Path) -> Result<Vec<u64>> {
    let layout = ArtifactLayout::new(root);
    let entries = fs::read_dir(&layout.stat_dir)
        .with_context(|| format!("no statistics directory under {}", root.display()))?;
    let mut counts: BTreeMap<usize, u64> = BTreeMap::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some((group, run)) = parse_stat_file_name(&name) {
            let seen = counts.entry(group).or_default();
            *seen = (*seen).max(run + 1);
        }
    }
    let groups = counts.keys().copied().max().map(|g| g + 1).unwrap_or(0);
    let mut runs = vec![0u64; groups];
    for (group, count) in counts {
        runs[group] = count;
    }
    Ok(runs)
}

/// Per-group return-code histogram reconstructed from the artifact tree.
/// Every group's `0` bucket starts at its run count and loses one per error
/// record found, so the totals always sum back to the run count.
pub fn code_summary(root: &Path) -> Result<Vec<BTreeMap<String, u64>>> {
    let layout = ArtifactLayout::new(root);
    let runs = group_run_counts(root)?;
    let mut codes: Vec<BTreeMap<String, u64>> = runs
        .iter()
        .map(|n| {
            let mut counts = BTreeMap::new();
            counts.insert("0".to_string(), *n);
            counts
        })
        .collect();

    let entries = fs::read_dir(&layout.error_dir)
        .with_context(|| format!("no error directory under {}", root.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some((group, _run)) = parse_error_file_name(&name) else {
            continue;
        };
        if group >= codes.len() {
            codes.resize_with(group + 1, BTreeMap::new);
        }
        let content = fs::read_to_string(entry.path())?;
        let code = extract_return_code(&content).unwrap_or_else(|| "TO".to_string());
        *codes[group].entry(code).or_default() += 1;
        let zero = codes[group].entry("0".to_string()).or_default();
        *zero = zero.saturating_sub(1);
    }
    Ok(codes)
}

/// All runs of a group whose error record names the given return code,
/// numerically sorted.
pub fn error_run_ids(root: &Path, group: usize, code: i64) -> Result<Vec<u64>> {
    let layout = ArtifactLayout::new(root);
    let needle = format!("return code {}", code);
    let entries = fs::read_dir(&layout.error_dir)
        .with_context(|| format!("no error directory under {}", root.display()))?;
    let mut ids = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some((g, run)) = parse_error_file_name(&name) else {
            continue;
        };
        if g != group {
            continue;
        }
        let content = fs::read_to_string(entry.path())?;
        if content
            .lines()
            .next()
            .unwrap_or("")
            .trim_end()
            .ends_with(&needle)
        {
            ids.push(run);
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// The fault configuration a specific run executed under, parsed back out of
/// its injected-fault statistics file: space-separated `key=value` tokens,
/// optionally comma-terminated.
pub fn run_config(root: &Path, group: usize, run: u64) -> Result<BTreeMap<String, String>> {
    let layout = ArtifactLayout::new(root);
    let path = layout.stat_dir.join(injected_faults_file(group, run));
    let data = fs::read_to_string(&path)
        .with_context(|| format!("no statistics file for run {}-{}", group, run))?;
    Ok(parse_config_tokens(&data))
}

fn parse_config_tokens(data: &str) -> BTreeMap<String, String> {
    let mut config = BTreeMap::new();
    for token in data.split_whitespace() {
        let token = token.trim_end_matches(',');
        let Some((key, value)) = token.split_once('=') else {
            continue;
        };
        if key.is_empty() || value.is_empty() || !is_word(key) || !is_word(value) {
            continue;
        }
        config.insert(key.to_string(), value.to_string());
    }
    config
}

fn is_word(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[derive(Debug, Clone)]
pub struct ReconstructedConfig {
    pub run: u64,
    pub values: BTreeMap<String, String>,
}

/// The first `limit` reconstructed configurations for runs of `group` that
/// exited with `code`. Runs whose statistics file is missing are skipped.
pub fn reconstruct_configs(
    root: &Path,
    group: usize,
    code: i64,
    limit: usize,
) -> Result<Vec<ReconstructedConfig>> {
    let ids = error_run_ids(root, group, code)?;
    let mut configs = Vec::new();
    for run in ids {
        if configs.len() >= limit {
            break;
        }
        match run_config(root, group, run) {
            Ok(values) => configs.push(ReconstructedConfig { run, values }),
            Err(e) => warn!("skipping run {}-{}: {}", group, run, e),
        }
    }
    Ok(configs)
}

/// Renders configurations as `key=value` blocks separated by blank lines,
/// ready to be pasted back into a campaign schema.
pub fn format_configs(configs: &[ReconstructedConfig]) -> String {
    configs
        .iter()
        .map(|config| {
            config
                .values
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use faultline_core::ensure_dir;
    use std::path::PathBuf;

    fn temp_root(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "faultline_analysis_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("temp dir");
        dir
    }

    fn seed_campaign(root: &Path) -> ArtifactLayout {
        let layout = ArtifactLayout::new(root);
        layout.create().expect("layout");

        // Group 0: three runs, one segfault, one self-terminated.
        for run in 0..3u64 {
            fs::write(
                layout.stat_dir.join(injected_faults_file(0, run)),
                format!("fi_cycle=1{}, fi_type=bitflip fi_bit=2\n", run),
            )
            .expect("stat file");
        }
        fs::write(
            layout.error_file("0-1"),
            "Program crashed, terminated by the system, return code -11\n",
        )
        .expect("error file");
        fs::write(
            layout.error_file("0-2"),
            "Program crashed, terminated by itself, return code 1\n",
        )
        .expect("error file");

        // Group 1: two runs, one hang.
        for run in 0..2u64 {
            fs::write(
                layout.stat_dir.join(injected_faults_file(1, run)),
                "fi_rate=50\n",
            )
            .expect("stat file");
        }
        fs::write(layout.error_file("1-0"), "Program hang\n").expect("error file");

        layout
    }

    #[test]
    fn run_counts_derive_from_stat_filenames() {
        let root = temp_root("counts");
        seed_campaign(&root);
        assert_eq!(group_run_counts(&root).expect("counts"), vec![3, 2]);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn code_summary_buckets_sum_to_run_counts() {
        let root = temp_root("summary");
        seed_campaign(&root);
        let codes = code_summary(&root).expect("summary");
        assert_eq!(codes.len(), 2);

        assert_eq!(codes[0].get("0"), Some(&1));
        assert_eq!(codes[0].get("-11"), Some(&1));
        assert_eq!(codes[0].get("1"), Some(&1));
        assert_eq!(codes[0].values().sum::<u64>(), 3);

        assert_eq!(codes[1].get("0"), Some(&1));
        assert_eq!(codes[1].get("TO"), Some(&1));
        assert_eq!(codes[1].values().sum::<u64>(), 2);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn error_run_ids_filter_by_group_and_code() {
        let root = temp_root("ids");
        let layout = seed_campaign(&root);
        fs::write(
            layout.error_file("0-10"),
            "Program crashed, terminated by the system, return code -11\n",
        )
        .expect("extra error file");

        assert_eq!(
            error_run_ids(&root, 0, -11).expect("ids"),
            vec![1, 10],
            "numerically sorted"
        );
        assert_eq!(error_run_ids(&root, 0, 1).expect("ids"), vec![2]);
        assert_eq!(error_run_ids(&root, 1, -11).expect("ids"), Vec::<u64>::new());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn longer_codes_do_not_suffix_match() {
        let root = temp_root("suffix");
        let layout = ArtifactLayout::new(&root);
        layout.create().expect("layout");
        fs::write(
            layout.error_file("0-0"),
            "Program crashed, terminated by the system, return code -111\n",
        )
        .expect("error file");
        assert_eq!(error_run_ids(&root, 0, -11).expect("ids"), Vec::<u64>::new());
        assert_eq!(error_run_ids(&root, 0, -111).expect("ids"), vec![0]);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn run_config_parses_tokens_with_trailing_commas() {
        let root = temp_root("config");
        seed_campaign(&root);
        let config = run_config(&root, 0, 1).expect("config");
        assert_eq!(config.get("fi_cycle"), Some(&"11".to_string()));
        assert_eq!(config.get("fi_type"), Some(&"bitflip".to_string()));
        assert_eq!(config.get("fi_bit"), Some(&"2".to_string()));
        assert_eq!(config.len(), 3);

        assert!(run_config(&root, 0, 99).is_err(), "missing stat file");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn reconstruct_configs_honors_limit_and_formats_blocks() {
        let root = temp_root("blocks");
        seed_campaign(&root);
        let configs = reconstruct_configs(&root, 0, -11, 5).expect("configs");
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].run, 1);

        let rendered = format_configs(&configs);
        assert!(rendered.contains("fi_cycle=11"), "{}", rendered);
        assert!(!rendered.contains("\n\n"), "single block has no separator");

        let both = vec![
            configs[0].clone(),
            ReconstructedConfig {
                run: 4,
                values: BTreeMap::from([("fi_rate".to_string(), "50".to_string())]),
            },
        ];
        let rendered = format_configs(&both);
        assert_eq!(rendered.matches("\n\n").count(), 1);

        let none = reconstruct_configs(&root, 0, -11, 0).expect("limit 0");
        assert!(none.is_empty());
        let _ = fs::remove_dir_all(root);
    }
}
