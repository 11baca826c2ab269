use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use faultline_core::{
    atomic_write_bytes, injected_faults_file, sha256_file, ArtifactLayout, FI_CONFIG_FILE,
    INSTRUMENT_PREFIX, PROFILE_STAT_FILE,
};
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const DEFAULT_TIMEOUT_SECS: u64 = 500;

#[derive(Debug, Deserialize)]
pub struct CampaignSchema {
    #[serde(rename = "runOption")]
    pub run_option: Vec<GroupEntry>,
    #[serde(rename = "kernelOption", default)]
    pub kernel_option: Vec<String>,
    #[serde(rename = "timeOut")]
    pub time_out: Option<i64>,
    #[serde(rename = "faultCountPolicy")]
    pub fault_count_policy: Option<FaultCountPolicy>,
}

#[derive(Debug, Deserialize)]
pub struct GroupEntry {
    pub run: GroupSpec,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupSpec {
    #[serde(rename = "numOfRuns")]
    pub num_of_runs: Option<i64>,
    pub fi_type: Option<String>,
    pub fi_cycle: Option<i64>,
    pub fi_index: Option<i64>,
    pub fi_rate: Option<i64>,
    pub fi_reg_index: Option<i64>,
    pub fi_bit: Option<i64>,
    #[serde(default)]
    pub verbose: bool,
}

/// How to average per-run injected-fault counts when some runs never wrote a
/// statistics file (a run that injects zero faults leaves none behind).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaultCountPolicy {
    /// Absent files count as zero faults; divide by the configured run count.
    #[default]
    Zero,
    /// Average only over the files actually present.
    Exclude,
}

pub fn load_campaign_schema(path: &Path) -> Result<CampaignSchema> {
    let raw = fs::read_to_string(path)
        .map_err(|_| anyhow!("no campaign schema at {}", path.display()))?;
    let schema: CampaignSchema = serde_yaml::from_str(&raw).map_err(|e| {
        anyhow!(
            "campaign schema {} is not valid (reminder: use spaces, not tabs): {}",
            path.display(),
            e
        )
    })?;
    if schema.run_option.is_empty() {
        bail!("campaign schema must include at least one runOption group");
    }
    Ok(schema)
}

#[derive(Debug, Clone)]
pub struct CampaignOptions {
    pub timeout_secs: u64,
    pub force_run: bool,
    pub fault_count_policy: FaultCountPolicy,
}

impl CampaignOptions {
    pub fn from_schema(schema: &CampaignSchema) -> Result<CampaignOptions> {
        let timeout_secs = match schema.time_out {
            Some(t) if t > 0 => t as u64,
            Some(t) => bail!("timeOut must be greater than 0 (got {})", t),
            None => DEFAULT_TIMEOUT_SECS,
        };
        Ok(CampaignOptions {
            timeout_secs,
            force_run: schema.kernel_option.iter().any(|o| o == "forceRun"),
            fault_count_policy: schema.fault_count_policy.unwrap_or_default(),
        })
    }
}

/// Where the runtime library injects. Exactly one selector is active per
/// group; `Unset` means every run samples a fresh random cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSelector {
    Cycle(u64),
    Index(u64),
    Rate(u64),
    Unset,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("numOfRuns is required for every runOption group")]
    MissingRunCount,
    #[error("numOfRuns must be greater than 0 (got {0})")]
    NonPositiveRunCount(i64),
    #[error("{field} must be greater than or equal to 0 (got {value})")]
    NegativeField { field: &'static str, value: i64 },
    #[error("at most one of fi_cycle, fi_index and fi_rate may be configured per group")]
    ConflictingSelectors,
    #[error("fi_cycle must be less than or equal to {total} (got {cycle})")]
    CycleOutOfRange { cycle: u64, total: u64 },
}

#[derive(Debug, Clone)]
pub struct ResolvedGroup {
    pub num_of_runs: u64,
    pub selector: FaultSelector,
    pub fi_type: Option<String>,
    pub fi_reg_index: Option<u64>,
    pub fi_bit: Option<u64>,
    pub verbose: bool,
}

fn non_negative(
    field: &'static str,
    value: Option<i64>,
) -> Result<Option<u64>, ValidationError> {
    match value {
        None => Ok(None),
        Some(v) if v >= 0 => Ok(Some(v as u64)),
        Some(v) => Err(ValidationError::NegativeField { field, value: v }),
    }
}

pub fn resolve_group(
    spec: &GroupSpec,
    total_cycles: u64,
) -> Result<ResolvedGroup, ValidationError> {
    let runs = spec.num_of_runs.ok_or(ValidationError::MissingRunCount)?;
    if runs <= 0 {
        return Err(ValidationError::NonPositiveRunCount(runs));
    }

    let cycle = non_negative("fi_cycle", spec.fi_cycle)?;
    let index = non_negative("fi_index", spec.fi_index)?;
    let rate = non_negative("fi_rate", spec.fi_rate)?;
    let selector = match (cycle, index, rate) {
        (Some(c), None, None) => {
            if c > total_cycles {
                return Err(ValidationError::CycleOutOfRange {
                    cycle: c,
                    total: total_cycles,
                });
            }
            FaultSelector::Cycle(c)
        }
        (None, Some(i), None) => FaultSelector::Index(i),
        (None, None, Some(r)) => FaultSelector::Rate(r),
        (None, None, None) => FaultSelector::Unset,
        _ => return Err(ValidationError::ConflictingSelectors),
    };

    Ok(ResolvedGroup {
        num_of_runs: runs as u64,
        selector,
        fi_type: spec.fi_type.clone(),
        fi_reg_index: non_negative("fi_reg_index", spec.fi_reg_index)?,
        fi_bit: non_negative("fi_bit", spec.fi_bit)?,
        verbose: spec.verbose,
    })
}

#[derive(Debug, Clone)]
pub struct RedundantInjection {
    pub reason: String,
}

/// Heuristic check for configurations where every run of the group would hit
/// the same dynamic location and bit. The caller decides whether to prompt,
/// allow, or abort.
pub fn redundancy_warning(group: &ResolvedGroup) -> Option<RedundantInjection> {
    if group.num_of_runs <= 1 || group.fi_bit.is_none() {
        return None;
    }
    match group.selector {
        FaultSelector::Cycle(_) | FaultSelector::Index(_) => Some(RedundantInjection {
            reason: "injecting into the same cycle(index) and bit multiple times is redundant \
                     as it would yield the same result"
                .to_string(),
        }),
        _ => None,
    }
}

/// Parses the total dynamic cycle count out of the profiling report: the
/// first non-empty line starting with 't', of the form `label=integer`.
pub fn read_total_cycles(path: &Path) -> Result<u64> {
    let data = fs::read_to_string(path).map_err(|_| {
        anyhow!(
            "missing profiling report {} (run the profiling pass first)",
            path.display()
        )
    })?;
    for line in data.lines() {
        let line = line.trim();
        if line.is_empty() || !line.starts_with('t') {
            continue;
        }
        let (_, value) = line
            .split_once('=')
            .ok_or_else(|| anyhow!("malformed total-cycle line in {}: {}", path.display(), line))?;
        let total: u64 = value.trim().parse().map_err(|_| {
            anyhow!(
                "total cycle count is not an integer in {}: {}",
                path.display(),
                value.trim()
            )
        })?;
        if total == 0 {
            bail!("total cycle count in {} must be greater than 0", path.display());
        }
        return Ok(total);
    }
    Err(anyhow!("no total-cycle line found in {}", path.display()))
}

/// Overwrites the well-known configuration file the runtime library reads at
/// target startup. This file is the sole channel of influence over the
/// injected fault.
pub fn write_fault_config(
    path: &Path,
    selector: FaultSelector,
    group: &ResolvedGroup,
) -> Result<()> {
    let mut out = String::new();
    match selector {
        FaultSelector::Cycle(n) => out.push_str(&format!("fi_cycle={}\n", n)),
        FaultSelector::Index(n) => out.push_str(&format!("fi_index={}\n", n)),
        FaultSelector::Rate(n) => out.push_str(&format!("fi_rate={}\n", n)),
        FaultSelector::Unset => {}
    }
    if let Some(t) = &group.fi_type {
        out.push_str(&format!("fi_type={}\n", t));
    }
    if let Some(r) = group.fi_reg_index {
        out.push_str(&format!("fi_reg_index={}\n", r));
    }
    if let Some(b) = group.fi_bit {
        out.push_str(&format!("fi_bit={}\n", b));
    }
    fs::write(path, out)
        .with_context(|| format!("writing fault configuration {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitClass {
    Success,
    SelfTerminated(i32),
    SystemTerminated(i32),
    Timeout,
}

impl ExitClass {
    /// RLIMIT_CPU delivers SIGKILL once the hard limit trips, so a SIGKILL
    /// death is the timeout signal.
    pub fn from_status(status: ExitStatus) -> ExitClass {
        if let Some(code) = status.code() {
            if code == 0 {
                ExitClass::Success
            } else {
                ExitClass::SelfTerminated(code)
            }
        } else {
            match status.signal() {
                Some(libc::SIGKILL) => ExitClass::Timeout,
                Some(sig) => ExitClass::SystemTerminated(-sig),
                None => ExitClass::SystemTerminated(-1),
            }
        }
    }

    /// Histogram key: "TO" for a timeout, the signed code otherwise.
    pub fn code_label(&self) -> String {
        match self {
            ExitClass::Success => "0".to_string(),
            ExitClass::SelfTerminated(code) => code.to_string(),
            ExitClass::SystemTerminated(code) => code.to_string(),
            ExitClass::Timeout => "TO".to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExitClass::Success)
    }

    pub fn error_record(&self) -> Option<String> {
        match self {
            ExitClass::Success => None,
            ExitClass::Timeout => Some("Program hang\n".to_string()),
            ExitClass::SystemTerminated(code) => Some(format!(
                "Program crashed, terminated by the system, return code {}\n",
                code
            )),
            ExitClass::SelfTerminated(code) => Some(format!(
                "Program crashed, terminated by itself, return code {}\n",
                code
            )),
        }
    }
}

/// Top-level filename set of the campaign root, taken before each run. The
/// run loop is strictly sequential; the diff against the post-run listing is
/// only meaningful while the directory is quiescent between runs.
#[derive(Debug)]
pub struct DirSnapshot {
    before: BTreeSet<String>,
}

pub fn snapshot_dir(dir: &Path) -> Result<DirSnapshot> {
    let mut before = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        before.insert(entry.file_name().to_string_lossy().to_string());
    }
    Ok(DirSnapshot { before })
}

/// Files every artifact created since `snapshot` under its category
/// directory, tagged with the run id so no later run can claim it. Empty
/// files under the instrumentation prefix are library-init byproducts and
/// are deleted instead.
pub fn collect_artifacts(
    workdir: &Path,
    snapshot: &DirSnapshot,
    run_id: &str,
    layout: &ArtifactLayout,
) -> Result<Vec<PathBuf>> {
    let mut collected = Vec::new();
    for entry in fs::read_dir(workdir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        if snapshot.before.contains(&name) {
            continue;
        }
        let path = entry.path();
        let size = match entry.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("skipping artifact {}: {}", path.display(), e);
                continue;
            }
        };
        if size == 0 && name.starts_with(INSTRUMENT_PREFIX) {
            if let Err(e) = fs::remove_file(&path) {
                warn!("failed to delete empty byproduct {}: {}", path.display(), e);
            }
            continue;
        }
        let renamed = match name.rsplit_once('.') {
            Some((stem, ext)) => format!("{}.{}.{}", stem, run_id, ext),
            None => format!("{}.{}", name, run_id),
        };
        let dest_dir = if name.starts_with(INSTRUMENT_PREFIX) {
            &layout.stat_dir
        } else {
            &layout.output_dir
        };
        let dest = dest_dir.join(&renamed);
        match fs::rename(&path, &dest) {
            Ok(()) => collected.push(dest),
            Err(e) => warn!(
                "failed to move artifact {} to {}: {}",
                path.display(),
                dest.display(),
                e
            ),
        }
    }
    Ok(collected)
}

/// Archived copies of the input files named on the target command line. The
/// archive is populated once at campaign start and is the source of truth
/// for restoring inputs a run consumed or deleted.
#[derive(Debug)]
pub struct InputArchive {
    archive_dir: PathBuf,
    tracked: Vec<String>,
}

impl InputArchive {
    pub fn store(workdir: &Path, args: &[String], archive_dir: &Path) -> Result<InputArchive> {
        let mut tracked = Vec::new();
        for arg in args {
            let src = workdir.join(arg);
            if src.is_file() {
                fs::copy(&src, archive_dir.join(arg))
                    .with_context(|| format!("archiving input file {}", arg))?;
                tracked.push(arg.clone());
            }
        }
        Ok(InputArchive {
            archive_dir: archive_dir.to_path_buf(),
            tracked,
        })
    }

    pub fn replenish(&self, workdir: &Path) -> Result<usize> {
        let mut restored = 0;
        for name in &self.tracked {
            let dest = workdir.join(name);
            if !dest.is_file() {
                fs::copy(self.archive_dir.join(name), &dest)
                    .with_context(|| format!("replenishing input file {}", name))?;
                restored += 1;
            }
        }
        Ok(restored)
    }

    pub fn tracked(&self) -> &[String] {
        &self.tracked
    }
}

#[derive(Debug, Clone)]
pub struct RunContext<'a> {
    pub group_index: usize,
    pub run_index: u64,
    pub target: &'a Path,
    pub args: &'a [String],
    pub workdir: &'a Path,
    pub timeout_secs: u64,
}

impl RunContext<'_> {
    pub fn run_id(&self) -> String {
        format!("{}-{}", self.group_index, self.run_index)
    }
}

#[derive(Debug)]
pub struct RunRecord {
    pub run_id: String,
    pub class: ExitClass,
    pub wall_time: Duration,
    pub stdout_path: PathBuf,
    /// Present only when the run did not succeed.
    pub error_path: Option<PathBuf>,
}

fn cpu_limited(cmd: &mut Command, secs: u64) {
    let limit = libc::rlimit {
        rlim_cur: secs as libc::rlim_t,
        rlim_max: secs as libc::rlim_t,
    };
    // Runs in the child between fork and exec; setrlimit is async-signal-safe.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setrlimit(libc::RLIMIT_CPU, &limit) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

/// One full run: snapshot, spawn under the CPU limit, classify, collect,
/// replenish, log. A crashing or hanging target is a recorded result, never
/// an error from this function.
pub fn execute_run(
    ctx: &RunContext<'_>,
    layout: &ArtifactLayout,
    archive: &InputArchive,
) -> Result<RunRecord> {
    let run_id = ctx.run_id();
    let snapshot = snapshot_dir(ctx.workdir)?;

    let stdout_path = layout.std_output_file(&run_id);
    let stdout = fs::File::create(&stdout_path)
        .with_context(|| format!("creating stdout capture {}", stdout_path.display()))?;

    let mut cmd = Command::new(ctx.target);
    cmd.args(ctx.args);
    cmd.current_dir(ctx.workdir);
    cmd.stdout(Stdio::from(stdout));
    cpu_limited(&mut cmd, ctx.timeout_secs);

    let start = Instant::now();
    let status = cmd
        .spawn()
        .with_context(|| format!("spawning target {}", ctx.target.display()))?
        .wait()?;
    let wall_time = start.elapsed();

    let class = ExitClass::from_status(status);
    collect_artifacts(ctx.workdir, &snapshot, &run_id, layout)?;
    archive.replenish(ctx.workdir)?;

    let mut log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(layout.log_file(&run_id))?;
    writeln!(
        log,
        "code={}, time={:.3}",
        class.code_label(),
        wall_time.as_secs_f64()
    )?;

    let mut error_path = None;
    if let Some(record) = class.error_record() {
        let path = layout.error_file(&run_id);
        fs::write(&path, record)?;
        error_path = Some(path);
    }

    debug!(run = %run_id, code = %class.code_label(), "run finished");
    Ok(RunRecord {
        run_id,
        class,
        wall_time,
        stdout_path,
        error_path,
    })
}

#[derive(Debug, Clone)]
pub struct FaultRateSummary {
    pub fi_rate: u64,
    pub expected: f64,
    pub observed_avg: f64,
}

#[derive(Debug, Clone)]
pub struct GroupSummary {
    pub group_index: usize,
    pub runs: u64,
    pub avg_time_secs: f64,
    pub return_codes: BTreeMap<String, u64>,
    pub verbose: bool,
    pub fault_rate: Option<FaultRateSummary>,
}

#[derive(Debug)]
pub struct CampaignReport {
    pub artifact_root: PathBuf,
    pub groups: Vec<GroupSummary>,
}

#[derive(Debug)]
pub enum ProgressEvent<'a> {
    GroupStarted {
        group: usize,
        runs: u64,
    },
    RunFinished {
        group: usize,
        completed: u64,
        total: u64,
    },
    GroupFinished {
        group: usize,
        summary: &'a GroupSummary,
    },
}

/// Drives every group of the campaign, strictly sequentially: the snapshot
/// diff in the collector requires the campaign root to be quiescent between
/// runs, so exactly one target process is ever in flight.
pub fn run_campaign(
    workdir: &Path,
    target: &Path,
    args: &[String],
    schema: &CampaignSchema,
    confirm_redundant: &mut dyn FnMut(usize, &RedundantInjection) -> bool,
    progress: &mut dyn FnMut(ProgressEvent<'_>),
) -> Result<CampaignReport> {
    let workdir = workdir
        .canonicalize()
        .with_context(|| format!("campaign root {} does not exist", workdir.display()))?;
    let target = target
        .canonicalize()
        .map_err(|_| anyhow!("target executable {} does not exist", target.display()))?;
    let artifact_root = target
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("target executable has no parent directory"))?;
    if artifact_root.parent() != Some(workdir.as_path()) {
        bail!(
            "the campaign must be run from the parent directory of the directory holding {}",
            target.display()
        );
    }

    let options = CampaignOptions::from_schema(schema)?;
    let layout = ArtifactLayout::new(&artifact_root);
    layout.create()?;

    let total_cycles = read_total_cycles(&workdir.join(PROFILE_STAT_FILE))?;
    let args = normalize_args(&workdir, args)?;

    let mut groups = Vec::new();
    for (group_index, entry) in schema.run_option.iter().enumerate() {
        let group = resolve_group(&entry.run, total_cycles)
            .map_err(|e| anyhow!("runOption group {}: {}", group_index, e))?;
        if let Some(warning) = redundancy_warning(&group) {
            if options.force_run {
                info!(group = group_index, "redundant injection allowed by forceRun");
            } else if !confirm_redundant(group_index, &warning) {
                bail!("campaign aborted: {}", warning.reason);
            }
        }
        groups.push(group);
    }

    let archive = InputArchive::store(&workdir, &args, &layout.input_dir)?;
    write_campaign_manifest(&layout, &target, &options, groups.len())?;

    info!(
        groups = groups.len(),
        timeout = options.timeout_secs,
        "starting fault-injection campaign"
    );

    let mut rng = rand::thread_rng();
    let mut summaries = Vec::new();
    for (group_index, group) in groups.iter().enumerate() {
        progress(ProgressEvent::GroupStarted {
            group: group_index,
            runs: group.num_of_runs,
        });
        let mut return_codes: BTreeMap<String, u64> = BTreeMap::new();
        let mut total_time = 0.0f64;

        for run_index in 0..group.num_of_runs {
            let selector = match group.selector {
                FaultSelector::Unset => FaultSelector::Cycle(rng.gen_range(0..total_cycles)),
                s => s,
            };
            write_fault_config(&workdir.join(FI_CONFIG_FILE), selector, group)?;

            let ctx = RunContext {
                group_index,
                run_index,
                target: &target,
                args: &args,
                workdir: &workdir,
                timeout_secs: options.timeout_secs,
            };
            let record = execute_run(&ctx, &layout, &archive)?;
            *return_codes.entry(record.class.code_label()).or_default() += 1;
            total_time += record.wall_time.as_secs_f64();
            progress(ProgressEvent::RunFinished {
                group: group_index,
                completed: run_index + 1,
                total: group.num_of_runs,
            });
        }

        let summary = summarize_group(
            &layout,
            group_index,
            group,
            total_cycles,
            total_time,
            return_codes,
            options.fault_count_policy,
        );
        write_group_summary(&layout, &summary)?;
        progress(ProgressEvent::GroupFinished {
            group: group_index,
            summary: &summary,
        });
        summaries.push(summary);
    }

    Ok(CampaignReport {
        artifact_root,
        groups: summaries,
    })
}

/// Input files must sit directly in the campaign root so the snapshot diff
/// and the replenisher can track them by bare filename.
fn normalize_args(workdir: &Path, args: &[String]) -> Result<Vec<String>> {
    let mut normalized = Vec::with_capacity(args.len());
    for arg in args {
        let candidate = workdir.join(arg);
        if candidate.is_file() {
            let canon = candidate.canonicalize()?;
            if canon.parent() != Some(workdir) {
                bail!("input file {} is not under the campaign root", arg);
            }
            match canon.file_name() {
                Some(name) => normalized.push(name.to_string_lossy().to_string()),
                None => bail!("input file {} has no filename", arg),
            }
        } else {
            normalized.push(arg.clone());
        }
    }
    Ok(normalized)
}

fn write_campaign_manifest(
    layout: &ArtifactLayout,
    target: &Path,
    options: &CampaignOptions,
    group_count: usize,
) -> Result<()> {
    let manifest = json!({
        "schema_version": "campaign_manifest_v1",
        "target": target.display().to_string(),
        "target_digest": sha256_file(target)?,
        "timeout_secs": options.timeout_secs,
        "groups": group_count,
        "created_at": Utc::now().to_rfc3339(),
    });
    atomic_write_bytes(
        &layout.root.join("manifest.json"),
        &serde_json::to_vec_pretty(&manifest)?,
    )
}

fn summarize_group(
    layout: &ArtifactLayout,
    group_index: usize,
    group: &ResolvedGroup,
    total_cycles: u64,
    total_time: f64,
    return_codes: BTreeMap<String, u64>,
    policy: FaultCountPolicy,
) -> GroupSummary {
    let fault_rate = if let FaultSelector::Rate(rate) = group.selector {
        let expected = if rate > 0 {
            total_cycles as f64 / rate as f64
        } else {
            0.0
        };
        let observed_avg =
            observed_fault_average(layout, group_index, group.num_of_runs, policy);
        Some(FaultRateSummary {
            fi_rate: rate,
            expected,
            observed_avg,
        })
    } else {
        None
    };
    GroupSummary {
        group_index,
        runs: group.num_of_runs,
        avg_time_secs: total_time / group.num_of_runs as f64,
        return_codes,
        verbose: group.verbose,
        fault_rate,
    }
}

fn observed_fault_average(
    layout: &ArtifactLayout,
    group: usize,
    runs: u64,
    policy: FaultCountPolicy,
) -> f64 {
    let mut total_lines = 0u64;
    let mut present = 0u64;
    for run in 0..runs {
        let path = layout.stat_dir.join(injected_faults_file(group, run));
        match fs::read_to_string(&path) {
            Ok(data) => {
                present += 1;
                total_lines += data.lines().count() as u64;
            }
            Err(_) => debug!("no injected-fault statistics for run {}-{}", group, run),
        }
    }
    let denominator = match policy {
        FaultCountPolicy::Zero => runs,
        FaultCountPolicy::Exclude => present,
    };
    if denominator == 0 {
        return 0.0;
    }
    total_lines as f64 / denominator as f64
}

fn write_group_summary(layout: &ArtifactLayout, summary: &GroupSummary) -> Result<()> {
    let mut out = String::new();
    out.push_str(&format!("runs: {}\n", summary.runs));
    out.push_str(&format!("avg time: {:.3}\n", summary.avg_time_secs));
    if let Some(rate) = &summary.fault_rate {
        out.push_str(&format!("fi_rate: {}\n", rate.fi_rate));
        out.push_str(&format!("faults expected: {:.3}\n", rate.expected));
        out.push_str(&format!("faults avg: {:.3}\n", rate.observed_avg));
    }
    fs::write(layout.summary_file(summary.group_index), out)?;
    Ok(())
}
