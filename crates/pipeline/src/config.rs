//! Pipeline configuration structures and loaders.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration shared by the executor, resource gate, and cleanup.
///
/// Every knob can be overridden from the process environment via
/// [`PipelineConfig::from_env`]; the defaults match the ZisK toolchain as
/// the api server invokes it.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Working directory external commands run in.
    pub work_dir: PathBuf,

    /// Directory the terminal proof artifact lands in (relative to `work_dir`
    /// when not absolute).
    pub proof_dir: PathBuf,

    /// Path of the execution-lock record.
    pub lock_path: PathBuf,

    /// Directory holding the toolchain's shared-memory segments.
    pub shm_dir: PathBuf,

    /// Prefix of shared-memory segment names claimed by the toolchain.
    pub shm_prefix: String,

    /// First TCP port the toolchain claims.
    pub base_port: u16,

    /// Number of consecutive ports claimed starting at `base_port`.
    pub port_count: u16,

    /// Maximum time to wait for all resources to be observed free.
    pub resource_wait: Duration,

    /// Interval between resource polls.
    pub resource_poll: Duration,

    /// Maximum time to wait for a step artifact to stabilize.
    pub artifact_wait: Duration,

    /// Interval between artifact size polls.
    pub artifact_poll: Duration,

    /// Consecutive constant-size polls required before an artifact counts
    /// as finished.
    pub stability_checks: u32,

    /// Timeout of the proving step, the longest-running stage.
    pub prove_timeout: Duration,

    /// Process signatures (substring match) killed by cleanup when a
    /// timeout-kill of a step leaves toolchain children behind.
    pub process_signatures: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            proof_dir: PathBuf::from("proof"),
            lock_path: PathBuf::from("/tmp/flappy-prover.lock"),
            shm_dir: PathBuf::from("/dev/shm"),
            shm_prefix: "ZISK".to_string(),
            base_port: 23_100,
            port_count: 4,
            resource_wait: Duration::from_secs(30),
            resource_poll: Duration::from_millis(500),
            artifact_wait: Duration::from_secs(30),
            artifact_poll: Duration::from_millis(250),
            stability_checks: 3,
            prove_timeout: Duration::from_secs(30 * 60),
            process_signatures: vec![
                "cargo-zisk".to_string(),
                "flappy_bird_zisk".to_string(),
            ],
        }
    }
}

impl PipelineConfig {
    /// Construct configuration from process environment variables.
    ///
    /// Environment variables:
    /// - `FLAPPY_WORK_DIR` - Toolchain working directory (default: `.`)
    /// - `FLAPPY_PROOF_DIR` - Proof output directory (default: `proof`)
    /// - `FLAPPY_LOCK_PATH` - Execution lock record path
    /// - `FLAPPY_SHM_DIR` - Shared-memory directory (default: `/dev/shm`)
    /// - `FLAPPY_SHM_PREFIX` - Segment name prefix (default: `ZISK`)
    /// - `FLAPPY_BASE_PORT` - First claimed TCP port (default: 23100)
    /// - `FLAPPY_PORT_COUNT` - Consecutive claimed ports (default: 4)
    /// - `FLAPPY_RESOURCE_WAIT_SECS` - Resource gate timeout (default: 30)
    /// - `FLAPPY_RESOURCE_POLL_MS` - Resource poll interval (default: 500)
    /// - `FLAPPY_ARTIFACT_WAIT_SECS` - Artifact stabilization timeout (default: 30)
    /// - `FLAPPY_ARTIFACT_POLL_MS` - Artifact poll interval (default: 250)
    /// - `FLAPPY_STABILITY_CHECKS` - Constant-size polls required (default: 3)
    /// - `FLAPPY_PROVE_TIMEOUT_SECS` - Proving step timeout (default: 1800)
    /// - `FLAPPY_PROCESS_SIGNATURES` - Comma-separated cleanup kill list
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(dir) = env::var("FLAPPY_WORK_DIR").ok().map(PathBuf::from) {
            config.work_dir = dir;
        }
        if let Some(dir) = env::var("FLAPPY_PROOF_DIR").ok().map(PathBuf::from) {
            config.proof_dir = dir;
        }
        if let Some(path) = env::var("FLAPPY_LOCK_PATH").ok().map(PathBuf::from) {
            config.lock_path = path;
        }
        if let Some(dir) = env::var("FLAPPY_SHM_DIR").ok().map(PathBuf::from) {
            config.shm_dir = dir;
        }
        if let Ok(prefix) = env::var("FLAPPY_SHM_PREFIX") {
            config.shm_prefix = prefix;
        }
        if let Some(port) = read_env::<u16>("FLAPPY_BASE_PORT") {
            config.base_port = port;
        }
        if let Some(count) = read_env::<u16>("FLAPPY_PORT_COUNT") {
            config.port_count = count.max(1);
        }
        if let Some(secs) = read_env::<u64>("FLAPPY_RESOURCE_WAIT_SECS") {
            config.resource_wait = Duration::from_secs(secs);
        }
        if let Some(ms) = read_env::<u64>("FLAPPY_RESOURCE_POLL_MS") {
            config.resource_poll = Duration::from_millis(ms.max(1));
        }
        if let Some(secs) = read_env::<u64>("FLAPPY_ARTIFACT_WAIT_SECS") {
            config.artifact_wait = Duration::from_secs(secs);
        }
        if let Some(ms) = read_env::<u64>("FLAPPY_ARTIFACT_POLL_MS") {
            config.artifact_poll = Duration::from_millis(ms.max(1));
        }
        if let Some(checks) = read_env::<u32>("FLAPPY_STABILITY_CHECKS") {
            config.stability_checks = checks.max(1);
        }
        if let Some(secs) = read_env::<u64>("FLAPPY_PROVE_TIMEOUT_SECS") {
            config.prove_timeout = Duration::from_secs(secs);
        }
        if let Ok(signatures) = env::var("FLAPPY_PROCESS_SIGNATURES") {
            config.process_signatures = signatures
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }

        config
    }

    /// Absolute path of the terminal proof artifact.
    pub fn final_proof_path(&self) -> PathBuf {
        if self.proof_dir.is_absolute() {
            self.proof_dir.join("final.bin")
        } else {
            self.work_dir.join(&self.proof_dir).join("final.bin")
        }
    }
}

fn read_env<T>(key: &str) -> Option<T>
where
    T: std::str::FromStr,
{
    env::var(key).ok()?.parse().ok()
}
