//! Pipeline step descriptors.
//!
//! A step is a named external command with a timeout, an optional set of
//! artifacts it must produce, and a policy for whether its failure aborts
//! the run. The fatal/non-fatal policy is data on the descriptor, not
//! control flow in the executor, so planners can tune it per host.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::PipelineConfig;

/// An output file a step must produce, verified for stabilization after the
/// step's process exits.
#[derive(Debug, Clone)]
pub struct ArtifactSpec {
    pub path: PathBuf,
    pub min_size: u64,
}

impl ArtifactSpec {
    pub fn new(path: impl Into<PathBuf>, min_size: u64) -> Self {
        Self {
            path: path.into(),
            min_size,
        }
    }
}

/// Descriptor for one external command in the proof pipeline.
///
/// Stateless and reusable across runs; ownership stays with the plan that
/// built it.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub artifacts: Vec<ArtifactSpec>,
    /// Abort the remaining sequence when this step fails. Non-fatal steps
    /// cover toolchain stages known to be unsupported on some hosts.
    pub fatal: bool,
    /// Exit codes treated as success. The ZisK guest signals successful
    /// completion with exit code 1, so its step accepts both 0 and 1.
    pub success_codes: Vec<i32>,
}

impl StepSpec {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(60),
            artifacts: Vec::new(),
            fatal: true,
            success_codes: vec![0],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn artifact(mut self, path: impl Into<PathBuf>, min_size: u64) -> Self {
        self.artifacts.push(ArtifactSpec::new(path, min_size));
        self
    }

    pub fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }

    pub fn success_codes(mut self, codes: impl IntoIterator<Item = i32>) -> Self {
        self.success_codes = codes.into_iter().collect();
        self
    }
}

/// Input triple the pipeline proves a score for.
#[derive(Debug, Clone)]
pub struct ProofRequest {
    pub player_id: String,
    pub score: u32,
    pub difficulty: u8,
}

/// The fixed ZisK step sequence for one score submission.
///
/// Mirrors the toolchain invocation order of the original api server:
/// build, ROM setup, input generation, guest execution, proving,
/// verification. `rom-setup` and `verify` are tolerated failures: the
/// former is unsupported on non-Linux hosts, the latter is a sanity pass
/// over a proof that already exists.
pub fn zisk_steps(config: &PipelineConfig, request: &ProofRequest) -> Vec<StepSpec> {
    let elf = config
        .work_dir
        .join("target/riscv64ima-zisk-zkvm-elf/release/flappy_bird_zisk");
    let input = config.work_dir.join("input.bin");
    let final_proof = config.final_proof_path();

    vec![
        StepSpec::new("build", "cargo-zisk")
            .args(["build", "--release"])
            .timeout(Duration::from_secs(600)),
        StepSpec::new("rom-setup", "cargo-zisk")
            .args(["rom-setup", "-e"])
            .arg(elf.display().to_string())
            .timeout(Duration::from_secs(300))
            .non_fatal(),
        StepSpec::new("input", "cargo")
            .args(["run", "--release", "--bin", "input_generator"])
            .arg(&request.player_id)
            .arg(request.score.to_string())
            .arg(request.difficulty.to_string())
            .timeout(Duration::from_secs(30))
            // [player_id_len][player_id][score: u32][difficulty: u8]
            .artifact(&input, 6),
        StepSpec::new("execute", "./target/release/flappy_bird_zisk")
            .timeout(Duration::from_secs(30))
            .success_codes([0, 1]),
        StepSpec::new("prove", "cargo-zisk")
            .arg("prove")
            .args(["-e", &elf.display().to_string()])
            .args(["-i", &input.display().to_string()])
            .args(["-o", &config.proof_dir.display().to_string()])
            .timeout(config.prove_timeout)
            .artifact(&final_proof, 1),
        StepSpec::new("verify", "cargo-zisk")
            .arg("verify")
            .args(["-p", &final_proof.display().to_string()])
            .timeout(Duration::from_secs(120))
            .non_fatal(),
    ]
}
