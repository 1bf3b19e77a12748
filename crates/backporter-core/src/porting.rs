//! Container-hosted porting tool: build the image from the assembled
//! workspace, run it, and copy the generated patch back out.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::assembler::BUILD_DEFINITION_FILE;
use crate::config::DEFAULT_FIXMORPH_BASE_IMAGE;
use crate::error::{BackportError, BackportResult, CommandFailure};
use crate::exec::{CommandRunner, CommandSpec, LineSink};
use crate::workspace::Workspace;

pub const DEFAULT_CONTAINER_ENGINE: &str = "docker";
pub const DEFAULT_PLATFORM: &str = "linux/amd64";
pub const DEFAULT_CONFIG_COMMAND: &str = "./configure";
pub const DEFAULT_BUILD_COMMAND: &str = "make";

/// Directory inside the container holding the result.
pub const RESULT_CONTAINER_PATH: &str = "/output";
/// Result file inside [`RESULT_CONTAINER_PATH`].
pub const RESULT_PATCH_FILE: &str = "generated.patch";

/// Number of independently configurable build stages in the recipe.
pub const BUILD_STAGES: usize = 3;
const STAGE_LABELS: [&str; BUILD_STAGES] = ["A", "B", "C"];

/// Configure and build command for one source tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommands {
    pub config: String,
    pub build: String,
}

impl Default for StageCommands {
    fn default() -> Self {
        Self {
            config: DEFAULT_CONFIG_COMMAND.to_string(),
            build: DEFAULT_BUILD_COMMAND.to_string(),
        }
    }
}

/// Build commands for the recipe's three stages.
///
/// Packages with fewer phases leave the remaining stages at the default
/// pair, so the recipe stays the same for every package.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildCommands {
    stages: [StageCommands; BUILD_STAGES],
}

impl BuildCommands {
    /// Fill stages in order from `pairs`; extra pairs are ignored.
    pub fn from_stages(pairs: impl IntoIterator<Item = StageCommands>) -> Self {
        let mut commands = Self::default();
        for (slot, pair) in commands.stages.iter_mut().zip(pairs) {
            *slot = pair;
        }
        commands
    }

    pub fn stages(&self) -> &[StageCommands; BUILD_STAGES] {
        &self.stages
    }

    /// `(name, value)` build arguments, `CONFIG_COMMAND_A` through
    /// `BUILD_COMMAND_C`.
    pub fn build_args(&self) -> Vec<(String, String)> {
        STAGE_LABELS
            .iter()
            .zip(&self.stages)
            .flat_map(|(label, stage)| {
                [
                    (format!("CONFIG_COMMAND_{label}"), stage.config.clone()),
                    (format!("BUILD_COMMAND_{label}"), stage.build.clone()),
                ]
            })
            .collect()
    }
}

/// Which container CLI to drive and for what platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEngine {
    pub program: String,
    pub platform: String,
}

impl Default for ContainerEngine {
    fn default() -> Self {
        Self {
            program: DEFAULT_CONTAINER_ENGINE.to_string(),
            platform: DEFAULT_PLATFORM.to_string(),
        }
    }
}

/// The backported patch produced by the porting tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortingResult {
    pub patch: String,
    pub path: PathBuf,
}

/// Drives the porting tool's container lifecycle.
pub struct PortingToolRunner {
    runner: Arc<dyn CommandRunner>,
    engine: ContainerEngine,
    base_image: String,
    commands: BuildCommands,
}

impl PortingToolRunner {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            engine: ContainerEngine::default(),
            base_image: DEFAULT_FIXMORPH_BASE_IMAGE.to_string(),
            commands: BuildCommands::default(),
        }
    }

    pub fn with_engine(mut self, engine: ContainerEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_base_image(mut self, image: impl Into<String>) -> Self {
        self.base_image = image.into();
        self
    }

    pub fn with_build_commands(mut self, commands: BuildCommands) -> Self {
        self.commands = commands;
        self
    }

    /// Build the porting image from the workspace and return its tag.
    ///
    /// `short_commit` is used verbatim as the tag version. Build output goes
    /// to `sink` line by line while the build runs.
    pub async fn build_image(
        &self,
        workspace: &Workspace,
        short_commit: &str,
        package: &str,
        sink: &mut LineSink<'_>,
    ) -> BackportResult<String> {
        let tag = image_tag(package, short_commit);
        let mut spec = CommandSpec::new(&self.engine.program)
            .args(["build", "--platform", self.engine.platform.as_str()])
            .args(["-t", tag.as_str()])
            .args(["-f"])
            .path_arg(&workspace.root().join(BUILD_DEFINITION_FILE));

        let build_args = [
            ("BASE_IMAGE".to_string(), self.base_image.clone()),
            ("PACKAGE_NAME".to_string(), package.to_string()),
        ]
        .into_iter()
        .chain(self.commands.build_args());
        for (name, value) in build_args {
            spec = spec.arg("--build-arg").arg(format!("{name}={value}"));
        }
        let spec = spec.path_arg(workspace.root()).current_dir(workspace.root());

        info!(tag = %tag, engine = %self.engine.program, "building porting image");
        let output = self.runner.stream(&spec, sink).await?;
        if !output.success() {
            return Err(BackportError::ImageBuild {
                tag,
                failure: CommandFailure::new(&spec, output),
            });
        }
        Ok(tag)
    }

    /// Run the image to completion under a predictable container name.
    ///
    /// The container runs with `--init` so a stop request reaches the tool.
    /// It is removed again when the run fails or is interrupted; after a
    /// successful run it stays until [`extract_result`](Self::extract_result).
    pub async fn run(&self, tag: &str, sink: &mut LineSink<'_>) -> BackportResult<()> {
        let name = container_name(tag);

        // A container left by an earlier attempt would make `run --name` fail.
        let stale = CommandSpec::new(&self.engine.program).args(["rm", "-f", name.as_str()]);
        self.runner.capture(&stale).await?;

        let spec = CommandSpec::new(&self.engine.program)
            .args(["run", "--init", "--name", name.as_str(), tag]);
        info!(tag = %tag, container = %name, "running porting tool");
        let output = match self.runner.stream(&spec, sink).await {
            Ok(output) => output,
            Err(e) => {
                self.remove_container(&name).await;
                return Err(e.into());
            }
        };
        if !output.success() {
            self.remove_container(&name).await;
            return Err(BackportError::ContainerRun {
                tag: tag.to_string(),
                failure: CommandFailure::new(&spec, output),
            });
        }
        Ok(())
    }

    /// Copy the result directory out of the stopped container and read the
    /// generated patch. The container is removed whatever the outcome.
    pub async fn extract_result(
        &self,
        tag: &str,
        workspace: &Workspace,
    ) -> BackportResult<PortingResult> {
        let name = container_name(tag);
        let result = self.copy_result(&name, workspace).await;
        self.remove_container(&name).await;

        let result = result?;
        info!(path = %result.path.display(), patch_bytes = result.patch.len(), "extracted porting result");
        Ok(result)
    }

    async fn copy_result(&self, name: &str, workspace: &Workspace) -> BackportResult<PortingResult> {
        let dest = workspace.output_dir();
        if dest.exists() {
            std::fs::remove_dir_all(&dest).map_err(BackportError::workspace(&dest))?;
        }

        let spec = CommandSpec::new(&self.engine.program)
            .arg("cp")
            .arg(format!("{name}:{RESULT_CONTAINER_PATH}"))
            .path_arg(&dest);
        let output = self.runner.capture(&spec).await?;
        if !output.success() {
            return Err(BackportError::ArtifactExtraction {
                container: name.to_string(),
                failure: CommandFailure::new(&spec, output),
            });
        }

        let path = dest.join(RESULT_PATCH_FILE);
        if !path.is_file() {
            return Err(BackportError::MissingResult { path });
        }
        let patch = std::fs::read_to_string(&path).map_err(BackportError::workspace(&path))?;
        Ok(PortingResult { patch, path })
    }

    /// Force-remove the named container. Runs even after an interrupt.
    async fn remove_container(&self, name: &str) {
        let spec = CommandSpec::new(&self.engine.program).args(["rm", "-f", name]);
        match self.runner.cleanup(&spec).await {
            Ok(output) if output.success() => {}
            Ok(output) => {
                warn!(container = %name, stderr = %output.stderr.trim(), "failed to remove container")
            }
            Err(e) => warn!(container = %name, error = %e, "failed to remove container"),
        }
    }
}

/// Image tag for a package/commit pair: `backporter/<package>:<commit>`.
pub fn image_tag(package: &str, short_commit: &str) -> String {
    let repo = sanitize(&package.to_ascii_lowercase(), |c| {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
    });
    let version = sanitize(short_commit, |c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    format!("backporter/{repo}:{version}")
}

/// Container name derived from an image tag.
pub fn container_name(tag: &str) -> String {
    sanitize(tag, |c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn sanitize(s: &str, allowed: impl Fn(char) -> bool) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| if allowed(c) { c } else { '-' })
        .collect();
    let trimmed = cleaned.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::ExecError;
    use crate::fakes::{ScriptedResponse, ScriptedRunner};

    #[test]
    fn test_image_tag_and_container_name() {
        let tag = image_tag("Python3", "0123456789ab");
        assert_eq!(tag, "backporter/python3:0123456789ab");
        assert_eq!(container_name(&tag), "backporter-python3-0123456789ab");

        assert_eq!(image_tag("rpms/odd name", "v1.2/rc"), "backporter/rpms-odd-name:v1.2-rc");
    }

    #[test]
    fn test_unused_build_stages_get_default_commands() {
        let commands = BuildCommands::from_stages([StageCommands {
            config: "cmake -B build".to_string(),
            build: "cmake --build build".to_string(),
        }]);
        let args = commands.build_args();
        assert_eq!(args.len(), 6);
        assert_eq!(args[0], ("CONFIG_COMMAND_A".to_string(), "cmake -B build".to_string()));
        assert_eq!(args[1], ("BUILD_COMMAND_A".to_string(), "cmake --build build".to_string()));
        assert_eq!(args[2], ("CONFIG_COMMAND_B".to_string(), "./configure".to_string()));
        assert_eq!(args[5], ("BUILD_COMMAND_C".to_string(), "make".to_string()));
    }

    #[tokio::test]
    async fn test_build_image_passes_build_args_and_streams() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "podman",
            &["build"],
            ScriptedResponse::ok("STEP 1/9: FROM base\nCOMMIT backporter/zlib\n"),
        ));
        let ws = Workspace::create(None).unwrap();
        let porting = PortingToolRunner::new(runner.clone())
            .with_engine(ContainerEngine {
                program: "podman".to_string(),
                platform: "linux/arm64".to_string(),
            })
            .with_base_image("localhost/fixmorph:dev");

        let mut lines = Vec::new();
        let tag = porting
            .build_image(&ws, "abcdef", "zlib", &mut |l: &str| lines.push(l.to_string()))
            .await
            .unwrap();

        assert_eq!(tag, "backporter/zlib:abcdef");
        assert_eq!(lines.len(), 2);
        let call = &runner.calls()[0];
        assert!(call.args.contains(&"linux/arm64".to_string()));
        assert!(call.args.contains(&"BASE_IMAGE=localhost/fixmorph:dev".to_string()));
        assert!(call.args.contains(&"PACKAGE_NAME=zlib".to_string()));
        assert!(call.args.contains(&"BUILD_COMMAND_C=make".to_string()));
        assert_eq!(call.args.last().map(PathBuf::from), Some(ws.root().to_path_buf()));
    }

    #[tokio::test]
    async fn test_failed_run_is_container_run_error() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("docker", &["rm"], ScriptedResponse::ok(""))
                .on("docker", &["run"], ScriptedResponse::failure(2, "FixMorph: transplant failed")),
        );
        let porting = PortingToolRunner::new(runner);
        let err = porting
            .run("backporter/zlib:abc", &mut |_l: &str| {})
            .await
            .unwrap_err();
        assert!(matches!(err, BackportError::ContainerRun { ref failure, .. }
            if failure.output.stderr.contains("transplant failed")));
    }

    #[tokio::test]
    async fn test_failed_copy_is_artifact_extraction_error() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "docker",
            &["cp"],
            ScriptedResponse::failure(1, "Error: No such container"),
        ));
        let ws = Workspace::create(None).unwrap();
        let porting = PortingToolRunner::new(runner);

        let err = porting
            .extract_result("backporter/zlib:abc", &ws)
            .await
            .unwrap_err();
        assert!(matches!(err, BackportError::ArtifactExtraction { ref container, .. }
            if container == "backporter-zlib-abc"));
    }

    #[tokio::test]
    async fn test_copy_without_patch_is_missing_result() {
        let runner = Arc::new(ScriptedRunner::new().on(
            "docker",
            &["cp"],
            ScriptedResponse::ok("").with_effect(|spec| {
                let dest = PathBuf::from(spec.args.last().unwrap());
                std::fs::create_dir_all(dest).unwrap();
            }),
        ));
        let ws = Workspace::create(None).unwrap();
        let porting = PortingToolRunner::new(runner);

        let err = porting
            .extract_result("backporter/zlib:abc", &ws)
            .await
            .unwrap_err();
        assert!(matches!(err, BackportError::MissingResult { ref path }
            if path.ends_with("output/generated.patch")));
    }

    #[tokio::test]
    async fn test_extract_result_reads_patch_and_removes_container() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on(
                    "docker",
                    &["cp"],
                    ScriptedResponse::ok("").with_effect(|spec| {
                        let dest = PathBuf::from(spec.args.last().unwrap());
                        std::fs::create_dir_all(&dest).unwrap();
                        std::fs::write(dest.join(RESULT_PATCH_FILE), "--- a/x\n+++ b/x\n").unwrap();
                    }),
                )
                .on("docker", &["rm"], ScriptedResponse::ok("")),
        );
        let ws = Workspace::create(None).unwrap();
        let porting = PortingToolRunner::new(runner.clone());

        let result = porting
            .extract_result("backporter/zlib:abc", &ws)
            .await
            .unwrap();
        assert_eq!(result.patch, "--- a/x\n+++ b/x\n");
        assert_eq!(result.path, ws.output_dir().join(RESULT_PATCH_FILE));
        assert!(runner.invoked("docker", &["cp", "backporter-zlib-abc:/output"]));
        assert!(runner.invoked("docker", &["rm", "-f", "backporter-zlib-abc"]));
    }

    #[tokio::test]
    async fn test_failed_copy_still_removes_container() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("docker", &["cp"], ScriptedResponse::failure(1, "Error: No such path"))
                .on("docker", &["rm"], ScriptedResponse::ok("")),
        );
        let ws = Workspace::create(None).unwrap();
        let porting = PortingToolRunner::new(runner.clone());

        porting
            .extract_result("backporter/zlib:abc", &ws)
            .await
            .unwrap_err();
        assert!(runner.invoked("docker", &["rm", "-f", "backporter-zlib-abc"]));
    }

    #[tokio::test]
    async fn test_failed_run_removes_container() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("docker", &["rm"], ScriptedResponse::ok(""))
                .on("docker", &["run"], ScriptedResponse::failure(2, "FixMorph: transplant failed")),
        );
        let porting = PortingToolRunner::new(runner.clone());

        porting
            .run("backporter/zlib:abc", &mut |_l: &str| {})
            .await
            .unwrap_err();

        let calls = runner.calls();
        let last = calls.last().unwrap();
        assert_eq!(last.args, ["rm", "-f", "backporter-zlib-abc"]);
        assert!(runner.invoked("docker", &["run", "--init", "--name", "backporter-zlib-abc"]));
    }

    #[tokio::test]
    async fn test_interrupted_run_removes_container() {
        let runner = Arc::new(
            ScriptedRunner::new()
                .on("docker", &["rm"], ScriptedResponse::ok(""))
                .on("docker", &["run"], ScriptedResponse::interrupted()),
        );
        let porting = PortingToolRunner::new(runner.clone());

        let err = porting
            .run("backporter/zlib:abc", &mut |_l: &str| {})
            .await
            .unwrap_err();

        assert!(matches!(err, BackportError::Exec(ExecError::Interrupted { .. })));
        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].args, ["rm", "-f", "backporter-zlib-abc"]);
    }
}
