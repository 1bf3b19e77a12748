//! Stages the porting tool's build context inside the workspace.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{BackportError, BackportResult};
use crate::workspace::{Workspace, DISTGIT_DIR, OUTPUT_DIR};

/// File name of the container build definition.
pub const BUILD_DEFINITION_FILE: &str = "Dockerfile";
/// File name of the driver script run inside the container.
pub const DRIVER_SCRIPT_FILE: &str = "run_fixmorph.sh";
/// File name of the build context exclusion list.
pub const CONTEXT_IGNORE_FILE: &str = ".dockerignore";

/// Workspace entries the image build never reads.
const CONTEXT_EXCLUDES: [&str; 2] = [DISTGIT_DIR, OUTPUT_DIR];

const BUNDLED_BUILD_DEFINITION: &str = include_str!("../assets/Dockerfile");
const BUNDLED_DRIVER_SCRIPT: &str = include_str!("../assets/run_fixmorph.sh");

/// Static build assets for the porting container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecipe {
    build_definition: Cow<'static, str>,
    driver_script: Cow<'static, str>,
}

impl Default for BuildRecipe {
    fn default() -> Self {
        Self::bundled()
    }
}

impl BuildRecipe {
    /// The recipe shipped with this crate.
    pub fn bundled() -> Self {
        Self {
            build_definition: Cow::Borrowed(BUNDLED_BUILD_DEFINITION),
            driver_script: Cow::Borrowed(BUNDLED_DRIVER_SCRIPT),
        }
    }

    /// Load a replacement recipe from `dir`, which must contain both
    /// [`BUILD_DEFINITION_FILE`] and [`DRIVER_SCRIPT_FILE`].
    pub fn from_dir(dir: &Path) -> BackportResult<Self> {
        let read = |name: &str| {
            let path = dir.join(name);
            std::fs::read_to_string(&path).map_err(BackportError::workspace(path))
        };
        Ok(Self {
            build_definition: Cow::Owned(read(BUILD_DEFINITION_FILE)?),
            driver_script: Cow::Owned(read(DRIVER_SCRIPT_FILE)?),
        })
    }

    pub fn build_definition(&self) -> &str {
        &self.build_definition
    }

    pub fn driver_script(&self) -> &str {
        &self.driver_script
    }
}

/// Paths of the staged build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledWorkspace {
    pub patch_file: PathBuf,
    pub source_tree: PathBuf,
    pub build_definition: PathBuf,
    pub driver_script: PathBuf,
    pub context_ignore: PathBuf,
}

/// Merges the upstream patch, the downstream tree and the recipe into one
/// build context.
#[derive(Debug, Default)]
pub struct WorkspaceAssembler;

impl WorkspaceAssembler {
    /// Each step overwrites what a previous attempt left behind; there is no
    /// rollback.
    pub fn assemble(
        workspace: &Workspace,
        patch: &str,
        source_tree: &Path,
        recipe: &BuildRecipe,
    ) -> BackportResult<AssembledWorkspace> {
        let patch_file = workspace.patch_file();
        std::fs::write(&patch_file, patch).map_err(BackportError::workspace(&patch_file))?;
        debug!(path = %patch_file.display(), "wrote upstream patch");

        let staged_tree = workspace.source_tree_dir();
        if staged_tree != source_tree {
            if staged_tree.exists() {
                std::fs::remove_dir_all(&staged_tree)
                    .map_err(BackportError::workspace(&staged_tree))?;
            }
            std::fs::rename(source_tree, &staged_tree)
                .map_err(BackportError::workspace(source_tree))?;
        }
        debug!(
            from = %source_tree.display(),
            to = %staged_tree.display(),
            "staged downstream source tree"
        );

        let build_definition = workspace.root().join(BUILD_DEFINITION_FILE);
        std::fs::write(&build_definition, recipe.build_definition())
            .map_err(BackportError::workspace(&build_definition))?;

        let driver_script = workspace.root().join(DRIVER_SCRIPT_FILE);
        std::fs::write(&driver_script, recipe.driver_script())
            .map_err(BackportError::workspace(&driver_script))?;
        make_executable(&driver_script)?;

        // The distgit clone still holds the source archive; keep it and any
        // earlier result out of the build context.
        let context_ignore = workspace.root().join(CONTEXT_IGNORE_FILE);
        let excludes: String = CONTEXT_EXCLUDES.iter().map(|entry| format!("{entry}\n")).collect();
        std::fs::write(&context_ignore, excludes).map_err(BackportError::workspace(&context_ignore))?;

        info!(workspace = %workspace.root().display(), "assembled build context");
        Ok(AssembledWorkspace {
            patch_file,
            source_tree: staged_tree,
            build_definition,
            driver_script,
            context_ignore,
        })
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> BackportResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))
        .map_err(BackportError::workspace(path))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> BackportResult<()> {
    Ok(())
}
