//! Mesh import collaborator
//!
//! Importing a mesh and wrapping it in a blueprint happens inside the engine
//! editor, outside this process. The importer's job is to get that done and
//! return the blueprint path to spawn.

use placer_core::blueprint;
use placer_core::{PlacerError, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Default content directory for imported assets
pub const DEFAULT_ASSET_PATH: &str = "/Game/Meshes";
/// Default blueprint asset name
pub const DEFAULT_BLUEPRINT_NAME: &str = "MeshBP";

/// What to import and where to put it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    /// Mesh file on the local filesystem
    pub mesh_path: PathBuf,
    /// Content directory, e.g. `/Game/Meshes`
    pub asset_path: String,
    /// Name of the blueprint to create
    pub blueprint_name: String,
}

impl ImportRequest {
    pub fn new(mesh_path: impl Into<PathBuf>) -> Self {
        Self {
            mesh_path: mesh_path.into(),
            asset_path: DEFAULT_ASSET_PATH.to_string(),
            blueprint_name: DEFAULT_BLUEPRINT_NAME.to_string(),
        }
    }

    /// Package path of the blueprint this import produces
    pub fn blueprint_path(&self) -> String {
        blueprint::package_path(&self.asset_path, &self.blueprint_name)
    }

    /// Asset name the mesh is imported under (file stem)
    pub fn mesh_asset_name(&self) -> Result<String> {
        self.mesh_path
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                PlacerError::Setup(format!(
                    "cannot derive an asset name from {}",
                    self.mesh_path.display()
                ))
            })
    }
}

/// Produces a spawnable blueprint from a mesh file
pub trait AssetImporter {
    /// Import the mesh and return the blueprint path
    fn import(&mut self, request: &ImportRequest) -> Result<String>;
}

/// Importer that prints a snippet for the engine's embedded Python console.
///
/// The operator runs the snippet in the editor; the returned path is the
/// conventional `<asset_path>/<blueprint_name>` the snippet creates.
pub struct ConsoleImporter<W: Write> {
    out: W,
}

impl<W: Write> ConsoleImporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> AssetImporter for ConsoleImporter<W> {
    fn import(&mut self, request: &ImportRequest) -> Result<String> {
        let mesh_path = absolute(&request.mesh_path)?;
        let asset_name = request.mesh_asset_name()?;
        let blueprint_path = request.blueprint_path();
        info!(
            "Preparing console import of {} as {}",
            mesh_path.display(),
            blueprint_path
        );

        let snippet = console_snippet(&mesh_path, &asset_name, request);
        let rule = "=".repeat(50);
        writeln!(
            self.out,
            "Run the following in the engine's Python console:\n\n{rule}\n{snippet}{rule}\n"
        )
        .map_err(|e| PlacerError::Setup(format!("failed to write import instructions: {}", e)))?;

        Ok(blueprint_path)
    }
}

/// The mesh must exist before anything is printed
fn absolute(path: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        return Err(PlacerError::Setup(format!(
            "mesh file not found: {}",
            path.display()
        )));
    }
    std::path::absolute(path)
        .map_err(|e| PlacerError::Setup(format!("cannot resolve {}: {}", path.display(), e)))
}

fn console_snippet(mesh_path: &Path, asset_name: &str, request: &ImportRequest) -> String {
    let mesh = mesh_path.to_string_lossy();
    let dest = &request.asset_path;
    let bp = &request.blueprint_name;
    format!(
        r#"import unreal
tools = unreal.AssetToolsHelpers.get_asset_tools()
if not unreal.EditorAssetLibrary.does_directory_exist({dest:?}):
    unreal.EditorAssetLibrary.make_directory({dest:?})
options = unreal.FbxImportUI()
options.set_editor_property("import_mesh", True)
options.set_editor_property("import_textures", True)
options.set_editor_property("import_materials", True)
options.static_mesh_import_data.set_editor_property("combine_meshes", True)
task = unreal.AssetImportTask()
task.set_editor_property("automated", True)
task.set_editor_property("destination_path", {dest:?})
task.set_editor_property("destination_name", {asset_name:?})
task.set_editor_property("filename", {mesh:?})
task.set_editor_property("replace_existing", True)
task.set_editor_property("save", True)
task.options = options
tools.import_asset_tasks([task])
factory = unreal.BlueprintFactory()
factory.set_editor_property("parent_class", unreal.Actor)
bp = tools.create_asset({bp:?}, {dest:?}, unreal.Blueprint, factory)
component = unreal.EditorAddComponentUtilities.add_static_mesh_component(bp.get_editor_property("simple_construction_script"), "StaticMeshComponent")
component.set_editor_property("static_mesh", unreal.EditorAssetLibrary.load_asset({mesh_asset:?}))
unreal.KismetCompilerUtilities.get_default_object().compile_blueprint(bp)
unreal.EditorAssetLibrary.save_loaded_asset(bp)
"#,
        mesh_asset = blueprint::package_path(dest, asset_name),
    )
}
