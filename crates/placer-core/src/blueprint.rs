//! Blueprint class paths
//!
//! Spawn commands need a fully qualified generated-class path such as
//! `/Game/Meshes/MeshBP.MeshBP_C`. Operators usually pass the package path
//! (`/Game/Meshes/MeshBP`) or the asset path (`/Game/Meshes/MeshBP.MeshBP`).

/// Suffix the engine appends to a blueprint's generated class
pub const CLASS_SUFFIX: &str = "_C";

/// Normalize a blueprint path to its generated-class form
pub fn class_path(path: &str) -> String {
    let path = path.trim();
    if path.ends_with(CLASS_SUFFIX) {
        return path.to_string();
    }

    let last_segment = path.rsplit('/').next().unwrap_or(path);
    if last_segment.contains('.') {
        format!("{}{}", path, CLASS_SUFFIX)
    } else {
        format!("{}.{}{}", path, last_segment, CLASS_SUFFIX)
    }
}

/// Conventional package path of a blueprint created by the importer
pub fn package_path(asset_path: &str, blueprint_name: &str) -> String {
    format!("{}/{}", asset_path.trim_end_matches('/'), blueprint_name)
}
