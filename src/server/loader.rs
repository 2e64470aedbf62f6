use std::fs;
use std::path::Path;

use crate::common::data::Mock;
use crate::server::server::Error;

/// Reads mock definitions from every `.json` file directly inside `dir`. A
/// file may hold a single definition or an array of definitions. Validation
/// beyond JSON shape is not performed here, the registry merges whatever
/// parses.
pub fn load_mock_definitions(dir: &Path) -> Result<Vec<Mock>, Error> {
    let mut definitions = Vec::new();

    let entries = fs::read_dir(dir)
        .map_err(|err| Error::MockLoadError(format!("cannot read {}: {err}", dir.display())))?;

    for entry in entries {
        let entry = entry.map_err(|err| Error::MockLoadError(err.to_string()))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }

        let content = fs::read_to_string(&path).map_err(|err| {
            Error::MockLoadError(format!("cannot read {}: {err}", path.display()))
        })?;
        let value: serde_json::Value = serde_json::from_str(&content).map_err(|err| {
            Error::MockLoadError(format!("invalid mock file {}: {err}", path.display()))
        })?;

        let mut parsed: Vec<Mock> = if value.is_array() {
            serde_json::from_value(value).map_err(|err| {
                Error::MockLoadError(format!("invalid mock file {}: {err}", path.display()))
            })?
        } else {
            vec![serde_json::from_value(value).map_err(|err| {
                Error::MockLoadError(format!("invalid mock file {}: {err}", path.display()))
            })?]
        };

        tracing::debug!(
            "loaded {} mock definition(s) from {}",
            parsed.len(),
            path.display()
        );
        definitions.append(&mut parsed);
    }

    Ok(definitions)
}
