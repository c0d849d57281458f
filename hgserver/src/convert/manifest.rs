//! Parsing of the `tileset_info.json` manifest written by converters.

use std::path::Path;

use serde_json::Value;

use super::{ConversionError, ConversionOutput};
use crate::catalog::{validate_resolutions, Resolution};

pub const MANIFEST_FILE_NAME: &str = "tileset_info.json";

/// Read and parse `<output_dir>/tileset_info.json`.
pub async fn read_manifest(output_dir: &Path) -> Result<ConversionOutput, ConversionError> {
    let path = output_dir.join(MANIFEST_FILE_NAME);
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        ConversionError::MalformedOutput(format!("cannot read {}: {}", path.display(), e))
    })?;
    parse_manifest(&bytes)
}

/// Parse a manifest document.
///
/// `resolutions` is required; every other top-level key is kept as the
/// tileset's bounds info.
pub fn parse_manifest(bytes: &[u8]) -> Result<ConversionOutput, ConversionError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| ConversionError::MalformedOutput(format!("manifest is not JSON: {}", e)))?;
    let Value::Object(mut fields) = value else {
        return Err(ConversionError::MalformedOutput(
            "manifest must be a JSON object".to_string(),
        ));
    };

    let raw = fields
        .remove("resolutions")
        .ok_or_else(|| ConversionError::MalformedOutput("manifest has no resolutions".into()))?;
    let mut resolutions: Vec<Resolution> = serde_json::from_value(raw)
        .map_err(|e| ConversionError::MalformedOutput(format!("bad resolutions: {}", e)))?;
    resolutions.sort_by_key(|r| r.zoom);
    validate_resolutions(&resolutions).map_err(ConversionError::MalformedOutput)?;

    Ok(ConversionOutput {
        resolutions,
        bounds_info: Value::Object(fields),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_manifest_splits_bounds_info() {
        let doc = json!({
            "resolutions": [
                {"zoom": 1, "grid_width": 2, "grid_height": 2},
                {"zoom": 0, "grid_width": 1, "grid_height": 1}
            ],
            "min_pos": [0, 0],
            "max_pos": [3_000_000, 3_000_000],
            "chromsizes": [["chr1", 3_000_000]]
        });

        let output = parse_manifest(doc.to_string().as_bytes()).unwrap();

        assert_eq!(output.resolutions[0], Resolution::new(0, 1, 1));
        assert_eq!(output.resolutions.len(), 2);
        assert!(output.bounds_info.get("resolutions").is_none());
        assert_eq!(output.bounds_info["min_pos"], json!([0, 0]));
    }

    #[test]
    fn test_parse_manifest_rejects_bad_documents() {
        for doc in [
            "not json",
            "[1, 2]",
            r#"{"min_pos": [0]}"#,
            r#"{"resolutions": []}"#,
            r#"{"resolutions": [{"zoom": 0}]}"#,
            r#"{"resolutions": [{"zoom": 0, "grid_width": 1, "grid_height": 1},
                                {"zoom": 0, "grid_width": 2, "grid_height": 2}]}"#,
        ] {
            assert!(
                matches!(parse_manifest(doc.as_bytes()), Err(ConversionError::MalformedOutput(_))),
                "{}",
                doc
            );
        }
    }

    #[tokio::test]
    async fn test_read_manifest_missing_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = read_manifest(temp.path()).await.unwrap_err();
        assert!(matches!(err, ConversionError::MalformedOutput(_)));
    }
}
