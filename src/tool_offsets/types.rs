//! Tool offset types

use crate::error::{Error, Result};
use crate::models::{round_to, Point2, Point3};
use serde::{Deserialize, Serialize};

/// Tool kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Camera,
    Extruder,
    Dispenser,
    Probe,
    Other,
}

impl ToolKind {
    /// Letter used in firmware variable slots (`e1`, `c0`, ...)
    pub fn letter(&self) -> char {
        match self {
            ToolKind::Camera => 'c',
            ToolKind::Extruder => 'e',
            ToolKind::Dispenser => 'l',
            ToolKind::Probe => 'p',
            ToolKind::Other => 't',
        }
    }
}

/// Registered tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tool {
    pub id: u32,
    pub name: String,
    pub kind: ToolKind,
    #[serde(default)]
    pub is_reference: bool,
    /// Where the tool was commanded to be (direct jog)
    #[serde(default)]
    pub programmed_position: Option<Point3>,
    /// Where the camera saw it
    #[serde(default)]
    pub actual_position: Option<Point2>,
    #[serde(default)]
    pub z_trim: f64,
}

impl Tool {
    pub fn new(id: u32, name: impl Into<String>, kind: ToolKind) -> Self {
        Self {
            id,
            name: name.into(),
            kind,
            is_reference: false,
            programmed_position: None,
            actual_position: None,
            z_trim: 0.0,
        }
    }

    pub fn is_camera(&self) -> bool {
        self.kind == ToolKind::Camera
    }

    /// Firmware variable slot, kind letter followed by id
    pub fn slot(&self) -> String {
        format!("{}{}", self.kind.letter(), self.id)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Validation(format!("tool {} has an empty name", self.id)));
        }
        let finite = self.z_trim.is_finite()
            && self.programmed_position.map_or(true, |p| p.is_finite())
            && self.actual_position.map_or(true, |p| p.is_finite());
        if !finite {
            return Err(Error::Validation(format!(
                "tool {} has non-finite coordinates",
                self.id
            )));
        }
        Ok(())
    }
}

/// Offset of a tool relative to the reference tool (mm)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolOffset {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ToolOffset {
    pub const ZERO: ToolOffset = ToolOffset {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };
}

/// Per-tool line of an offsets listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOffsetReport {
    pub tool_id: u32,
    pub name: String,
    pub kind: ToolKind,
    pub offset: Option<ToolOffset>,
    pub error: Option<String>,
}

/// Offset of `tool` against `reference`.
///
/// `Ok(None)` for camera tools, which frame the image and carry no offset.
/// Without a reference tool the origin `{0,0,0}` stands in for it.
/// Z is not sighted optically: it comes from the mounting heights plus trim.
pub fn compute_offset(tool: &Tool, reference: Option<&Tool>) -> Result<Option<ToolOffset>> {
    if tool.is_camera() {
        return Ok(None);
    }
    if tool.is_reference {
        return Ok(Some(ToolOffset::ZERO));
    }

    let (programmed, actual) = match (tool.programmed_position, tool.actual_position) {
        (Some(programmed), Some(actual)) => (programmed, actual),
        (None, _) => {
            return Err(Error::Validation(format!(
                "tool {} has no programmed position",
                tool.id
            )))
        }
        (_, None) => {
            return Err(Error::Validation(format!(
                "tool {} has no measured position",
                tool.id
            )))
        }
    };

    let reference_z = reference
        .and_then(|r| r.programmed_position)
        .unwrap_or(Point3::ORIGIN)
        .z;

    Ok(Some(ToolOffset {
        x: round_to(actual.x - programmed.x, 3),
        y: round_to(actual.y - programmed.y, 3),
        z: round_to(tool.z_trim + (reference_z - programmed.z), 3),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extruder(id: u32) -> Tool {
        Tool {
            programmed_position: Some(Point3::new(100.0, 100.0, 8.0)),
            actual_position: Some(Point2::new(100.25, 99.5)),
            z_trim: 0.2,
            ..Tool::new(id, format!("T{}", id), ToolKind::Extruder)
        }
    }

    fn reference_camera() -> Tool {
        Tool {
            is_reference: true,
            programmed_position: Some(Point3::new(0.0, 0.0, 5.0)),
            ..Tool::new(0, "Camera", ToolKind::Camera)
        }
    }

    #[test]
    fn test_offset_against_reference() {
        let reference = reference_camera();
        let offset = compute_offset(&extruder(1), Some(&reference)).unwrap().unwrap();
        assert_eq!(offset.x, 0.25);
        assert_eq!(offset.y, -0.5);
        assert_eq!(offset.z, -2.8);
    }

    #[test]
    fn test_reference_tool_is_zero() {
        let mut tool = extruder(2);
        tool.is_reference = true;
        assert_eq!(compute_offset(&tool, None).unwrap(), Some(ToolOffset::ZERO));
    }

    #[test]
    fn test_camera_has_no_offset() {
        let mut camera = Tool::new(3, "Cam", ToolKind::Camera);
        camera.programmed_position = Some(Point3::new(1.0, 2.0, 3.0));
        camera.actual_position = Some(Point2::new(4.0, 5.0));
        assert_eq!(compute_offset(&camera, None).unwrap(), None);
    }

    #[test]
    fn test_missing_reference_uses_origin() {
        let offset = compute_offset(&extruder(1), None).unwrap().unwrap();
        assert_eq!(offset.z, -7.8);
    }

    #[test]
    fn test_missing_positions_rejected() {
        let mut tool = extruder(4);
        tool.actual_position = None;
        assert!(matches!(compute_offset(&tool, None), Err(Error::Validation(_))));
    }

    #[test]
    fn test_slot_letters() {
        assert_eq!(extruder(1).slot(), "e1");
        assert_eq!(Tool::new(2, "Glue", ToolKind::Dispenser).slot(), "l2");
        assert_eq!(Tool::new(3, "Misc", ToolKind::Other).slot(), "t3");
    }

    #[test]
    fn test_tool_json_shape() {
        let tool: Tool = serde_json::from_str(r#"{"id": 1, "name": "E1", "kind": "extruder"}"#).unwrap();
        assert_eq!(tool.kind, ToolKind::Extruder);
        assert!(!tool.is_reference);
        assert_eq!(tool.z_trim, 0.0);
    }
}
