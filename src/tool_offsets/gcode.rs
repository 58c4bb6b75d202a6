//! G-code rendering of tool offsets for tool-change macros

use super::types::{Tool, ToolOffset};

/// `SAVE_VARIABLE` lines storing the offset under the tool's slot
pub fn offset_gcode(tool: &Tool, offset: &ToolOffset) -> Vec<String> {
    let slot = tool.slot();
    [("x", offset.x), ("y", offset.y), ("z", offset.z)]
        .iter()
        .map(|(axis, value)| {
            format!(
                "SAVE_VARIABLE VARIABLE={}_offset_{} VALUE={:.3}",
                slot, axis, value
            )
        })
        .collect()
}
