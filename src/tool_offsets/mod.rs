//! ToolRegistry - registered tools and their offsets
//!
//! ## Responsibilities
//!
//! - Hold the tool set and the designated reference tool
//! - Replace the whole set atomically on save (last writer wins)
//! - Derive per-tool XY offsets from camera sightings and Z from mounting heights
//! - Protect the reference tool and the last camera tool from deletion

mod gcode;
mod types;

pub use gcode::offset_gcode;
pub use types::*;

use crate::blob_store::{BlobStore, Saved};
use crate::error::{Error, Result};
use crate::pubsub::{topics, PubSubTransport};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Blob key of the tool list
pub const TOOLS_BLOB: &str = "tools";

/// Tool registry
pub struct ToolRegistry {
    tools: Mutex<Vec<Tool>>,
    blobs: BlobStore,
    transport: Arc<dyn PubSubTransport>,
}

impl ToolRegistry {
    /// Load the persisted tool set (empty when absent or unreadable)
    pub async fn load(blobs: BlobStore, transport: Arc<dyn PubSubTransport>) -> Self {
        let tools = match blobs.load::<Vec<Tool>>(TOOLS_BLOB).await {
            Ok(Some(tools)) => match normalize_tools(tools) {
                Ok(tools) => {
                    tracing::info!(count = tools.len(), "Tools loaded");
                    tools
                }
                Err(e) => {
                    tracing::error!(error = %e, "Stored tool set invalid, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::error!(error = %e, "Stored tool set unreadable, starting empty");
                Vec::new()
            }
        };

        Self {
            tools: Mutex::new(tools),
            blobs,
            transport,
        }
    }

    /// All tools in saved order
    pub async fn list(&self) -> Vec<Tool> {
        self.tools.lock().await.clone()
    }

    /// Tool by id
    pub async fn get(&self, id: u32) -> Result<Tool> {
        self.tools
            .lock()
            .await
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("tool {}", id)))
    }

    /// The designated reference tool, if any
    pub async fn reference_tool(&self) -> Option<Tool> {
        self.tools
            .lock()
            .await
            .iter()
            .find(|t| t.is_reference)
            .cloned()
    }

    /// Replace the whole tool set
    pub async fn save_tools(&self, tools: Vec<Tool>) -> Result<Saved<Vec<Tool>>> {
        let tools = normalize_tools(tools)?;

        let mut current = self.tools.lock().await;
        *current = tools.clone();
        tracing::info!(count = tools.len(), "Tool set saved");
        let persisted = self.persist_and_publish(&current).await;
        Ok(Saved::new(tools, persisted))
    }

    /// Remove a tool
    pub async fn delete_tool(&self, id: u32) -> Result<Saved<Tool>> {
        let mut current = self.tools.lock().await;
        let index = current
            .iter()
            .position(|t| t.id == id)
            .ok_or_else(|| Error::NotFound(format!("tool {}", id)))?;

        let tool = &current[index];
        if tool.is_reference {
            return Err(Error::Conflict(format!(
                "tool {} is the reference tool; designate another first",
                id
            )));
        }
        if tool.is_camera() && current.iter().filter(|t| t.is_camera()).count() == 1 {
            return Err(Error::Conflict(format!("tool {} is the only camera tool", id)));
        }

        let removed = current.remove(index);
        tracing::info!(tool_id = id, name = %removed.name, "Tool deleted");
        let persisted = self.persist_and_publish(&current).await;
        Ok(Saved::new(removed, persisted))
    }

    /// Offset of one tool; `None` for camera tools
    pub async fn compute_offset(&self, id: u32) -> Result<Option<ToolOffset>> {
        let tools = self.tools.lock().await;
        let tool = tools
            .iter()
            .find(|t| t.id == id)
            .ok_or_else(|| Error::NotFound(format!("tool {}", id)))?;
        let reference = tools.iter().find(|t| t.is_reference);
        compute_offset(tool, reference)
    }

    /// Offsets of every tool, failures reported per tool
    pub async fn offsets(&self) -> Vec<ToolOffsetReport> {
        let tools = self.tools.lock().await;
        let reference = tools.iter().find(|t| t.is_reference);
        tools
            .iter()
            .map(|tool| {
                let (offset, error) = match compute_offset(tool, reference) {
                    Ok(offset) => (offset, None),
                    Err(e) => (None, Some(e.to_string())),
                };
                ToolOffsetReport {
                    tool_id: tool.id,
                    name: tool.name.clone(),
                    kind: tool.kind,
                    offset,
                    error,
                }
            })
            .collect()
    }

    async fn persist_and_publish(&self, tools: &[Tool]) -> bool {
        let persisted = match self.blobs.save(TOOLS_BLOB, &tools).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, code = e.kind_code(), "Tool set not persisted");
                false
            }
        };

        match serde_json::to_value(tools) {
            Ok(value) => {
                if let Err(e) = self.transport.publish_json(topics::TOOLS, &value) {
                    tracing::warn!(error = %e, "Tool set update not published");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Tool set not serialisable"),
        }

        persisted
    }
}

/// Validate a tool list and settle the reference designation.
///
/// When several tools claim to be the reference the last one in the list keeps it.
fn normalize_tools(mut tools: Vec<Tool>) -> Result<Vec<Tool>> {
    let mut seen = HashSet::new();
    for tool in &tools {
        if !seen.insert(tool.id) {
            return Err(Error::Conflict(format!("duplicate tool id {}", tool.id)));
        }
        tool.validate()?;
    }

    if let Some(winner) = tools.iter().rposition(|t| t.is_reference) {
        let mut demoted = Vec::new();
        for (index, tool) in tools.iter_mut().enumerate() {
            if tool.is_reference && index != winner {
                tool.is_reference = false;
                demoted.push(tool.id);
            }
        }
        if !demoted.is_empty() {
            tracing::warn!(
                reference = tools[winner].id,
                demoted = ?demoted,
                "Several reference tools in save, last one kept"
            );
        }
    }

    Ok(tools)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Point2, Point3};
    use crate::pubsub::LocalBus;
    use tempfile::TempDir;

    async fn registry() -> (ToolRegistry, TempDir) {
        let dir = TempDir::new().unwrap();
        let registry = ToolRegistry::load(BlobStore::new(dir.path()), LocalBus::start()).await;
        (registry, dir)
    }

    fn camera(id: u32) -> Tool {
        Tool {
            is_reference: true,
            programmed_position: Some(Point3::new(0.0, 0.0, 5.0)),
            ..Tool::new(id, "Camera", ToolKind::Camera)
        }
    }

    fn extruder(id: u32) -> Tool {
        Tool {
            programmed_position: Some(Point3::new(10.0, 10.0, 8.0)),
            actual_position: Some(Point2::new(10.1, 9.9)),
            z_trim: 0.2,
            ..Tool::new(id, format!("E{}", id), ToolKind::Extruder)
        }
    }

    #[tokio::test]
    async fn test_save_and_offsets() {
        let (registry, _dir) = registry().await;
        let saved = registry.save_tools(vec![camera(0), extruder(1)]).await.unwrap();
        assert!(saved.persisted);

        let offset = registry.compute_offset(1).await.unwrap().unwrap();
        assert_eq!(offset, ToolOffset { x: 0.1, y: -0.1, z: -2.8 });
        assert_eq!(registry.compute_offset(0).await.unwrap(), None);

        let report = registry.offsets().await;
        assert_eq!(report.len(), 2);
        assert!(report.iter().all(|r| r.error.is_none()));
    }

    #[tokio::test]
    async fn test_last_reference_wins() {
        let (registry, _dir) = registry().await;
        let mut e1 = extruder(1);
        e1.is_reference = true;
        registry.save_tools(vec![camera(0), e1]).await.unwrap();

        let reference = registry.reference_tool().await.unwrap();
        assert_eq!(reference.id, 1);
        assert!(!registry.get(0).await.unwrap().is_reference);
    }

    #[tokio::test]
    async fn test_duplicate_ids_rejected() {
        let (registry, _dir) = registry().await;
        registry.save_tools(vec![camera(0)]).await.unwrap();

        let result = registry.save_tools(vec![extruder(1), extruder(1)]).await;
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(registry.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let (registry, _dir) = registry().await;
        registry
            .save_tools(vec![camera(0), extruder(1), extruder(2)])
            .await
            .unwrap();

        assert!(matches!(registry.delete_tool(0).await, Err(Error::Conflict(_))));
        assert!(matches!(registry.delete_tool(9).await, Err(Error::NotFound(_))));

        let removed = registry.delete_tool(2).await.unwrap();
        assert_eq!(removed.value.id, 2);
        assert_eq!(registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_only_camera_protected_even_if_not_reference() {
        let (registry, _dir) = registry().await;
        let mut cam = camera(0);
        cam.is_reference = false;
        let mut e1 = extruder(1);
        e1.is_reference = true;
        registry.save_tools(vec![cam, e1]).await.unwrap();

        assert!(matches!(registry.delete_tool(0).await, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_reload_from_blob() {
        let dir = TempDir::new().unwrap();
        let bus = LocalBus::start();
        let first = ToolRegistry::load(BlobStore::new(dir.path()), bus.clone()).await;
        first.save_tools(vec![camera(0), extruder(3)]).await.unwrap();

        let second = ToolRegistry::load(BlobStore::new(dir.path()), bus).await;
        assert_eq!(second.list().await, first.list().await);
    }
}
