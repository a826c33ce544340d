use serde::Serialize;

use crate::core::code_entry::BAILOUT_NO_REASON;
use crate::core::tree::{NodeId, ProfileNode};
use crate::core::types::Micros;

/*
 * Payloads of the `Profile` / `ProfileChunk` trace events, shaped like the
 * Chrome DevTools CPU profile stream: camelCase keys, optional fields
 * dropped entirely rather than emitted as null. The structs serialize with
 * serde_json; sinks decide where the bytes go.
 */

/// The `data` dictionary of one trace event. A `Profile` event carries only
/// `startTime`; chunks carry some subset of `cpuProfile`, `timeDeltas`, and
/// (for the final chunk) `endTime`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileEventData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Micros>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_profile: Option<ProfileChunk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_deltas: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<Micros>,
}

/// Incremental tree state: nodes created since the last chunk and the
/// terminal node id of every newly streamed sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProfileChunk {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<Vec<ChunkNode>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<NodeId>>,
}

/// One streamed tree node. `parent` is present for everything but the
/// root and always refers to a node emitted in this or an earlier chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkNode {
    pub call_frame: CallFrame,
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deopt_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallFrame {
    pub function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub script_id: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub column_number: Option<u32>,
}

impl ChunkNode {
    pub fn from_node(node: &ProfileNode) -> ChunkNode {
        let entry = node.entry();
        let bailout = entry.bailout_reason();
        ChunkNode {
            call_frame: CallFrame {
                function_name: entry.name().to_string(),
                url: if entry.resource_name().is_empty() {
                    None
                } else {
                    Some(entry.resource_name().to_string())
                },
                script_id: entry.script_id(),
                // 1-based in the engine, 0-based on the wire; zero means
                // unknown and is dropped.
                line_number: match entry.line_number() {
                    0 => None,
                    line => Some(line - 1),
                },
                column_number: match entry.column_number() {
                    0 => None,
                    column => Some(column - 1),
                },
            },
            id: node.id(),
            parent: node.parent(),
            deopt_reason: if bailout.is_empty() || bailout == BAILOUT_NO_REASON {
                None
            } else {
                Some(bailout)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    use crate::core::code_entry::{CodeEntry, CodeTag};
    use crate::core::tree::ProfileTree;
    use crate::core::types::NO_LINE_NUMBER_INFO;

    #[test]
    fn node_with_full_location_serializes_every_field() {
        let mut tree = ProfileTree::new();
        let entry = Arc::new(
            CodeEntry::new(CodeTag::Function, "work")
                .with_resource_name("http://example.com/app.js")
                .with_source_position(10, 5)
                .with_script(3, 0),
        );
        entry.set_bailout_reason("eval");
        let id = tree.add_path_from_end(&[Some(entry)], NO_LINE_NUMBER_INFO, true);

        let value = serde_json::to_value(ChunkNode::from_node(tree.node(id))).unwrap();
        assert_eq!(
            value,
            json!({
                "callFrame": {
                    "functionName": "work",
                    "url": "http://example.com/app.js",
                    "scriptId": 3,
                    "lineNumber": 9,
                    "columnNumber": 4,
                },
                "id": 2,
                "parent": 1,
                "deoptReason": "eval",
            })
        );
    }

    #[test]
    fn unknown_fields_are_dropped() {
        let tree = ProfileTree::new();
        let value = serde_json::to_value(ChunkNode::from_node(tree.root())).unwrap();
        assert_eq!(
            value,
            json!({
                "callFrame": {
                    "functionName": "(root)",
                    "scriptId": 0,
                },
                "id": 1,
            })
        );
    }

    #[test]
    fn optimizable_bailout_reason_is_not_a_deopt_reason() {
        let mut tree = ProfileTree::new();
        let entry = Arc::new(CodeEntry::new(CodeTag::Function, "fine"));
        entry.set_bailout_reason(BAILOUT_NO_REASON);
        let id = tree.add_path_from_end(&[Some(entry)], NO_LINE_NUMBER_INFO, true);

        let node = ChunkNode::from_node(tree.node(id));
        assert_eq!(node.deopt_reason, None);
    }

    #[test]
    fn event_data_serializes_only_populated_sections() {
        let data = ProfileEventData {
            start_time: Some(12),
            ..Default::default()
        };
        assert_eq!(serde_json::to_value(&data).unwrap(), json!({"startTime": 12}));

        let data = ProfileEventData {
            cpu_profile: Some(ProfileChunk {
                nodes: None,
                samples: Some(vec![4, 4, 5]),
            }),
            time_deltas: Some(vec![100, 50, 50]),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&data).unwrap(),
            json!({
                "cpuProfile": {"samples": [4, 4, 5]},
                "timeDeltas": [100, 50, 50],
            })
        );
    }
}
