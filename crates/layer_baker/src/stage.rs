//! Stage tasks and their wire format.
//!
//! A bake is driven entirely by these tasks travelling through the job
//! queue. Everything a stage needs to resume has to be in its parameters,
//! because the process that enqueued it may be long gone.

use crate::error::BakeError;
use crate::geo::SpatialBox;
use crate::model::{DivisionId, EntityId, LayerId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Which half of setup a continuation resumes in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupPhase {
    /// Deleting the previous division tree
    Divisions,
    /// Clearing entity bake flags
    Entities,
}

/// Resumable position of a setup run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupCursor {
    pub phase: SetupPhase,
    /// Pages finished so far, across continuations
    pub pages_done: u32,
}

impl Default for SetupCursor {
    fn default() -> Self {
        Self {
            phase: SetupPhase::Divisions,
            pages_done: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetupParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<SetupCursor>,
}

/// Work already done by an interrupted subdivide run
#[derive(Debug, Clone, PartialEq)]
pub struct SubdivideCheckpoint {
    /// The division persisted before the interruption
    pub division_id: DivisionId,
    /// The entities selected for it
    pub entity_ids: Vec<EntityId>,
    /// Whether children still have to be scheduled
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubdivideParams {
    #[serde(rename = "box")]
    pub region: SpatialBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_division_id: Option<DivisionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_entity_ids: Option<Vec<EntityId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_has_more: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_division_id: Option<DivisionId>,
}

impl SubdivideParams {
    /// The first subdivide of a bake: the whole world, no parent
    pub fn root() -> Self {
        Self::child(SpatialBox::WORLD, None)
    }

    pub fn child(region: SpatialBox, parent: Option<DivisionId>) -> Self {
        Self {
            region,
            parent_division_id: parent,
            checkpoint_entity_ids: None,
            checkpoint_has_more: None,
            checkpoint_division_id: None,
        }
    }

    pub fn with_checkpoint(mut self, checkpoint: SubdivideCheckpoint) -> Self {
        self.checkpoint_division_id = Some(checkpoint.division_id);
        self.checkpoint_entity_ids = Some(checkpoint.entity_ids);
        self.checkpoint_has_more = Some(checkpoint.has_more);
        self
    }

    /// Assembles the checkpoint carried by these params, if any.
    ///
    /// A checkpoint needs both the division id and the entity list; one
    /// without the other cannot be resumed and is rejected.
    pub fn checkpoint(&self) -> Result<Option<SubdivideCheckpoint>, BakeError> {
        match (&self.checkpoint_division_id, &self.checkpoint_entity_ids) {
            (None, None) => Ok(None),
            (Some(division_id), Some(entity_ids)) => Ok(Some(SubdivideCheckpoint {
                division_id: *division_id,
                entity_ids: entity_ids.clone(),
                has_more: self.checkpoint_has_more.unwrap_or(false),
            })),
            _ => Err(BakeError::InvalidParams(
                "checkpoint requires both a division and its entity list".to_string(),
            )),
        }
    }
}

/// The closed set of bake stages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum Stage {
    Setup(SetupParams),
    Subdivide(SubdivideParams),
    Monitor,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Setup(_) => "setup",
            Stage::Subdivide(_) => "subdivide",
            Stage::Monitor => "monitor",
        }
    }

    /// Builds a stage from its name and loosely typed parameters.
    pub fn parse(name: &str, params: Value) -> Result<Self, BakeError> {
        // Stages without parameters may arrive with a null body
        let params = if params.is_null() {
            Value::Object(Default::default())
        } else {
            params
        };
        let invalid = |e: serde_json::Error| BakeError::InvalidParams(format!("{}: {}", name, e));
        match name {
            "setup" => Ok(Stage::Setup(serde_json::from_value(params).map_err(invalid)?)),
            "subdivide" => Ok(Stage::Subdivide(
                serde_json::from_value(params).map_err(invalid)?,
            )),
            "monitor" => Ok(Stage::Monitor),
            other => Err(BakeError::InvalidState(format!(
                "Invalid baking stage: {}",
                other
            ))),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A stage bound to the layer it operates on; the unit the queue carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageTask {
    pub layer_id: LayerId,
    #[serde(flatten)]
    pub stage: Stage,
}

impl StageTask {
    pub fn setup(layer_id: LayerId, cursor: Option<SetupCursor>) -> Self {
        Self {
            layer_id,
            stage: Stage::Setup(SetupParams { cursor }),
        }
    }

    pub fn subdivide(layer_id: LayerId, params: SubdivideParams) -> Self {
        Self {
            layer_id,
            stage: Stage::Subdivide(params),
        }
    }

    pub fn monitor(layer_id: LayerId) -> Self {
        Self {
            layer_id,
            stage: Stage::Monitor,
        }
    }
}

/// What a stage handler asks the dispatcher to do next
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Nothing further, including "nothing to do"
    Completed,
    /// Interrupted before any durable write; run the same task again
    Redeliver,
    /// Interrupted after the division was persisted; resume from here
    RetryWithCheckpoint(SubdivideCheckpoint),
    /// Setup ran out of budget; continue from this cursor
    Continue(SetupCursor),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_subdivide_wire_format() {
        let parent = DivisionId::new();
        let task = StageTask::subdivide(
            LayerId::new(),
            SubdivideParams::child(SpatialBox::new(90.0, 0.0, 40.0, -20.0), Some(parent)),
        );
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["stage"], "subdivide");
        assert_eq!(value["box"]["north"], 90.0);
        assert_eq!(value["box"]["west"], -20.0);
        assert_eq!(value["parent_division_id"], json!(parent.0));
        assert!(value.get("checkpoint_entity_ids").is_none());

        let back: StageTask = serde_json::from_value(value).unwrap();
        assert_eq!(back, task);
    }

    #[test]
    fn test_monitor_and_setup_wire_format() {
        let layer = LayerId::new();
        let value = serde_json::to_value(StageTask::monitor(layer)).unwrap();
        assert_eq!(value, json!({"layer_id": layer.0, "stage": "monitor"}));

        let value = serde_json::to_value(StageTask::setup(layer, None)).unwrap();
        assert_eq!(value, json!({"layer_id": layer.0, "stage": "setup"}));
    }

    #[test]
    fn test_parse_by_name() {
        assert_eq!(Stage::parse("monitor", Value::Null).unwrap(), Stage::Monitor);
        assert_eq!(
            Stage::parse("setup", Value::Null).unwrap(),
            Stage::Setup(SetupParams::default())
        );

        let stage = Stage::parse(
            "subdivide",
            json!({"box": {"north": 1.23, "south": 4.56, "east": 7.89, "west": 0.36}}),
        )
        .unwrap();
        match stage {
            Stage::Subdivide(params) => {
                assert_eq!(params.region, SpatialBox::new(1.23, 4.56, 7.89, 0.36));
                assert!(params.parent_division_id.is_none());
            }
            other => panic!("unexpected stage {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_stage_and_bad_params() {
        assert!(matches!(
            Stage::parse("invalid", Value::Null),
            Err(BakeError::InvalidState(_))
        ));
        assert!(matches!(
            Stage::parse("subdivide", json!({"north": "x"})),
            Err(BakeError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_checkpoint_round_trip_through_params() {
        let checkpoint = SubdivideCheckpoint {
            division_id: DivisionId::new(),
            entity_ids: vec![EntityId::new(), EntityId::new()],
            has_more: true,
        };
        let params = SubdivideParams::root().with_checkpoint(checkpoint.clone());
        assert_eq!(params.checkpoint().unwrap(), Some(checkpoint));
        assert_eq!(SubdivideParams::root().checkpoint().unwrap(), None);

        let mut partial = SubdivideParams::root();
        partial.checkpoint_division_id = Some(DivisionId::new());
        assert!(partial.checkpoint().is_err());
    }
}
