use crate::{DatasetError, DatasetResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// A named processing stage, ordered by dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Upload,
    Backup,
    Unpack,
    Index,
    Delete,
}

impl Operation {
    pub fn all() -> [Operation; 5] {
        [
            Operation::Upload,
            Operation::Backup,
            Operation::Unpack,
            Operation::Index,
            Operation::Delete,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Upload => "UPLOAD",
            Operation::Backup => "BACKUP",
            Operation::Unpack => "UNPACK",
            Operation::Index => "INDEX",
            Operation::Delete => "DELETE",
        }
    }

    /// The stage that must be OK before this one may start.
    pub fn predecessor(&self) -> Option<Operation> {
        match self {
            Operation::Upload => None,
            Operation::Backup => Some(Operation::Upload),
            Operation::Unpack => Some(Operation::Upload),
            Operation::Index => Some(Operation::Unpack),
            Operation::Delete => Some(Operation::Upload),
        }
    }

    /// Stages that become eligible once this one is OK.
    pub fn successors(&self) -> Vec<Operation> {
        Operation::all()
            .into_iter()
            .filter(|op| op.predecessor() == Some(*self))
            .collect()
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = DatasetError;

    fn from_str(s: &str) -> DatasetResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "UPLOAD" => Ok(Operation::Upload),
            "BACKUP" => Ok(Operation::Backup),
            "UNPACK" => Ok(Operation::Unpack),
            "INDEX" => Ok(Operation::Index),
            "DELETE" => Ok(Operation::Delete),
            _ => Err(DatasetError::Internal(format!("unknown operation {}", s))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationState {
    Pending,
    Working,
    Ok,
    Failed,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "PENDING",
            OperationState::Working => "WORKING",
            OperationState::Ok => "OK",
            OperationState::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OperationState::Pending),
            "WORKING" => Some(OperationState::Working),
            "OK" => Some(OperationState::Ok),
            "FAILED" => Some(OperationState::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub state: OperationState,
    pub message: Option<String>,
    /// Unix seconds of the last transition.
    pub timestamp: u64,
}

/// Requested change to one operation's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Queue the stage (PENDING).
    Enable,
    /// Start an attempt (WORKING).
    Begin,
    /// Restart an attempt that is stuck in WORKING.
    ForceRetry,
    /// Finish the current attempt (OK or FAILED).
    Complete { ok: bool },
}

pub type OperationMap = BTreeMap<Operation, OperationRecord>;

/// Validate `transition` of `operation` for `dataset` against the dataset's
/// current records and return the state to write.
pub fn check_transition(
    dataset: &str,
    operation: Operation,
    transition: Transition,
    current: &OperationMap,
) -> DatasetResult<OperationState> {
    let state_err = |reason: String| DatasetError::invalid_state(dataset, operation.as_str(), reason);
    let existing = current.get(&operation).map(|r| r.state);

    let predecessor_ok = || -> DatasetResult<()> {
        if let Some(pred) = operation.predecessor() {
            match current.get(&pred).map(|r| r.state) {
                Some(OperationState::Ok) => {}
                other => {
                    return Err(state_err(format!(
                        "{} is {} rather than OK",
                        pred,
                        other.map(|s| s.as_str()).unwrap_or("absent")
                    )))
                }
            }
        }
        Ok(())
    };

    match transition {
        Transition::Enable => {
            predecessor_ok()?;
            match existing {
                None | Some(OperationState::Pending) | Some(OperationState::Failed) => {
                    Ok(OperationState::Pending)
                }
                Some(s) => Err(state_err(format!("cannot enable from {}", s))),
            }
        }
        Transition::Begin => {
            predecessor_ok()?;
            match existing {
                None | Some(OperationState::Pending) | Some(OperationState::Failed) => {
                    Ok(OperationState::Working)
                }
                Some(s) => Err(state_err(format!("cannot begin from {}", s))),
            }
        }
        Transition::ForceRetry => match existing {
            Some(OperationState::Working) => {
                predecessor_ok()?;
                Ok(OperationState::Working)
            }
            other => Err(state_err(format!(
                "forced retry needs WORKING, found {}",
                other.map(|s| s.as_str()).unwrap_or("absent")
            ))),
        },
        Transition::Complete { ok } => match existing {
            Some(OperationState::Working) => Ok(if ok {
                OperationState::Ok
            } else {
                OperationState::Failed
            }),
            other => Err(state_err(format!(
                "cannot complete from {}",
                other.map(|s| s.as_str()).unwrap_or("absent")
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(state: OperationState) -> OperationRecord {
        OperationRecord {
            state,
            message: None,
            timestamp: 0,
        }
    }

    #[test]
    fn test_dependency_chain() {
        assert_eq!(Operation::Index.predecessor(), Some(Operation::Unpack));
        assert_eq!(Operation::Unpack.predecessor(), Some(Operation::Upload));
        assert_eq!(Operation::Upload.predecessor(), None);
        let next = Operation::Upload.successors();
        assert!(next.contains(&Operation::Unpack));
        assert!(!next.contains(&Operation::Index));
        assert_eq!("index".parse::<Operation>().unwrap(), Operation::Index);
    }

    #[test]
    fn test_index_requires_unpack_ok() {
        let mut ops = OperationMap::new();
        ops.insert(Operation::Upload, record(OperationState::Ok));
        let err = check_transition("ds", Operation::Index, Transition::Begin, &ops).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::State);

        ops.insert(Operation::Unpack, record(OperationState::Working));
        assert!(check_transition("ds", Operation::Index, Transition::Begin, &ops).is_err());

        ops.insert(Operation::Unpack, record(OperationState::Ok));
        assert_eq!(
            check_transition("ds", Operation::Index, Transition::Begin, &ops).unwrap(),
            OperationState::Working
        );
    }

    #[test]
    fn test_attempt_lifecycle() {
        let mut ops = OperationMap::new();
        ops.insert(Operation::Upload, record(OperationState::Ok));

        // Not started yet: cannot complete.
        assert!(check_transition(
            "ds",
            Operation::Unpack,
            Transition::Complete { ok: true },
            &ops
        )
        .is_err());

        ops.insert(Operation::Unpack, record(OperationState::Working));
        assert!(check_transition("ds", Operation::Unpack, Transition::Begin, &ops).is_err());
        assert_eq!(
            check_transition(
                "ds",
                Operation::Unpack,
                Transition::Complete { ok: false },
                &ops
            )
            .unwrap(),
            OperationState::Failed
        );

        ops.insert(Operation::Unpack, record(OperationState::Failed));
        assert_eq!(
            check_transition("ds", Operation::Unpack, Transition::Begin, &ops).unwrap(),
            OperationState::Working
        );

        ops.insert(Operation::Unpack, record(OperationState::Ok));
        assert!(check_transition("ds", Operation::Unpack, Transition::Begin, &ops).is_err());
        assert!(check_transition("ds", Operation::Unpack, Transition::ForceRetry, &ops).is_err());
    }

    #[test]
    fn test_serde_names() {
        let rec = OperationRecord {
            state: OperationState::Ok,
            message: Some("done".to_string()),
            timestamp: 7,
        };
        let json = serde_json::to_value(&rec).unwrap();
        assert_eq!(json["state"], "OK");
        assert_eq!(
            serde_json::to_value(Operation::Unpack).unwrap(),
            serde_json::json!("UNPACK")
        );
    }
}
